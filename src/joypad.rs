// The eight gameboy buttons/direction keys are arranged in form of a 2x4 matrix. Select either button or direction
// keys by writing to this register, then read-out bit 0-3.
//
// FF00 - P1/JOYP - Joypad (R/W)
//
// Bit 7 - Not used
// Bit 6 - Not used
// Bit 5 - P15 Select Button Keys      (0=Select)
// Bit 4 - P14 Select Direction Keys   (0=Select)
// Bit 3 - P13 Input Down  or Start    (0=Pressed) (Read Only)
// Bit 2 - P12 Input Up    or Select   (0=Pressed) (Read Only)
// Bit 1 - P11 Input Left  or Button B (0=Pressed) (Read Only)
// Bit 0 - P10 Input Right or Button A (0=Pressed) (Read Only)
use super::intf::{Flag, Intf};
use super::memory::Memory;
use std::cell::RefCell;
use std::rc::Rc;

// Button state as sampled by the frame driver for a single call to `set_joypad_state`.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct JoypadState {
    pub right: bool,
    pub left: bool,
    pub up: bool,
    pub down: bool,
    pub a: bool,
    pub b: bool,
    pub select: bool,
    pub start: bool,
}

impl JoypadState {
    fn direction_nibble(self) -> u8 {
        let mut n = 0x0f;
        if self.right {
            n &= !0b0001;
        }
        if self.left {
            n &= !0b0010;
        }
        if self.up {
            n &= !0b0100;
        }
        if self.down {
            n &= !0b1000;
        }
        n
    }

    fn button_nibble(self) -> u8 {
        let mut n = 0x0f;
        if self.a {
            n &= !0b0001;
        }
        if self.b {
            n &= !0b0010;
        }
        if self.select {
            n &= !0b0100;
        }
        if self.start {
            n &= !0b1000;
        }
        n
    }
}

pub struct Joypad {
    intf: Rc<RefCell<Intf>>,
    state: JoypadState,
    select: u8,
}

impl Joypad {
    pub fn power_up(intf: Rc<RefCell<Intf>>) -> Self {
        Self { intf, state: JoypadState::default(), select: 0x30 }
    }

    // Replaces the full button state. Raises the Joypad interrupt if any bit in the
    // row(s) currently selected by the CPU made a 1->0 transition (press edge).
    pub fn set_joypad_state(&mut self, state: JoypadState) {
        let before = self.selected_nibble();
        self.state = state;
        let after = self.selected_nibble();
        if before & !after != 0 {
            self.intf.borrow_mut().hi(Flag::Joypad);
        }
    }

    fn selected_nibble(&self) -> u8 {
        let direction_selected = self.select & 0b0001_0000 == 0x00;
        let button_selected = self.select & 0b0010_0000 == 0x00;
        match (direction_selected, button_selected) {
            (true, true) => self.state.direction_nibble() & self.state.button_nibble(),
            (true, false) => self.state.direction_nibble(),
            (false, true) => self.state.button_nibble(),
            (false, false) => 0x0f,
        }
    }
}

impl Memory for Joypad {
    fn get(&self, a: u16) -> u8 {
        debug_assert_eq!(a, 0xff00, "bus should only route $ff00 to the joypad");
        0xc0 | (self.select & 0x30) | self.selected_nibble()
    }

    fn set(&mut self, a: u16, v: u8) {
        debug_assert_eq!(a, 0xff00, "bus should only route $ff00 to the joypad");
        self.select = v & 0x30;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_row_read_back() {
        let mut jp = Joypad::power_up(Rc::new(RefCell::new(Intf::power_up())));
        jp.set(0xff00, 0b0010_0000); // select direction row
        jp.set_joypad_state(JoypadState { down: true, ..Default::default() });
        assert_eq!(jp.get(0xff00) & 0x0f, 0b0111);
    }

    #[test]
    fn press_edge_on_selected_row_raises_interrupt() {
        let intf = Rc::new(RefCell::new(Intf::power_up()));
        let mut jp = Joypad::power_up(intf.clone());
        jp.set(0xff00, 0b0010_0000); // direction row selected
        jp.set_joypad_state(JoypadState { a: true, ..Default::default() });
        assert_eq!(intf.borrow().data & 0x10, 0);
        jp.set_joypad_state(JoypadState { a: true, down: true, ..Default::default() });
        assert_eq!(intf.borrow().data & 0x10, 0x10);
    }

    #[test]
    fn press_on_unselected_row_does_not_raise() {
        let intf = Rc::new(RefCell::new(Intf::power_up()));
        let mut jp = Joypad::power_up(intf.clone());
        jp.set(0xff00, 0b0001_0000); // button row selected, direction row not
        jp.set_joypad_state(JoypadState { down: true, ..Default::default() });
        assert_eq!(intf.borrow().data & 0x10, 0);
    }
}
