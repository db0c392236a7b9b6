// Sometimes it's useful to have a timer that interrupts at regular intervals for routines that require periodic or
// percise updates. The timer in the GameBoy has a selectable frequency of 4096, 16384, 65536, or 262144 Hertz.
// This frequency increments the Timer Counter (TIMA). When it overflows, it generates an interrupt. It is then loaded
// with the contents of Timer Modulo (TMA).
//
// See: http://gbdev.gg8.se/wiki/articles/Timer_and_Divider_Registers
use super::intf::{Flag, Intf};
use std::cell::RefCell;
use std::rc::Rc;

pub struct Timer {
    intf: Rc<RefCell<Intf>>,

    // This register is incremented at rate of 16384Hz (~16779Hz on SGB). Writing any value to this register resets it
    // to 00h.
    div: u8,
    // This timer is incremented by a clock frequency specified by the TAC register ($FF07). When the value overflows
    // (gets bigger than FFh) then it will be reset to the value specified in TMA (FF06), and an interrupt will be
    // requested, as described below.
    tima: u8,
    // When the TIMA overflows, this data will be loaded.
    tma: u8,
    //  Bit  2   - Timer Enable
    //  Bits 1-0 - Input Clock Select
    //             00: CPU Clock / 1024 (  4096 Hz)
    //             01: CPU Clock / 16   (262144 Hz)
    //             10: CPU Clock / 64   ( 65536 Hz)
    //             11: CPU Clock / 256  ( 16384 Hz)
    tac: u8,

    freq: u32,
    // Count the number of cycles and set 0 each 256 cycles
    tmp1: u32,
    // Count the number of cycles and set 0 each "freq" cycles
    tmp2: u32,
}

impl Timer {
    pub fn power_up(intf: Rc<RefCell<Intf>>) -> Self {
        Timer {
            intf,
            div: 0x00,
            tima: 0x00,
            tma: 0x00,
            tac: 0x00,
            freq: 1024,
            tmp1: 0,
            tmp2: 0,
        }
    }

    pub fn get(&self, a: u16) -> u8 {
        match a {
            0xff04 => self.div,
            0xff05 => self.tima,
            0xff06 => self.tma,
            0xff07 => self.tac | 0xf8,
            _ => unreachable!(),
        }
    }

    pub fn set(&mut self, a: u16, v: u8) {
        match a {
            0xff04 => {
                self.div = 0x00;
                self.tmp1 = 0;
            }
            0xff05 => self.tima = v,
            0xff06 => self.tma = v,
            0xff07 => {
                self.tac = v & 0x07;
                self.freq = match v & 0x03 {
                    0x00 => 1024,
                    0x01 => 16,
                    0x02 => 64,
                    0x03 => 256,
                    _ => unreachable!(),
                };
            }
            _ => unreachable!(),
        }
    }

    // Advances the divider and, when enabled, the timer counter by `cycles` T-cycles,
    // raising the Timer interrupt on overflow.
    pub fn next(&mut self, cycles: u32) {
        self.tmp1 += cycles;
        while self.tmp1 >= 256 {
            self.div = self.div.wrapping_add(1);
            self.tmp1 -= 256;
        }

        if (self.tac & 0x04) != 0x00 {
            self.tmp2 += cycles;
            while self.tmp2 >= self.freq {
                self.tima = self.tima.wrapping_add(1);
                if self.tima == 0x00 {
                    self.tima = self.tma;
                    self.intf.borrow_mut().hi(Flag::Timer);
                }
                self.tmp2 -= self.freq;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_timer() -> Timer {
        Timer::power_up(Rc::new(RefCell::new(Intf::power_up())))
    }

    #[test]
    fn tima_overflow_reloads_from_tma_and_raises_interrupt() {
        let mut t = new_timer();
        t.set(0xff05, 0xfb);
        t.set(0xff06, 0xaa);
        t.set(0xff07, 0x05); // enabled, 262144 Hz => period 16
        // $FB ticks 5 times to overflow and reload $AA, then 15 more ticks land on $B9.
        for _ in 0..20 {
            t.next(16);
        }
        assert_eq!(t.get(0xff05), 0xb9);
        assert_eq!(t.intf.borrow().data & 0x04, 0x04);
    }

    #[test]
    fn writing_div_resets_it_regardless_of_value() {
        let mut t = new_timer();
        for _ in 0..10 {
            t.next(256);
        }
        assert_ne!(t.get(0xff04), 0);
        t.set(0xff04, 0x42);
        assert_eq!(t.get(0xff04), 0);
    }

    #[test]
    fn disabled_timer_does_not_advance_tima() {
        let mut t = new_timer();
        t.set(0xff07, 0x00); // bit 2 clear: disabled
        t.next(100_000);
        assert_eq!(t.get(0xff05), 0x00);
    }
}
