// All memory references from the CPU pass through here: cartridge ROM/RAM, VRAM/OAM
// (delegated to the PPU), flat work RAM with its echo alias, I/O registers, HRAM, and
// the interrupt enable/flag pair.
use super::cartridge::Cartridge;
use super::gpu::Gpu;
use super::intf::Intf;
use super::joypad::Joypad;
use super::memory::Memory;
use super::serial::Serial;
use super::sound::Sound;
use super::timer::Timer;
use std::cell::RefCell;
use std::rc::Rc;

pub struct Mmunit {
    pub cartridge: Box<dyn Cartridge>,
    pub gpu: Gpu,
    pub joypad: Joypad,
    pub serial: Serial,
    pub sound: Sound,
    pub timer: Timer,
    inte: u8,
    intf: Rc<RefCell<Intf>>,
    hram: [u8; 0x7f],
    wram: [u8; 0x2000],
}

impl Mmunit {
    pub fn power_up(cartridge: Box<dyn Cartridge>) -> Self {
        let intf = Rc::new(RefCell::new(Intf::power_up()));
        let mut r = Self {
            cartridge,
            gpu: Gpu::power_up(intf.clone()),
            joypad: Joypad::power_up(intf.clone()),
            serial: Serial::power_up(intf.clone()),
            sound: Sound::power_up(),
            timer: Timer::power_up(intf.clone()),
            inte: 0x00,
            intf,
            hram: [0x00; 0x7f],
            wram: [0x00; 0x2000],
        };
        r.set(0xff05, 0x00);
        r.set(0xff06, 0x00);
        r.set(0xff07, 0x00);
        r.set(0xff10, 0x80);
        r.set(0xff11, 0xbf);
        r.set(0xff12, 0xf3);
        r.set(0xff14, 0xbf);
        r.set(0xff16, 0x3f);
        r.set(0xff17, 0x00);
        r.set(0xff19, 0xbf);
        r.set(0xff1a, 0x7f);
        r.set(0xff1b, 0xff);
        r.set(0xff1c, 0x9f);
        r.set(0xff1e, 0xff);
        r.set(0xff20, 0xff);
        r.set(0xff21, 0x00);
        r.set(0xff22, 0x00);
        r.set(0xff23, 0xbf);
        r.set(0xff24, 0x77);
        r.set(0xff25, 0xf3);
        r.set(0xff26, 0xf1);
        r.set(0xff40, 0x91);
        r.set(0xff42, 0x00);
        r.set(0xff43, 0x00);
        r.set(0xff45, 0x00);
        r.set(0xff47, 0xfc);
        r.set(0xff48, 0xff);
        r.set(0xff49, 0xff);
        r.set(0xff4a, 0x00);
        r.set(0xff4b, 0x00);
        r
    }

    // Forwards elapsed T-cycles from a CPU instruction to the timer and PPU.
    pub fn next(&mut self, cycles: u32) {
        self.timer.next(cycles);
        self.gpu.next(cycles);
    }
}

impl Memory for Mmunit {
    fn get(&self, a: u16) -> u8 {
        match a {
            0x0000..=0x7fff => self.cartridge.get(a),
            0x8000..=0x9fff => self.gpu.get(a),
            0xa000..=0xbfff => self.cartridge.get(a),
            0xc000..=0xdfff => self.wram[a as usize - 0xc000],
            0xe000..=0xfdff => self.wram[a as usize - 0xe000],
            0xfe00..=0xfe9f => self.gpu.get(a),
            0xfea0..=0xfeff => 0x00,
            0xff00 => self.joypad.get(a),
            0xff01..=0xff02 => self.serial.get(a),
            0xff04..=0xff07 => self.timer.get(a),
            0xff0f => 0xe0 | self.intf.borrow().data,
            0xff10..=0xff3f => self.sound.get(a),
            0xff40..=0xff45 | 0xff47..=0xff4b => self.gpu.get(a),
            0xff80..=0xfffe => self.hram[a as usize - 0xff80],
            0xffff => self.inte,
            _ => 0xff,
        }
    }

    fn set(&mut self, a: u16, v: u8) {
        match a {
            0x0000..=0x7fff => self.cartridge.set(a, v),
            0x8000..=0x9fff => self.gpu.set(a, v),
            0xa000..=0xbfff => self.cartridge.set(a, v),
            0xc000..=0xdfff => self.wram[a as usize - 0xc000] = v,
            0xe000..=0xfdff => self.wram[a as usize - 0xe000] = v,
            0xfe00..=0xfe9f => self.gpu.set(a, v),
            0xfea0..=0xfeff => {}
            0xff00 => self.joypad.set(a, v),
            0xff01..=0xff02 => self.serial.set(a, v),
            0xff04..=0xff07 => self.timer.set(a, v),
            0xff0f => self.intf.borrow_mut().data = v,
            0xff10..=0xff3f => self.sound.set(a, v),
            0xff46 => {
                // Launches a DMA transfer from (v << 8) to OAM; on real hardware this
                // takes 160 M-cycles during which the CPU may only access HRAM, a
                // restriction this engine does not enforce (see the DMA-timing
                // Non-goal).
                let base = u16::from(v) << 8;
                for i in 0..0xa0 {
                    let b = self.get(base + i);
                    self.set(0xfe00 + i, b);
                }
            }
            0xff40..=0xff45 | 0xff47..=0xff4b => self.gpu.set(a, v),
            0xff80..=0xfffe => self.hram[a as usize - 0xff80] = v,
            0xffff => self.inte = v,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::cartridge::RomOnly;

    fn new_bus() -> Mmunit {
        Mmunit::power_up(Box::new(RomOnly::power_up(vec![0u8; 0x8000])))
    }

    #[test]
    fn echo_ram_aliases_work_ram() {
        let mut m = new_bus();
        m.set(0xc010, 0x5a);
        assert_eq!(m.get(0xe010), 0x5a);
        m.set(0xe020, 0x7b);
        assert_eq!(m.get(0xc020), 0x7b);
    }

    #[test]
    fn oam_dma_copies_source_block_into_oam() {
        let mut m = new_bus();
        m.set(0xc000, 0x11);
        m.set(0xc001, 0x22);
        m.set(0xff46, 0xc0);
        assert_eq!(m.get(0xfe00), 0x11);
        assert_eq!(m.get(0xfe01), 0x22);
    }

    #[test]
    fn interrupt_enable_register_is_independently_addressable() {
        let mut m = new_bus();
        m.set(0xffff, 0x1f);
        assert_eq!(m.get(0xffff), 0x1f);
        assert_eq!(m.get(0xff0f), 0xe0);
    }

    #[test]
    fn interrupt_flag_upper_bits_always_read_as_one() {
        let mut m = new_bus();
        m.set(0xff0f, 0x00);
        assert_eq!(m.get(0xff0f), 0xe0);
        m.set(0xff0f, 0x1f);
        assert_eq!(m.get(0xff0f), 0xff);
    }
}
