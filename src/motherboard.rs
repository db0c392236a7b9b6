// The engine's public face: owns the CPU and the bus, and drives them one instruction
// (and, through run_frame, one whole frame) at a time.
use super::cartridge::{self, CartridgeHeader};
use super::cpu::Cpu;
use super::error::EngineError;
use super::gpu::{SCREEN_H, SCREEN_W};
use super::joypad::JoypadState;
use super::mmunit::Mmunit;

// Total T-cycles in one 59.7 Hz DMG frame: 154 scanlines * 456 dots, dots and T-cycles
// running 1:1 on DMG.
const CYCLES_PER_FRAME: u32 = 154 * 456;

pub struct Engine {
    cpu: Cpu,
    mmu: Mmunit,
    header: CartridgeHeader,
}

impl Engine {
    // Builds the engine from raw ROM bytes. Does not touch the filesystem; a driver
    // that wants battery-backed saves restored should follow with `load_ram`.
    pub fn load_rom(rom: Vec<u8>) -> Result<Self, EngineError> {
        let header = CartridgeHeader::parse(&rom)?;
        let cartridge = cartridge::power_up(rom)?;
        Ok(Self { cpu: Cpu::power_up(), mmu: Mmunit::power_up(cartridge), header })
    }

    // Executes exactly one CPU instruction (including any interrupt it causes to be
    // serviced afterward) and forwards the T-cycles it spent to the timer and PPU.
    // Returns the number of T-cycles elapsed.
    pub fn step(&mut self) -> u32 {
        let cycles = self.cpu.next(&mut self.mmu);
        self.mmu.next(cycles);
        cycles
    }

    // Runs instructions until at least one full frame's worth of T-cycles has elapsed.
    pub fn run_frame(&mut self) {
        let mut elapsed = 0;
        while elapsed < CYCLES_PER_FRAME {
            elapsed += self.step();
        }
    }

    // Palette-index framebuffer (0-3 per pixel, 160x144, row-major) as of the last
    // completed scanline render.
    pub fn framebuffer(&self) -> &[u8; SCREEN_W * SCREEN_H] {
        &self.mmu.gpu.data
    }

    pub fn set_joypad(&mut self, state: JoypadState) {
        self.mmu.joypad.set_joypad_state(state);
    }

    // Drains the byte most recently emitted over the serial port, if any.
    pub fn serial_out(&mut self) -> Option<u8> {
        self.mmu.serial.take_out()
    }

    pub fn header(&self) -> &CartridgeHeader {
        &self.header
    }

    // Battery-backed cartridge RAM, for a driver to persist across runs. `None` when
    // this cartridge has no battery (persisting it would be pointless: it resets to
    // zero on every power-up on real hardware too).
    pub fn save_ram(&self) -> Option<&[u8]> {
        if self.header.has_battery {
            Some(self.mmu.cartridge.ram())
        } else {
            None
        }
    }

    pub fn load_ram(&mut self, data: &[u8]) {
        self.mmu.cartridge.load_ram(data);
    }

    // Number of out-of-range mapper bank accesses recovered locally (degraded to $FF)
    // since power-up. An implementation-defined diagnostic, not a fatal condition.
    pub fn bus_faults(&self) -> u32 {
        self.mmu.cartridge.bus_faults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop_rom() -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0147] = 0x00; // ROM ONLY
        rom[0x0148] = 0x00; // 32KiB
        rom[0x0149] = 0x00; // no RAM
        rom
    }

    #[test]
    fn load_rom_rejects_a_truncated_file() {
        let err = Engine::load_rom(vec![0u8; 4]).unwrap_err();
        assert!(matches!(err, EngineError::Truncated { .. }));
    }

    #[test]
    fn step_executes_a_nop_and_advances_pc() {
        let mut engine = Engine::load_rom(nop_rom()).unwrap();
        let pc_before = engine.cpu.reg.pc;
        let cycles = engine.step();
        assert_eq!(cycles, 4);
        assert_eq!(engine.cpu.reg.pc, pc_before.wrapping_add(1));
    }

    #[test]
    fn run_frame_advances_at_least_one_frame_of_cycles() {
        let mut engine = Engine::load_rom(nop_rom()).unwrap();
        engine.run_frame();
        assert!(engine.mmu.gpu.v_blank);
    }
}
