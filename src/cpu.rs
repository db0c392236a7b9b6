// The chip behind the NINTENDO GAME BOY: the Sharp SM83, a Z80-derived 8-bit core.
use super::memory::Memory;
use super::register::Flag::{C, H, N, Z};
use super::register::Register;

// Machine-cycle (4 T-cycles each) cost of every primary opcode, not counting the extra
// machine cycle paid when a conditional branch is taken (see `branched` below).
//  0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f
const OP_CYCLES: [u32; 256] = [
    1, 3, 2, 2, 1, 1, 2, 1, 5, 2, 2, 2, 1, 1, 2, 1, // 0
    1, 3, 2, 2, 1, 1, 2, 1, 3, 2, 2, 2, 1, 1, 2, 1, // 1
    2, 3, 2, 2, 1, 1, 2, 1, 2, 2, 2, 2, 1, 1, 2, 1, // 2
    2, 3, 2, 2, 3, 3, 3, 1, 2, 2, 2, 2, 1, 1, 2, 1, // 3
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 4
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 5
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 6
    2, 2, 2, 2, 2, 2, 1, 2, 1, 1, 1, 1, 1, 1, 2, 1, // 7
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 8
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 9
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // a
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // b
    2, 3, 3, 4, 3, 4, 2, 4, 2, 4, 3, 1, 3, 6, 2, 4, // c
    2, 3, 3, 1, 3, 4, 2, 4, 2, 4, 3, 1, 3, 1, 2, 4, // d
    3, 3, 2, 1, 1, 4, 2, 4, 4, 1, 4, 1, 1, 1, 2, 4, // e
    3, 3, 2, 1, 1, 4, 2, 4, 3, 2, 4, 1, 1, 1, 2, 4, // f
];

//  0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f
const CB_CYCLES: [u32; 256] = [
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // 0
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // 1
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // 2
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // 3
    2, 2, 2, 2, 2, 2, 3, 2, 2, 2, 2, 2, 2, 2, 3, 2, // 4
    2, 2, 2, 2, 2, 2, 3, 2, 2, 2, 2, 2, 2, 2, 3, 2, // 5
    2, 2, 2, 2, 2, 2, 3, 2, 2, 2, 2, 2, 2, 2, 3, 2, // 6
    2, 2, 2, 2, 2, 2, 3, 2, 2, 2, 2, 2, 2, 2, 3, 2, // 7
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // 8
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // 9
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // A
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // B
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // C
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // D
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // E
    2, 2, 2, 2, 2, 2, 4, 2, 2, 2, 2, 2, 2, 2, 4, 2, // F
];

pub struct Cpu {
    pub reg: Register,
    pub halted: bool,
    pub stopped: bool,
    ime: bool,
    // EI only takes effect after the instruction following it completes; RETI/DI act
    // immediately and bypass this.
    ime_scheduled: bool,
    // Set by a conditional branch arm when the branch is actually taken, consumed right
    // after dispatch to add the extra machine cycle. Never inferred from flags after the
    // fact, since the flags checked there can belong to the wrong condition.
    branched: bool,
}

// The GameBoy CPU is based on a subset of the Z80 microprocessor. A summary of these commands is given below.
// If 'Flags affected' is not given for a command then none are affected.
impl Cpu {
    fn imm(&mut self, mem: &mut dyn Memory) -> u8 {
        let v = mem.get(self.reg.pc);
        self.reg.pc += 1;
        v
    }

    fn imm_word(&mut self, mem: &mut dyn Memory) -> u16 {
        let v = mem.get_word(self.reg.pc);
        self.reg.pc += 2;
        v
    }

    fn stack_push(&mut self, mem: &mut dyn Memory, v: u16) {
        self.reg.sp -= 2;
        mem.set_word(self.reg.sp, v);
    }

    fn stack_pop(&mut self, mem: &mut dyn Memory) -> u16 {
        let r = mem.get_word(self.reg.sp);
        self.reg.sp += 2;
        r
    }

    // Add n to A.
    // Flags: Z set if result is zero. N reset. H set on carry from bit 3. C set on carry from bit 7.
    fn alu_add(&mut self, n: u8) {
        let a = self.reg.a;
        let r = a.wrapping_add(n);
        self.reg.set_flag(C, u16::from(a) + u16::from(n) > 0xff);
        self.reg.set_flag(H, (a & 0x0f) + (n & 0x0f) > 0x0f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // Add n + carry to A.
    fn alu_adc(&mut self, n: u8) {
        let a = self.reg.a;
        let c = u8::from(self.reg.get_flag(C));
        let r = a.wrapping_add(n).wrapping_add(c);
        self.reg.set_flag(C, u16::from(a) + u16::from(n) + u16::from(c) > 0xff);
        self.reg.set_flag(H, (a & 0x0f) + (n & 0x0f) + (c & 0x0f) > 0x0f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // Subtract n from A.
    fn alu_sub(&mut self, n: u8) {
        let a = self.reg.a;
        let r = a.wrapping_sub(n);
        self.reg.set_flag(C, u16::from(a) < u16::from(n));
        self.reg.set_flag(H, (a & 0x0f) < (n & 0x0f));
        self.reg.set_flag(N, true);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // Subtract n + carry from A.
    fn alu_sbc(&mut self, n: u8) {
        let a = self.reg.a;
        let c = u8::from(self.reg.get_flag(C));
        let r = a.wrapping_sub(n).wrapping_sub(c);
        self.reg.set_flag(C, u16::from(a) < u16::from(n) + u16::from(c));
        self.reg.set_flag(H, (a & 0x0f) < (n & 0x0f) + c);
        self.reg.set_flag(N, true);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    fn alu_and(&mut self, n: u8) {
        let r = self.reg.a & n;
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, true);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    fn alu_or(&mut self, n: u8) {
        let r = self.reg.a | n;
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    fn alu_xor(&mut self, n: u8) {
        let r = self.reg.a ^ n;
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // Compare A with n: an A-n subtraction whose result is discarded.
    fn alu_cp(&mut self, n: u8) {
        let r = self.reg.a;
        self.alu_sub(n);
        self.reg.a = r;
    }

    fn alu_inc(&mut self, a: u8) -> u8 {
        let r = a.wrapping_add(1);
        self.reg.set_flag(H, (a & 0x0f) + 0x01 > 0x0f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_dec(&mut self, a: u8) -> u8 {
        let r = a.wrapping_sub(1);
        self.reg.set_flag(H, a & 0x0f == 0x00);
        self.reg.set_flag(N, true);
        self.reg.set_flag(Z, r == 0);
        r
    }

    // Add n to HL.
    fn alu_add_hl(&mut self, n: u16) {
        let a = self.reg.get_hl();
        let r = a.wrapping_add(n);
        self.reg.set_flag(C, a > 0xffff - n);
        self.reg.set_flag(H, (a & 0x07ff) + (n & 0x07ff) > 0x07ff);
        self.reg.set_flag(N, false);
        self.reg.set_hl(r);
    }

    // Add signed immediate to SP.
    fn alu_add_sp(&mut self, mem: &mut dyn Memory) {
        let a = self.reg.sp;
        let b = i16::from(self.imm(mem) as i8) as u16;
        self.reg.set_flag(C, (a & 0x00ff) + (b & 0x00ff) > 0x00ff);
        self.reg.set_flag(H, (a & 0x000f) + (b & 0x000f) > 0x000f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, false);
        self.reg.sp = a.wrapping_add(b);
    }

    fn alu_swap(&mut self, a: u8) -> u8 {
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, a == 0x00);
        (a >> 4) | (a << 4)
    }

    // Decimal-adjust A after a BCD add/sub.
    fn alu_daa(&mut self) {
        let mut a = self.reg.a;
        let mut adjust = if self.reg.get_flag(C) { 0x60 } else { 0x00 };
        if self.reg.get_flag(H) {
            adjust |= 0x06;
        };
        if !self.reg.get_flag(N) {
            if a & 0x0f > 0x09 {
                adjust |= 0x06;
            };
            if a > 0x99 {
                adjust |= 0x60;
            };
            a = a.wrapping_add(adjust);
        } else {
            a = a.wrapping_sub(adjust);
        }
        self.reg.set_flag(C, adjust >= 0x60);
        self.reg.set_flag(H, false);
        self.reg.set_flag(Z, a == 0x00);
        self.reg.a = a;
    }

    fn alu_cpl(&mut self) {
        self.reg.a = !self.reg.a;
        self.reg.set_flag(H, true);
        self.reg.set_flag(N, true);
    }

    fn alu_ccf(&mut self) {
        let v = !self.reg.get_flag(C);
        self.reg.set_flag(C, v);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
    }

    fn alu_scf(&mut self) {
        self.reg.set_flag(C, true);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
    }

    fn alu_rlc(&mut self, a: u8) -> u8 {
        let c = (a & 0x80) >> 7 == 0x01;
        let r = (a << 1) | u8::from(c);
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_rl(&mut self, a: u8) -> u8 {
        let c = (a & 0x80) >> 7 == 0x01;
        let r = (a << 1) + u8::from(self.reg.get_flag(C));
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_rrc(&mut self, a: u8) -> u8 {
        let c = a & 0x01 == 0x01;
        let r = if c { 0x80 | (a >> 1) } else { a >> 1 };
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_rr(&mut self, a: u8) -> u8 {
        let c = a & 0x01 == 0x01;
        let r = if self.reg.get_flag(C) { 0x80 | (a >> 1) } else { a >> 1 };
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_sla(&mut self, a: u8) -> u8 {
        let c = (a & 0x80) >> 7 == 0x01;
        let r = a << 1;
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_sra(&mut self, a: u8) -> u8 {
        let c = a & 0x01 == 0x01;
        let r = (a >> 1) | (a & 0x80);
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_srl(&mut self, a: u8) -> u8 {
        let c = a & 0x01 == 0x01;
        let r = a >> 1;
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_bit(&mut self, a: u8, b: u8) {
        let r = a & (1 << b) == 0x00;
        self.reg.set_flag(H, true);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r);
    }

    fn alu_set(&mut self, a: u8, b: u8) -> u8 {
        a | (1 << b)
    }

    fn alu_res(&mut self, a: u8, b: u8) -> u8 {
        a & !(1 << b)
    }

    // Add signed n to PC, used by JR.
    fn alu_jr(&mut self, mem: &mut dyn Memory) {
        let n = mem.get(self.reg.pc) as i8;
        self.reg.pc += 1;
        self.reg.pc = ((u32::from(self.reg.pc) as i32) + i32::from(n)) as u16;
    }
}

impl Cpu {
    pub fn power_up() -> Self {
        Self {
            reg: Register::power_up(),
            halted: false,
            stopped: false,
            ime: false,
            ime_scheduled: false,
            branched: false,
        }
    }

    // Executes one instruction (or, while halted, stands still), returning elapsed
    // T-cycles including any interrupt dispatch serviced at this boundary.
    pub fn next(&mut self, mem: &mut dyn Memory) -> u32 {
        let pending_ei = self.ime_scheduled;
        let cycles = if self.halted || self.stopped {
            4
        } else {
            self.ex(mem)
        };
        if pending_ei {
            self.ime_scheduled = false;
            self.ime = true;
        }
        cycles + self.handle_interrupts(mem)
    }

    fn handle_interrupts(&mut self, mem: &mut dyn Memory) -> u32 {
        let intf = mem.get(0xff0f);
        let inte = mem.get(0xffff);
        let pending = intf & inte & 0x1f;
        if pending == 0x00 {
            return 0;
        }
        // Any pending, enabled interrupt wakes the CPU from HALT regardless of IME.
        self.halted = false;
        self.stopped = false;
        if !self.ime {
            return 0;
        }
        self.ime = false;
        self.ime_scheduled = false;
        let n = pending.trailing_zeros();
        mem.set(0xff0f, intf & !(1 << n));
        self.stack_push(mem, self.reg.pc);
        self.reg.pc = 0x0040 | ((n as u16) << 3);
        20
    }

    #[allow(clippy::cognitive_complexity)]
    fn ex(&mut self, mem: &mut dyn Memory) -> u32 {
        self.branched = false;
        let opcode = self.imm(mem);
        let mut cbcode: u8 = 0;
        match opcode {
            0x00 => {}
            0x01 => {
                let v = self.imm_word(mem);
                self.reg.set_bc(v);
            }
            0x02 => mem.set(self.reg.get_bc(), self.reg.a),
            0x03 => {
                let v = self.reg.get_bc().wrapping_add(1);
                self.reg.set_bc(v);
            }
            0x04 => self.reg.b = self.alu_inc(self.reg.b),
            0x05 => self.reg.b = self.alu_dec(self.reg.b),
            0x06 => self.reg.b = self.imm(mem),
            0x07 => {
                self.reg.a = self.alu_rlc(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            0x08 => {
                let a = self.imm_word(mem);
                mem.set_word(a, self.reg.sp);
            }
            0x09 => self.alu_add_hl(self.reg.get_bc()),
            0x0a => self.reg.a = mem.get(self.reg.get_bc()),
            0x0b => {
                let v = self.reg.get_bc().wrapping_sub(1);
                self.reg.set_bc(v);
            }
            0x0c => self.reg.c = self.alu_inc(self.reg.c),
            0x0d => self.reg.c = self.alu_dec(self.reg.c),
            0x0e => self.reg.c = self.imm(mem),
            0x0f => {
                self.reg.a = self.alu_rrc(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            0x10 => {
                // STOP is architecturally two bytes; the second is always consumed.
                self.reg.pc = self.reg.pc.wrapping_add(1);
                self.stopped = true;
            }
            0x11 => {
                let v = self.imm_word(mem);
                self.reg.set_de(v);
            }
            0x12 => mem.set(self.reg.get_de(), self.reg.a),
            0x13 => {
                let v = self.reg.get_de().wrapping_add(1);
                self.reg.set_de(v);
            }
            0x14 => self.reg.d = self.alu_inc(self.reg.d),
            0x15 => self.reg.d = self.alu_dec(self.reg.d),
            0x16 => self.reg.d = self.imm(mem),
            0x17 => {
                self.reg.a = self.alu_rl(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            0x18 => self.alu_jr(mem),
            0x19 => self.alu_add_hl(self.reg.get_de()),
            0x1a => self.reg.a = mem.get(self.reg.get_de()),
            0x1b => {
                let v = self.reg.get_de().wrapping_sub(1);
                self.reg.set_de(v);
            }
            0x1c => self.reg.e = self.alu_inc(self.reg.e),
            0x1d => self.reg.e = self.alu_dec(self.reg.e),
            0x1e => self.reg.e = self.imm(mem),
            0x1f => {
                self.reg.a = self.alu_rr(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            0x20 => {
                if !self.reg.get_flag(Z) {
                    self.alu_jr(mem);
                    self.branched = true;
                } else {
                    self.reg.pc += 1;
                }
            }
            0x21 => {
                let v = self.imm_word(mem);
                self.reg.set_hl(v);
            }
            0x22 => {
                let a = self.reg.get_hl();
                mem.set(a, self.reg.a);
                self.reg.set_hl(a + 1);
            }
            0x23 => {
                let v = self.reg.get_hl().wrapping_add(1);
                self.reg.set_hl(v);
            }
            0x24 => self.reg.h = self.alu_inc(self.reg.h),
            0x25 => self.reg.h = self.alu_dec(self.reg.h),
            0x26 => self.reg.h = self.imm(mem),
            0x27 => self.alu_daa(),
            0x28 => {
                if self.reg.get_flag(Z) {
                    self.alu_jr(mem);
                    self.branched = true;
                } else {
                    self.reg.pc += 1;
                }
            }
            0x29 => self.alu_add_hl(self.reg.get_hl()),
            0x2a => {
                let v = self.reg.get_hl();
                self.reg.a = mem.get(v);
                self.reg.set_hl(v + 1);
            }
            0x2b => {
                let v = self.reg.get_hl().wrapping_sub(1);
                self.reg.set_hl(v);
            }
            0x2c => self.reg.l = self.alu_inc(self.reg.l),
            0x2d => self.reg.l = self.alu_dec(self.reg.l),
            0x2e => self.reg.l = self.imm(mem),
            0x2f => self.alu_cpl(),
            0x30 => {
                if !self.reg.get_flag(C) {
                    self.alu_jr(mem);
                    self.branched = true;
                } else {
                    self.reg.pc += 1;
                }
            }
            0x31 => self.reg.sp = self.imm_word(mem),
            0x32 => {
                let a = self.reg.get_hl();
                mem.set(a, self.reg.a);
                self.reg.set_hl(a - 1);
            }
            0x33 => {
                let v = self.reg.sp.wrapping_add(1);
                self.reg.sp = v;
            }
            0x34 => {
                let a = self.reg.get_hl();
                let v = mem.get(a);
                mem.set(a, self.alu_inc(v));
            }
            0x35 => {
                let a = self.reg.get_hl();
                let v = mem.get(a);
                mem.set(a, self.alu_dec(v));
            }
            0x36 => {
                let a = self.reg.get_hl();
                let v = self.imm(mem);
                mem.set(a, v);
            }
            0x37 => self.alu_scf(),
            0x38 => {
                if self.reg.get_flag(C) {
                    self.alu_jr(mem);
                    self.branched = true;
                } else {
                    self.reg.pc += 1;
                }
            }
            0x39 => self.alu_add_hl(self.reg.sp),
            0x3a => {
                let v = self.reg.get_hl();
                self.reg.a = mem.get(v);
                self.reg.set_hl(v - 1);
            }
            0x3b => {
                let v = self.reg.sp.wrapping_sub(1);
                self.reg.sp = v;
            }
            0x3c => self.reg.a = self.alu_inc(self.reg.a),
            0x3d => self.reg.a = self.alu_dec(self.reg.a),
            0x3e => self.reg.a = self.imm(mem),
            0x3f => self.alu_ccf(),
            0x40 => {}
            0x41 => self.reg.b = self.reg.c,
            0x42 => self.reg.b = self.reg.d,
            0x43 => self.reg.b = self.reg.e,
            0x44 => self.reg.b = self.reg.h,
            0x45 => self.reg.b = self.reg.l,
            0x46 => self.reg.b = mem.get(self.reg.get_hl()),
            0x47 => self.reg.b = self.reg.a,
            0x48 => self.reg.c = self.reg.b,
            0x49 => {}
            0x4a => self.reg.c = self.reg.d,
            0x4b => self.reg.c = self.reg.e,
            0x4c => self.reg.c = self.reg.h,
            0x4d => self.reg.c = self.reg.l,
            0x4e => self.reg.c = mem.get(self.reg.get_hl()),
            0x4f => self.reg.c = self.reg.a,
            0x50 => self.reg.d = self.reg.b,
            0x51 => self.reg.d = self.reg.c,
            0x52 => {}
            0x53 => self.reg.d = self.reg.e,
            0x54 => self.reg.d = self.reg.h,
            0x55 => self.reg.d = self.reg.l,
            0x56 => self.reg.d = mem.get(self.reg.get_hl()),
            0x57 => self.reg.d = self.reg.a,
            0x58 => self.reg.e = self.reg.b,
            0x59 => self.reg.e = self.reg.c,
            0x5a => self.reg.e = self.reg.d,
            0x5b => {}
            0x5c => self.reg.e = self.reg.h,
            0x5d => self.reg.e = self.reg.l,
            0x5e => self.reg.e = mem.get(self.reg.get_hl()),
            0x5f => self.reg.e = self.reg.a,
            0x60 => self.reg.h = self.reg.b,
            0x61 => self.reg.h = self.reg.c,
            0x62 => self.reg.h = self.reg.d,
            0x63 => self.reg.h = self.reg.e,
            0x64 => {}
            0x65 => self.reg.h = self.reg.l,
            0x66 => self.reg.h = mem.get(self.reg.get_hl()),
            0x67 => self.reg.h = self.reg.a,
            0x68 => self.reg.l = self.reg.b,
            0x69 => self.reg.l = self.reg.c,
            0x6a => self.reg.l = self.reg.d,
            0x6b => self.reg.l = self.reg.e,
            0x6c => self.reg.l = self.reg.h,
            0x6d => {}
            0x6e => self.reg.l = mem.get(self.reg.get_hl()),
            0x6f => self.reg.l = self.reg.a,
            0x70 => mem.set(self.reg.get_hl(), self.reg.b),
            0x71 => mem.set(self.reg.get_hl(), self.reg.c),
            0x72 => mem.set(self.reg.get_hl(), self.reg.d),
            0x73 => mem.set(self.reg.get_hl(), self.reg.e),
            0x74 => mem.set(self.reg.get_hl(), self.reg.h),
            0x75 => mem.set(self.reg.get_hl(), self.reg.l),
            0x76 => self.halted = true,
            0x77 => mem.set(self.reg.get_hl(), self.reg.a),
            0x78 => self.reg.a = self.reg.b,
            0x79 => self.reg.a = self.reg.c,
            0x7a => self.reg.a = self.reg.d,
            0x7b => self.reg.a = self.reg.e,
            0x7c => self.reg.a = self.reg.h,
            0x7d => self.reg.a = self.reg.l,
            0x7e => self.reg.a = mem.get(self.reg.get_hl()),
            0x7f => {}
            0x80 => self.alu_add(self.reg.b),
            0x81 => self.alu_add(self.reg.c),
            0x82 => self.alu_add(self.reg.d),
            0x83 => self.alu_add(self.reg.e),
            0x84 => self.alu_add(self.reg.h),
            0x85 => self.alu_add(self.reg.l),
            0x86 => self.alu_add(mem.get(self.reg.get_hl())),
            0x87 => self.alu_add(self.reg.a),
            0x88 => self.alu_adc(self.reg.b),
            0x89 => self.alu_adc(self.reg.c),
            0x8a => self.alu_adc(self.reg.d),
            0x8b => self.alu_adc(self.reg.e),
            0x8c => self.alu_adc(self.reg.h),
            0x8d => self.alu_adc(self.reg.l),
            0x8e => self.alu_adc(mem.get(self.reg.get_hl())),
            0x8f => self.alu_adc(self.reg.a),
            0x90 => self.alu_sub(self.reg.b),
            0x91 => self.alu_sub(self.reg.c),
            0x92 => self.alu_sub(self.reg.d),
            0x93 => self.alu_sub(self.reg.e),
            0x94 => self.alu_sub(self.reg.h),
            0x95 => self.alu_sub(self.reg.l),
            0x96 => self.alu_sub(mem.get(self.reg.get_hl())),
            0x97 => self.alu_sub(self.reg.a),
            0x98 => self.alu_sbc(self.reg.b),
            0x99 => self.alu_sbc(self.reg.c),
            0x9a => self.alu_sbc(self.reg.d),
            0x9b => self.alu_sbc(self.reg.e),
            0x9c => self.alu_sbc(self.reg.h),
            0x9d => self.alu_sbc(self.reg.l),
            0x9e => self.alu_sbc(mem.get(self.reg.get_hl())),
            0x9f => self.alu_sbc(self.reg.a),
            0xa0 => self.alu_and(self.reg.b),
            0xa1 => self.alu_and(self.reg.c),
            0xa2 => self.alu_and(self.reg.d),
            0xa3 => self.alu_and(self.reg.e),
            0xa4 => self.alu_and(self.reg.h),
            0xa5 => self.alu_and(self.reg.l),
            0xa6 => self.alu_and(mem.get(self.reg.get_hl())),
            0xa7 => self.alu_and(self.reg.a),
            0xa8 => self.alu_xor(self.reg.b),
            0xa9 => self.alu_xor(self.reg.c),
            0xaa => self.alu_xor(self.reg.d),
            0xab => self.alu_xor(self.reg.e),
            0xac => self.alu_xor(self.reg.h),
            0xad => self.alu_xor(self.reg.l),
            0xae => self.alu_xor(mem.get(self.reg.get_hl())),
            0xaf => self.alu_xor(self.reg.a),
            0xb0 => self.alu_or(self.reg.b),
            0xb1 => self.alu_or(self.reg.c),
            0xb2 => self.alu_or(self.reg.d),
            0xb3 => self.alu_or(self.reg.e),
            0xb4 => self.alu_or(self.reg.h),
            0xb5 => self.alu_or(self.reg.l),
            0xb6 => self.alu_or(mem.get(self.reg.get_hl())),
            0xb7 => self.alu_or(self.reg.a),
            0xb8 => self.alu_cp(self.reg.b),
            0xb9 => self.alu_cp(self.reg.c),
            0xba => self.alu_cp(self.reg.d),
            0xbb => self.alu_cp(self.reg.e),
            0xbc => self.alu_cp(self.reg.h),
            0xbd => self.alu_cp(self.reg.l),
            0xbe => self.alu_cp(mem.get(self.reg.get_hl())),
            0xbf => self.alu_cp(self.reg.a),
            0xc0 => {
                if !self.reg.get_flag(Z) {
                    self.reg.pc = self.stack_pop(mem);
                    self.branched = true;
                }
            }
            0xc1 => {
                let v = self.stack_pop(mem);
                self.reg.set_bc(v);
            }
            0xc2 => {
                let pc = self.imm_word(mem);
                if !self.reg.get_flag(Z) {
                    self.reg.pc = pc;
                    self.branched = true;
                }
            }
            0xc3 => self.reg.pc = self.imm_word(mem),
            0xc4 => {
                let pc = self.imm_word(mem);
                if !self.reg.get_flag(Z) {
                    self.stack_push(mem, self.reg.pc);
                    self.reg.pc = pc;
                    self.branched = true;
                }
            }
            0xc5 => self.stack_push(mem, self.reg.get_bc()),
            0xc6 => {
                let v = self.imm(mem);
                self.alu_add(v);
            }
            0xc7 => {
                self.stack_push(mem, self.reg.pc);
                self.reg.pc = 0x00;
            }
            0xc8 => {
                if self.reg.get_flag(Z) {
                    self.reg.pc = self.stack_pop(mem);
                    self.branched = true;
                }
            }
            0xc9 => self.reg.pc = self.stack_pop(mem),
            0xca => {
                let pc = self.imm_word(mem);
                if self.reg.get_flag(Z) {
                    self.reg.pc = pc;
                    self.branched = true;
                }
            }
            0xcb => {
                cbcode = self.imm(mem);
                match cbcode {
                    0x00 => self.reg.b = self.alu_rlc(self.reg.b),
                    0x01 => self.reg.c = self.alu_rlc(self.reg.c),
                    0x02 => self.reg.d = self.alu_rlc(self.reg.d),
                    0x03 => self.reg.e = self.alu_rlc(self.reg.e),
                    0x04 => self.reg.h = self.alu_rlc(self.reg.h),
                    0x05 => self.reg.l = self.alu_rlc(self.reg.l),
                    0x06 => {
                        let a = self.reg.get_hl();
                        let v = mem.get(a);
                        mem.set(a, self.alu_rlc(v));
                    }
                    0x07 => self.reg.a = self.alu_rlc(self.reg.a),
                    0x08 => self.reg.b = self.alu_rrc(self.reg.b),
                    0x09 => self.reg.c = self.alu_rrc(self.reg.c),
                    0x0a => self.reg.d = self.alu_rrc(self.reg.d),
                    0x0b => self.reg.e = self.alu_rrc(self.reg.e),
                    0x0c => self.reg.h = self.alu_rrc(self.reg.h),
                    0x0d => self.reg.l = self.alu_rrc(self.reg.l),
                    0x0e => {
                        let a = self.reg.get_hl();
                        let v = mem.get(a);
                        mem.set(a, self.alu_rrc(v));
                    }
                    0x0f => self.reg.a = self.alu_rrc(self.reg.a),
                    0x10 => self.reg.b = self.alu_rl(self.reg.b),
                    0x11 => self.reg.c = self.alu_rl(self.reg.c),
                    0x12 => self.reg.d = self.alu_rl(self.reg.d),
                    0x13 => self.reg.e = self.alu_rl(self.reg.e),
                    0x14 => self.reg.h = self.alu_rl(self.reg.h),
                    0x15 => self.reg.l = self.alu_rl(self.reg.l),
                    0x16 => {
                        let a = self.reg.get_hl();
                        let v = mem.get(a);
                        mem.set(a, self.alu_rl(v));
                    }
                    0x17 => self.reg.a = self.alu_rl(self.reg.a),
                    0x18 => self.reg.b = self.alu_rr(self.reg.b),
                    0x19 => self.reg.c = self.alu_rr(self.reg.c),
                    0x1a => self.reg.d = self.alu_rr(self.reg.d),
                    0x1b => self.reg.e = self.alu_rr(self.reg.e),
                    0x1c => self.reg.h = self.alu_rr(self.reg.h),
                    0x1d => self.reg.l = self.alu_rr(self.reg.l),
                    0x1e => {
                        let a = self.reg.get_hl();
                        let v = mem.get(a);
                        mem.set(a, self.alu_rr(v));
                    }
                    0x1f => self.reg.a = self.alu_rr(self.reg.a),
                    0x20 => self.reg.b = self.alu_sla(self.reg.b),
                    0x21 => self.reg.c = self.alu_sla(self.reg.c),
                    0x22 => self.reg.d = self.alu_sla(self.reg.d),
                    0x23 => self.reg.e = self.alu_sla(self.reg.e),
                    0x24 => self.reg.h = self.alu_sla(self.reg.h),
                    0x25 => self.reg.l = self.alu_sla(self.reg.l),
                    0x26 => {
                        let a = self.reg.get_hl();
                        let v = mem.get(a);
                        mem.set(a, self.alu_sla(v));
                    }
                    0x27 => self.reg.a = self.alu_sla(self.reg.a),
                    0x28 => self.reg.b = self.alu_sra(self.reg.b),
                    0x29 => self.reg.c = self.alu_sra(self.reg.c),
                    0x2a => self.reg.d = self.alu_sra(self.reg.d),
                    0x2b => self.reg.e = self.alu_sra(self.reg.e),
                    0x2c => self.reg.h = self.alu_sra(self.reg.h),
                    0x2d => self.reg.l = self.alu_sra(self.reg.l),
                    0x2e => {
                        let a = self.reg.get_hl();
                        let v = mem.get(a);
                        mem.set(a, self.alu_sra(v));
                    }
                    0x2f => self.reg.a = self.alu_sra(self.reg.a),
                    0x30 => self.reg.b = self.alu_swap(self.reg.b),
                    0x31 => self.reg.c = self.alu_swap(self.reg.c),
                    0x32 => self.reg.d = self.alu_swap(self.reg.d),
                    0x33 => self.reg.e = self.alu_swap(self.reg.e),
                    0x34 => self.reg.h = self.alu_swap(self.reg.h),
                    0x35 => self.reg.l = self.alu_swap(self.reg.l),
                    0x36 => {
                        let a = self.reg.get_hl();
                        let v = mem.get(a);
                        mem.set(a, self.alu_swap(v));
                    }
                    0x37 => self.reg.a = self.alu_swap(self.reg.a),
                    0x38 => self.reg.b = self.alu_srl(self.reg.b),
                    0x39 => self.reg.c = self.alu_srl(self.reg.c),
                    0x3a => self.reg.d = self.alu_srl(self.reg.d),
                    0x3b => self.reg.e = self.alu_srl(self.reg.e),
                    0x3c => self.reg.h = self.alu_srl(self.reg.h),
                    0x3d => self.reg.l = self.alu_srl(self.reg.l),
                    0x3e => {
                        let a = self.reg.get_hl();
                        let v = mem.get(a);
                        mem.set(a, self.alu_srl(v));
                    }
                    0x3f => self.reg.a = self.alu_srl(self.reg.a),
                    0x40..=0x7f => {
                        let b = (cbcode - 0x40) / 8;
                        let r = (cbcode - 0x40) % 8;
                        let v = self.cb_read_r(mem, r);
                        self.alu_bit(v, b);
                    }
                    0x80..=0xbf => {
                        let b = (cbcode - 0x80) / 8;
                        let r = (cbcode - 0x80) % 8;
                        let v = self.cb_read_r(mem, r);
                        let v = self.alu_res(v, b);
                        self.cb_write_r(mem, r, v);
                    }
                    0xc0..=0xff => {
                        let b = (cbcode - 0xc0) / 8;
                        let r = (cbcode - 0xc0) % 8;
                        let v = self.cb_read_r(mem, r);
                        let v = self.alu_set(v, b);
                        self.cb_write_r(mem, r, v);
                    }
                }
            }
            0xcc => {
                let pc = self.imm_word(mem);
                if self.reg.get_flag(Z) {
                    self.stack_push(mem, self.reg.pc);
                    self.reg.pc = pc;
                    self.branched = true;
                }
            }
            0xcd => {
                let pc = self.imm_word(mem);
                self.stack_push(mem, self.reg.pc);
                self.reg.pc = pc;
            }
            0xce => {
                let v = self.imm(mem);
                self.alu_adc(v);
            }
            0xcf => {
                self.stack_push(mem, self.reg.pc);
                self.reg.pc = 0x08;
            }
            0xd0 => {
                if !self.reg.get_flag(C) {
                    self.reg.pc = self.stack_pop(mem);
                    self.branched = true;
                }
            }
            0xd1 => {
                let v = self.stack_pop(mem);
                self.reg.set_de(v);
            }
            0xd2 => {
                let pc = self.imm_word(mem);
                if !self.reg.get_flag(C) {
                    self.reg.pc = pc;
                    self.branched = true;
                }
            }
            0xd3 => {}
            0xd4 => {
                let pc = self.imm_word(mem);
                if !self.reg.get_flag(C) {
                    self.stack_push(mem, self.reg.pc);
                    self.reg.pc = pc;
                    self.branched = true;
                }
            }
            0xd5 => self.stack_push(mem, self.reg.get_de()),
            0xd6 => {
                let v = self.imm(mem);
                self.alu_sub(v);
            }
            0xd7 => {
                self.stack_push(mem, self.reg.pc);
                self.reg.pc = 0x10;
            }
            0xd8 => {
                if self.reg.get_flag(C) {
                    self.reg.pc = self.stack_pop(mem);
                    self.branched = true;
                }
            }
            0xd9 => {
                // RETI: return and enable interrupts immediately, no EI-style delay.
                self.reg.pc = self.stack_pop(mem);
                self.ime = true;
                self.ime_scheduled = false;
            }
            0xda => {
                let pc = self.imm_word(mem);
                if self.reg.get_flag(C) {
                    self.reg.pc = pc;
                    self.branched = true;
                }
            }
            0xdb => {}
            0xdc => {
                let pc = self.imm_word(mem);
                if self.reg.get_flag(C) {
                    self.stack_push(mem, self.reg.pc);
                    self.reg.pc = pc;
                    self.branched = true;
                }
            }
            0xdd => {}
            0xde => {
                let v = self.imm(mem);
                self.alu_sbc(v);
            }
            0xdf => {
                self.stack_push(mem, self.reg.pc);
                self.reg.pc = 0x18;
            }
            0xe0 => {
                let a = 0xff00 | u16::from(self.imm(mem));
                mem.set(a, self.reg.a);
            }
            0xe1 => {
                let v = self.stack_pop(mem);
                self.reg.set_hl(v);
            }
            0xe2 => mem.set(0xff00 | u16::from(self.reg.c), self.reg.a),
            0xe3 => {}
            0xe4 => {}
            0xe5 => self.stack_push(mem, self.reg.get_hl()),
            0xe6 => {
                let v = self.imm(mem);
                self.alu_and(v);
            }
            0xe7 => {
                self.stack_push(mem, self.reg.pc);
                self.reg.pc = 0x20;
            }
            0xe8 => self.alu_add_sp(mem),
            0xe9 => self.reg.pc = self.reg.get_hl(),
            0xea => {
                let a = self.imm_word(mem);
                mem.set(a, self.reg.a);
            }
            0xeb => {}
            0xec => {}
            0xed => {}
            0xee => {
                let v = self.imm(mem);
                self.alu_xor(v);
            }
            0xef => {
                self.stack_push(mem, self.reg.pc);
                self.reg.pc = 0x28;
            }
            0xf0 => {
                let a = 0xff00 | u16::from(self.imm(mem));
                self.reg.a = mem.get(a);
            }
            0xf1 => {
                let v = self.stack_pop(mem);
                self.reg.set_af(v);
            }
            0xf2 => self.reg.a = mem.get(0xff00 | u16::from(self.reg.c)),
            0xf3 => {
                self.ime = false;
                self.ime_scheduled = false;
            }
            0xf4 => {}
            0xf5 => self.stack_push(mem, self.reg.get_af()),
            0xf6 => {
                let v = self.imm(mem);
                self.alu_or(v);
            }
            0xf7 => {
                self.stack_push(mem, self.reg.pc);
                self.reg.pc = 0x30;
            }
            0xf8 => {
                let a = self.reg.sp;
                let b = i16::from(self.imm(mem) as i8) as u16;
                self.reg.set_flag(C, (a & 0x00ff) + (b & 0x00ff) > 0x00ff);
                self.reg.set_flag(H, (a & 0x000f) + (b & 0x000f) > 0x000f);
                self.reg.set_flag(N, false);
                self.reg.set_flag(Z, false);
                self.reg.set_hl(a.wrapping_add(b));
            }
            0xf9 => self.reg.sp = self.reg.get_hl(),
            0xfa => {
                let a = self.imm_word(mem);
                self.reg.a = mem.get(a);
            }
            0xfb => self.ime_scheduled = true,
            0xfc => {}
            0xfd => {}
            0xfe => {
                let v = self.imm(mem);
                self.alu_cp(v);
            }
            0xff => {
                self.stack_push(mem, self.reg.pc);
                self.reg.pc = 0x38;
            }
        };

        let m_cycles = if opcode == 0xcb {
            CB_CYCLES[cbcode as usize]
        } else {
            let base = OP_CYCLES[opcode as usize];
            let base = if base == 0 { 1 } else { base };
            let extra = if self.branched {
                match opcode {
                    0x20 | 0x28 | 0x30 | 0x38 => 1,
                    0xc2 | 0xca | 0xd2 | 0xda => 1,
                    0xc4 | 0xcc | 0xd4 | 0xdc => 3,
                    0xc0 | 0xc8 | 0xd0 | 0xd8 => 3,
                    _ => 0,
                }
            } else {
                0
            };
            base + extra
        };
        m_cycles * 4
    }

    // `(HL)` is register index 6 in the CB-prefixed register encoding; every other
    // index maps directly to a register half.
    fn cb_read_r(&self, mem: &dyn Memory, r: u8) -> u8 {
        match r {
            0 => self.reg.b,
            1 => self.reg.c,
            2 => self.reg.d,
            3 => self.reg.e,
            4 => self.reg.h,
            5 => self.reg.l,
            6 => mem.get(self.reg.get_hl()),
            7 => self.reg.a,
            _ => unreachable!(),
        }
    }

    fn cb_write_r(&mut self, mem: &mut dyn Memory, r: u8, v: u8) {
        match r {
            0 => self.reg.b = v,
            1 => self.reg.c = v,
            2 => self.reg.d = v,
            3 => self.reg.e = v,
            4 => self.reg.h = v,
            5 => self.reg.l = v,
            6 => mem.set(self.reg.get_hl(), v),
            7 => self.reg.a = v,
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatMem {
        data: [u8; 0x10000],
    }

    impl FlatMem {
        fn new() -> Self {
            Self { data: [0; 0x10000] }
        }
    }

    impl Memory for FlatMem {
        fn get(&self, a: u16) -> u8 {
            self.data[a as usize]
        }
        fn set(&mut self, a: u16, v: u8) {
            self.data[a as usize] = v;
        }
    }

    #[test]
    fn reset_state_matches_dmg_power_up() {
        let cpu = Cpu::power_up();
        assert_eq!(cpu.reg.get_af(), 0x01b0);
        assert_eq!(cpu.reg.pc, 0x0100);
        assert_eq!(cpu.reg.sp, 0xfffe);
    }

    #[test]
    fn add_flags_match_hardware_example() {
        let mut cpu = Cpu::power_up();
        let mut mem = FlatMem::new();
        cpu.reg.a = 0x3a;
        cpu.reg.b = 0xc6;
        mem.set(0x0100, 0x80); // ADD A,B
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.a, 0x00);
        assert!(cpu.reg.get_flag(Z));
        assert!(!cpu.reg.get_flag(N));
        assert!(cpu.reg.get_flag(H));
        assert!(cpu.reg.get_flag(C));
    }

    #[test]
    fn conditional_jr_not_taken_costs_8_t_cycles_and_skips() {
        let mut cpu = Cpu::power_up();
        let mut mem = FlatMem::new();
        cpu.reg.pc = 0xc000;
        cpu.reg.set_flag(Z, true);
        mem.set(0xc000, 0x20); // JR NZ,+5
        mem.set(0xc001, 0x05);
        let t = cpu.next(&mut mem);
        assert_eq!(t, 8);
        assert_eq!(cpu.reg.pc, 0xc002);
    }

    #[test]
    fn conditional_jr_taken_costs_12_t_cycles_and_jumps() {
        let mut cpu = Cpu::power_up();
        let mut mem = FlatMem::new();
        cpu.reg.pc = 0xc000;
        cpu.reg.set_flag(Z, false);
        mem.set(0xc000, 0x20); // JR NZ,+5
        mem.set(0xc001, 0x05);
        let t = cpu.next(&mut mem);
        assert_eq!(t, 12);
        assert_eq!(cpu.reg.pc, 0xc007);
    }

    #[test]
    fn jr_nc_uses_carry_flag_not_zero() {
        // Regression: a naive post-hoc flag check can mistake NC for NZ.
        let mut cpu = Cpu::power_up();
        let mut mem = FlatMem::new();
        cpu.reg.pc = 0xc000;
        cpu.reg.set_flag(Z, true);
        cpu.reg.set_flag(C, false);
        mem.set(0xc000, 0x30); // JR NC,+5
        mem.set(0xc001, 0x05);
        let t = cpu.next(&mut mem);
        assert_eq!(t, 12);
        assert_eq!(cpu.reg.pc, 0xc007);
    }

    #[test]
    fn daa_after_bcd_add() {
        let mut cpu = Cpu::power_up();
        let mut mem = FlatMem::new();
        cpu.reg.a = 0x45;
        cpu.reg.f = 0;
        cpu.alu_add(0x38);
        assert_eq!(cpu.reg.a, 0x7d);
        assert!(!cpu.reg.get_flag(H));
        cpu.alu_daa();
        assert_eq!(cpu.reg.a, 0x83);
        assert!(!cpu.reg.get_flag(Z));
        assert!(!cpu.reg.get_flag(C));
        let _ = &mut mem;
    }

    #[test]
    fn ei_enables_ime_only_after_the_following_instruction() {
        let mut cpu = Cpu::power_up();
        let mut mem = FlatMem::new();
        cpu.reg.pc = 0xc000;
        mem.set(0xc000, 0xfb); // EI
        mem.set(0xc001, 0x00); // NOP
        mem.set(0xc002, 0x00); // NOP
        cpu.next(&mut mem); // executes EI
        assert!(!cpu.ime);
        cpu.next(&mut mem); // executes first NOP, IME becomes true right after
        assert!(cpu.ime);
    }

    #[test]
    fn unused_opcodes_are_treated_as_nops() {
        let mut cpu = Cpu::power_up();
        let mut mem = FlatMem::new();
        cpu.reg.pc = 0xc000;
        mem.set(0xc000, 0xd3);
        let pc_before = cpu.reg.pc;
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.pc, pc_before + 1);
    }

    #[test]
    fn rst_38_vectors_correctly() {
        let mut cpu = Cpu::power_up();
        let mut mem = FlatMem::new();
        cpu.reg.pc = 0xc000;
        cpu.reg.sp = 0xfffe;
        mem.set(0xc000, 0xff); // RST 38h
        cpu.next(&mut mem);
        assert_eq!(cpu.reg.pc, 0x0038);
    }
}
