//! Guest-visible architectural state: general-purpose registers, the PC
//! triple, and the two coprocessors.

pub mod cop0;
pub mod fpu;

pub use cop0::{Cop0, Exception as Cop0Exception, TlbEntry};
pub use fpu::Fpu;

use crustationlogger::*;

/// The 32-GPR file plus the PC triple plus both coprocessors, i.e.
/// everything generated code reads or writes.
pub struct GuestState {
    logger: Logger,

    gpr: [u64; 32],
    pub hi: u64,
    pub lo: u64,

    pub pc: u64,
    pub next_pc: u64,
    pub prev_pc: u64,

    pub cop0: Cop0,
    pub fpu: Fpu,
}

/// Opaque field identifiers used by the IR's `GET_PTR`/`SET_PTR` nodes.
/// These stand in for the host address arithmetic the reference performs
/// directly on the state struct; here they're just indices into a small
/// dispatch table so the IR stays free of `unsafe`.
pub mod field {
    pub const HI: u32 = 0;
    pub const LO: u32 = 1;
    pub const PC: u32 = 2;
    pub const NEXT_PC: u32 = 3;
    pub const PREV_PC: u32 = 4;
    pub const COP0_BASE: u32 = 0x100;
    pub const FPU_BASE: u32 = 0x200;
    pub const FCR31: u32 = 0x300;
}

impl GuestState {
    pub fn new(entry_pc: u64) -> GuestState {
        GuestState {
            logger: Logger::new("CPU", Level::Info),
            gpr: [0; 32],
            hi: 0,
            lo: 0,
            pc: entry_pc,
            next_pc: entry_pc.wrapping_add(4),
            prev_pc: entry_pc,
            cop0: Cop0::new(),
            fpu: Fpu::new(),
        }
    }

    /// Register 0 always reads as zero.
    pub fn gpr_read(&self, index: u8) -> u64 {
        if index == 0 {
            0
        } else {
            self.gpr[index as usize]
        }
    }

    /// Register 0 silently discards writes.
    pub fn gpr_write(&mut self, index: u8, value: u64) {
        if index != 0 {
            dbg!(self.logger, "r{} = {:016x}", index, value);
            self.gpr[index as usize] = value;
        }
    }

    /// Reads a 32-bit FPU view, honoring `status.fr` (see the spec's FR-bit
    /// remapping note): with FR=0 even/odd indices address the low/high
    /// halves of the even-numbered 64-bit register.
    pub fn fpr_read32(&self, index: u8) -> u32 {
        let index = index as usize;
        if self.cop0.fr {
            self.fpu.regs[index] as u32
        } else if index % 2 == 0 {
            self.fpu.regs[index] as u32
        } else {
            (self.fpu.regs[index - 1] >> 32) as u32
        }
    }

    pub fn fpr_write32(&mut self, index: u8, value: u32) {
        let index = index as usize;
        if self.cop0.fr {
            self.fpu.regs[index] = (self.fpu.regs[index] & 0xFFFF_FFFF_0000_0000) | value as u64;
        } else if index % 2 == 0 {
            self.fpu.regs[index] = (self.fpu.regs[index] & 0xFFFF_FFFF_0000_0000) | value as u64;
        } else {
            self.fpu.regs[index - 1] =
                (self.fpu.regs[index - 1] & 0x0000_0000_FFFF_FFFF) | ((value as u64) << 32);
        }
    }

    pub fn fpr_read64(&self, index: u8) -> u64 {
        self.fpu.regs[index as usize]
    }

    pub fn fpr_write64(&mut self, index: u8, value: u64) {
        self.fpu.regs[index as usize] = value;
    }

    /// Resolves a `GET_PTR` field id, as described in [`field`].
    pub fn read_field(&self, id: u32) -> u64 {
        match id {
            field::HI => self.hi,
            field::LO => self.lo,
            field::PC => self.pc,
            field::NEXT_PC => self.next_pc,
            field::PREV_PC => self.prev_pc,
            field::FCR31 => self.fpu.fcr31.to_bits() as u64,
            id if (field::COP0_BASE..field::COP0_BASE + 32).contains(&id) => {
                self.cop0.read_reg(id - field::COP0_BASE)
            }
            id if (field::FPU_BASE..field::FPU_BASE + 32).contains(&id) => {
                self.fpr_read64((id - field::FPU_BASE) as u8)
            }
            _ => unreachable!("unknown guest state field id {id}"),
        }
    }

    /// Resolves a `SET_PTR` field id, as described in [`field`].
    pub fn write_field(&mut self, id: u32, value: u64) {
        match id {
            field::HI => self.hi = value,
            field::LO => self.lo = value,
            field::PC => self.pc = value,
            field::NEXT_PC => self.next_pc = value,
            field::PREV_PC => self.prev_pc = value,
            field::FCR31 => self.fpu.fcr31 = crate::state::fpu::Fcr31::from_bits_masked(value as u32),
            id if (field::COP0_BASE..field::COP0_BASE + 32).contains(&id) => {
                self.cop0.write_reg(id - field::COP0_BASE, value);
            }
            id if (field::FPU_BASE..field::FPU_BASE + 32).contains(&id) => {
                self.fpr_write64((id - field::FPU_BASE) as u8, value);
            }
            _ => unreachable!("unknown guest state field id {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpr_zero_reads_zero_and_ignores_writes() {
        let mut state = GuestState::new(0xBFC0_0000);
        state.gpr_write(0, 0xDEAD_BEEF);
        assert_eq!(state.gpr_read(0), 0);
    }

    #[test]
    fn gpr_write_round_trips() {
        let mut state = GuestState::new(0);
        state.gpr_write(5, 0x1234_5678_9ABC_DEF0);
        assert_eq!(state.gpr_read(5), 0x1234_5678_9ABC_DEF0);
    }

    #[test]
    fn fr0_32bit_view_splits_even_odd() {
        let mut state = GuestState::new(0);
        state.cop0.write_reg(12, 0); // fr = 0
        state.fpu.regs[4] = 0x1111_1111_2222_2222;
        assert_eq!(state.fpr_read32(4), 0x2222_2222);
        assert_eq!(state.fpr_read32(5), 0x1111_1111);
    }
}
