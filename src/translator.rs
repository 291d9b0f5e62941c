//! Top-level pipeline glue: decode -> IR -> optimize -> allocate -> emit ->
//! execute, plus the two caches that let repeat visits to a block skip
//! straight to `execute`.

use crustationlogger::*;

use crate::cache::block_cache::TranslatedBlock;
use crate::cache::{BlockCache, CodeCache};
use crate::config::DynarecConfig;
use crate::decode::{decode, BranchKind, DecodedOp, FpFmt, MemWidth, RegImmOp, ShiftOp};
use crate::emit::{self, GuestBus};
use crate::error::{GuestException, TranslationError};
use crate::ir::{Condition, Constant, Intrinsic, IrContext, IrId, ShiftDirection, ValueType};
use crate::mmu::{self, AccessKind};
use crate::regalloc;
use crate::state::cop0::Exception as Cop0Exception;
use crate::state::{field, GuestState};

/// A guest-visible exception vector. Real hardware picks between several
/// vectors based on `BEV`/TLB-refill-vs-general; this implementation always
/// takes the general vector, which is the common case once the guest has
/// installed its own handler table.
const EXCEPTION_VECTOR: u64 = 0xFFFF_FFFF_8000_0180;

enum PendingExit {
    Unconditional(IrId),
    Conditional { condition: IrId, target_true: IrId, target_false: IrId },
}

/// Owns every stage of the pipeline plus the guest state and bus it
/// operates on. One instance translates and runs an entire guest program.
pub struct Translator<B: GuestBus> {
    logger: Logger,
    config: DynarecConfig,
    ir: IrContext,
    block_cache: BlockCache,
    code_cache: CodeCache,
    pub state: GuestState,
    pub bus: B,
}

impl<B: GuestBus> Translator<B> {
    pub fn new(entry_pc: u64, config: DynarecConfig, bus: B) -> Translator<B> {
        Translator {
            logger: Logger::new("JIT", Level::Info),
            ir: IrContext::new(&config),
            block_cache: BlockCache::new(),
            code_cache: CodeCache::new(config.code_cache_capacity),
            state: GuestState::new(entry_pc),
            bus,
            config,
        }
    }

    /// Unconditionally drops every compiled block. Call after anything that
    /// can invalidate assumptions baked into translated code (a cartridge
    /// swap, a debugger-forced memory patch).
    pub fn flush_code_cache(&mut self) {
        self.code_cache.flush();
        self.block_cache.invalidate_all();
    }

    pub fn flush_block_cache(&mut self) {
        self.block_cache.invalidate_all();
    }

    /// Translates (if not already cached) and runs one block starting at
    /// `guest_pc`, returning the number of guest instructions it accounted
    /// for. A guest exception raised during the block is resolved into CP0
    /// state and the guest's own exception vector; it is not reported to
    /// the caller, matching the architectural behavior it models.
    pub fn translate_and_run(&mut self, guest_pc: u64) -> Result<u64, TranslationError> {
        let paddr = match mmu::resolve(&self.state.cop0, guest_pc, AccessKind::Fetch) {
            Ok(p) => p,
            Err(e) => {
                self.handle_guest_exception(e);
                return Ok(0);
            }
        };

        let block = match self.block_cache.lookup(paddr as u32) {
            Some(b) => b,
            None => {
                let compiled = self.translate_block(guest_pc, paddr)?;
                let (entry, len) = self.code_cache.install(compiled.ops, &mut self.block_cache);
                let block = TranslatedBlock {
                    guest_start_paddr: paddr as u32,
                    guest_size_bytes: compiled.guest_size_bytes,
                    host_entry: entry,
                    host_len: len,
                };
                self.block_cache.install(paddr as u32, block);
                block
            }
        };

        let ops = self.code_cache.slice(block.host_entry, block.host_len).to_vec();
        let instructions = (block.guest_size_bytes / 4) as u64;

        match emit::execute(&ops, &mut self.state, &mut self.bus) {
            Ok(result) => {
                self.state.prev_pc = guest_pc;
                if result.eret {
                    let erl = self.state.cop0.erl;
                    self.state.pc =
                        if erl { self.state.cop0.error_epc() } else { self.state.cop0.epc() };
                    self.state.cop0.leave_exception(erl);
                } else {
                    self.state.pc = result.next_pc;
                }
                Ok(instructions)
            }
            Err(e) => {
                self.handle_guest_exception(e);
                Ok(instructions)
            }
        }
    }

    /// `epc` for a TLB/FP fault is always `prev_pc`, the guest PC of the
    /// last block that ran to completion — not this (faulting) block's own
    /// start. Matches the real N4300i, which stamps these traps with
    /// `N64CPU.prev_pc` rather than the faulting instruction's own address.
    fn handle_guest_exception(&mut self, exception: GuestException) {
        let epc = self.state.prev_pc;
        match exception {
            // The IR's own RaiseException op already called enter_exception;
            // only the vector redirect is left to do.
            GuestException::Cop0(_) => {}
            GuestException::FloatingPoint => {
                warn!(self.logger, "floating point trap at pc {:016x}", epc);
                self.state.cop0.enter_exception(Cop0Exception::FloatingPoint, epc, false, 1);
            }
            GuestException::TlbMiss { bad_vaddr }
            | GuestException::TlbInvalid { bad_vaddr } => {
                self.state.cop0.set_bad_vaddr(bad_vaddr);
                self.state.cop0.set_context_bad_vpn(bad_vaddr);
                self.state.cop0.enter_exception(Cop0Exception::TlbLoad, epc, false, 0);
            }
            GuestException::TlbModified { bad_vaddr } => {
                self.state.cop0.set_bad_vaddr(bad_vaddr);
                self.state.cop0.set_context_bad_vpn(bad_vaddr);
                self.state.cop0.enter_exception(Cop0Exception::TlbModified, epc, false, 0);
            }
        }
        self.state.pc = EXCEPTION_VECTOR;
    }

    fn translate_block(
        &mut self,
        guest_pc: u64,
        start_paddr: u64,
    ) -> Result<CompiledBlock, TranslationError> {
        self.ir.reset();

        let mut pc = guest_pc as u32;
        let mut paddr = start_paddr as u32;
        let mut pending_exit: Option<PendingExit> = None;
        let mut instruction_count: usize = 0;

        loop {
            let word = self.bus.read(ValueType::U32, paddr as u64) as u32;
            let decoded = decode(word);
            let in_delay_slot = pending_exit.is_some();

            let ends_block = self.translate_instruction(pc, decoded, in_delay_slot, &mut pending_exit)?;
            instruction_count += 1;
            pc = pc.wrapping_add(4);
            paddr = paddr.wrapping_add(4);

            // The instruction just translated was itself a delay slot (the
            // branch that staged `pending_exit` ran the iteration before
            // this one) - now that it's in the IR, emit the branch's exit.
            if in_delay_slot {
                let exit = pending_exit.take().expect("delay slot must follow a staged branch");
                match exit {
                    PendingExit::Unconditional(target) => {
                        self.ir.emit_set_block_exit_pc(target)?;
                    }
                    PendingExit::Conditional { condition, target_true, target_false } => {
                        self.ir.emit_conditional_set_block_exit_pc(condition, target_true, target_false)?;
                    }
                }
                break;
            }
            if ends_block {
                break;
            }
            // A branch/jump just staged its exit; loop once more to
            // translate the delay slot before emitting it.
            if pending_exit.is_none() && instruction_count >= self.config.max_block_instructions {
                let next = self.ir.emit_set_constant(Constant::U32(pc), crate::ir::NO_GUEST_REG)?;
                self.ir.emit_set_block_exit_pc(next)?;
                break;
            }
        }

        crate::ir::optimize::run(&mut self.ir)?;
        regalloc::allocate(&mut self.ir);
        let ops = emit::lower(&self.ir)?;

        Ok(CompiledBlock { ops, guest_size_bytes: instruction_count as u32 * 4 })
    }

    /// Translates one instruction. Returns whether the block ends right
    /// here (traps and `eret` have no delay slot); branches/jumps instead
    /// stage their exit in `pending_exit` so the caller can translate the
    /// delay slot first.
    fn translate_instruction(
        &mut self,
        pc: u32,
        decoded: DecodedOp,
        in_delay_slot: bool,
        pending_exit: &mut Option<PendingExit>,
    ) -> Result<bool, TranslationError> {
        let ir = &mut self.ir;

        match decoded {
            DecodedOp::RegOp { op, rd, rs, rt } => {
                let a = ir.emit_load_guest_reg(rs)?;
                let b = ir.emit_load_guest_reg(rt)?;
                translate_reg_alu(ir, op, a, b, rd, pc, in_delay_slot)?;
            }
            DecodedOp::ImmOp { op, rt, rs, imm, zero_extend } => {
                let a = ir.emit_load_guest_reg(rs)?;
                let imm_const = if zero_extend {
                    Constant::U32(imm as u32)
                } else {
                    Constant::S32(imm)
                };
                let b = ir.emit_set_constant(imm_const, crate::ir::NO_GUEST_REG)?;
                translate_reg_alu(ir, op, a, b, rt, pc, in_delay_slot)?;
            }
            DecodedOp::ShiftImm { op, rd, rt, sa } => {
                let operand = ir.emit_load_guest_reg(rt)?;
                let amount = ir.emit_set_constant(Constant::U32(sa as u32), crate::ir::NO_GUEST_REG)?;
                translate_shift(ir, op, operand, amount, rd)?;
            }
            DecodedOp::ShiftReg { op, rd, rt, rs } => {
                let operand = ir.emit_load_guest_reg(rt)?;
                let rs_val = ir.emit_load_guest_reg(rs)?;
                let amount = ir.emit_mask_and_cast(rs_val, ValueType::U32, crate::ir::NO_GUEST_REG)?;
                translate_shift(ir, op, operand, amount, rd)?;
            }
            DecodedOp::Lui { rt, imm } => {
                ir.emit_set_constant(Constant::S32(imm as i32), rt)?;
            }
            DecodedOp::Mult { rs, rt, signed } => {
                let a = ir.emit_load_guest_reg(rs)?;
                let b = ir.emit_load_guest_reg(rt)?;
                let ty = if signed { ValueType::S32 } else { ValueType::U32 };
                let lo = ir.emit_multiply(a, b, ty, false, crate::ir::NO_GUEST_REG)?;
                let hi = ir.emit_multiply(a, b, ty, true, crate::ir::NO_GUEST_REG)?;
                ir.emit_set_ptr(field::LO, ValueType::U64, lo)?;
                ir.emit_set_ptr(field::HI, ValueType::U64, hi)?;
            }
            DecodedOp::Div { rs, rt, signed } => {
                let a = ir.emit_load_guest_reg(rs)?;
                let b = ir.emit_load_guest_reg(rt)?;
                let ty = if signed { ValueType::S32 } else { ValueType::U32 };
                let quotient = ir.emit_divide(a, b, ty, false, crate::ir::NO_GUEST_REG)?;
                let remainder = ir.emit_divide(a, b, ty, true, crate::ir::NO_GUEST_REG)?;
                ir.emit_set_ptr(field::LO, ValueType::U64, quotient)?;
                ir.emit_set_ptr(field::HI, ValueType::U64, remainder)?;
            }
            DecodedOp::Mfhi { rd } => {
                ir.emit_get_ptr(field::HI, ValueType::U64, rd)?;
            }
            DecodedOp::Mflo { rd } => {
                ir.emit_get_ptr(field::LO, ValueType::U64, rd)?;
            }
            DecodedOp::Mthi { rs } => {
                let v = ir.emit_load_guest_reg(rs)?;
                ir.emit_set_ptr(field::HI, ValueType::U64, v)?;
            }
            DecodedOp::Mtlo { rs } => {
                let v = ir.emit_load_guest_reg(rs)?;
                ir.emit_set_ptr(field::LO, ValueType::U64, v)?;
            }
            DecodedOp::Load { width, signed, rt, base, offset } => {
                let address = effective_address(ir, base, offset)?;
                let paddr = ir.emit_tlb_lookup(address, AccessKind::Load, crate::ir::NO_GUEST_REG)?;
                let ty = mem_value_type(width, signed);
                ir.emit_load(ty, paddr, rt)?;
            }
            DecodedOp::Store { width, rt, base, offset } => {
                let address = effective_address(ir, base, offset)?;
                let paddr = ir.emit_tlb_lookup(address, AccessKind::Store, crate::ir::NO_GUEST_REG)?;
                let value = ir.emit_load_guest_reg(rt)?;
                let ty = mem_value_type(width, false);
                ir.emit_store(ty, paddr, value)?;
            }
            DecodedOp::Branch { kind, rs, rt, offset, likely: _, link } => {
                let condition = branch_condition(ir, kind, rs, rt)?;
                let target = pc.wrapping_add(4).wrapping_add(offset as u32);
                let fallthrough = pc.wrapping_add(8);
                if link {
                    ir.emit_set_constant(Constant::U32(fallthrough), 31)?;
                }
                let target_id = ir.emit_set_constant(Constant::U32(target), crate::ir::NO_GUEST_REG)?;
                let fallthrough_id =
                    ir.emit_set_constant(Constant::U32(fallthrough), crate::ir::NO_GUEST_REG)?;
                *pending_exit = Some(PendingExit::Conditional {
                    condition,
                    target_true: target_id,
                    target_false: fallthrough_id,
                });
            }
            DecodedOp::BranchFp { on_true, likely: _, offset } => {
                let bits = ir.emit_get_ptr(field::FCR31, ValueType::U32, crate::ir::NO_GUEST_REG)?;
                let shift_amount =
                    ir.emit_set_constant(Constant::U32(23), crate::ir::NO_GUEST_REG)?;
                let shifted =
                    ir.emit_shift(bits, shift_amount, ValueType::U32, ShiftDirection::Right, crate::ir::NO_GUEST_REG)?;
                let one = ir.emit_set_constant(Constant::U32(1), crate::ir::NO_GUEST_REG)?;
                let compare_bit = ir.emit_and(shifted, one, crate::ir::NO_GUEST_REG)?;
                let zero = ir.emit_set_constant(Constant::U32(0), crate::ir::NO_GUEST_REG)?;
                let cond_kind = if on_true { Condition::Ne } else { Condition::Eq };
                let condition = ir.emit_check_condition(cond_kind, compare_bit, zero, crate::ir::NO_GUEST_REG)?;
                let target = pc.wrapping_add(4).wrapping_add(offset as u32);
                let fallthrough = pc.wrapping_add(8);
                let target_id = ir.emit_set_constant(Constant::U32(target), crate::ir::NO_GUEST_REG)?;
                let fallthrough_id =
                    ir.emit_set_constant(Constant::U32(fallthrough), crate::ir::NO_GUEST_REG)?;
                *pending_exit = Some(PendingExit::Conditional {
                    condition,
                    target_true: target_id,
                    target_false: fallthrough_id,
                });
            }
            DecodedOp::Jump { target, link } => {
                let pc_region = pc & 0xF000_0000;
                let absolute = pc_region | (target << 2);
                if link {
                    ir.emit_set_constant(Constant::U32(pc.wrapping_add(8)), 31)?;
                }
                let target_id = ir.emit_set_constant(Constant::U32(absolute), crate::ir::NO_GUEST_REG)?;
                *pending_exit = Some(PendingExit::Unconditional(target_id));
            }
            DecodedOp::JumpReg { rs, rd, link } => {
                let target_id = ir.emit_load_guest_reg(rs)?;
                if link {
                    ir.emit_set_constant(Constant::U32(pc.wrapping_add(8)), rd)?;
                }
                *pending_exit = Some(PendingExit::Unconditional(target_id));
            }
            DecodedOp::Syscall => {
                ir.emit_raise_exception(Cop0Exception::Syscall, pc, in_delay_slot, 0)?;
                return Ok(true);
            }
            DecodedOp::Break => {
                ir.emit_raise_exception(Cop0Exception::Breakpoint, pc, in_delay_slot, 0)?;
                return Ok(true);
            }
            DecodedOp::Cache => {
                ir.emit_nop()?;
            }
            DecodedOp::Eret => {
                ir.emit_eret()?;
                return Ok(true);
            }
            DecodedOp::Mtc0 { rt, rd } => {
                let v = ir.emit_load_guest_reg(rt)?;
                let masked = ir.emit_mask_and_cast(v, ValueType::U32, crate::ir::NO_GUEST_REG)?;
                ir.emit_set_ptr(field::COP0_BASE + rd as u32, ValueType::U32, masked)?;
            }
            DecodedOp::Mfc0 { rt, rd } => {
                let raw = ir.emit_get_ptr(field::COP0_BASE + rd as u32, ValueType::U64, crate::ir::NO_GUEST_REG)?;
                ir.emit_mask_and_cast(raw, ValueType::S32, rt)?;
            }
            DecodedOp::Dmtc0 { rt, rd } => {
                let v = ir.emit_load_guest_reg(rt)?;
                ir.emit_set_ptr(field::COP0_BASE + rd as u32, ValueType::U64, v)?;
            }
            DecodedOp::Dmfc0 { rt, rd } => {
                ir.emit_get_ptr(field::COP0_BASE + rd as u32, ValueType::U64, rt)?;
            }
            DecodedOp::TlbWrite { random } => {
                ir.emit_call_intrinsic(Intrinsic::TlbWrite { random }, Vec::new(), crate::ir::NO_GUEST_REG)?;
            }
            DecodedOp::TlbProbe => {
                ir.emit_call_intrinsic(Intrinsic::TlbProbe, Vec::new(), crate::ir::NO_GUEST_REG)?;
            }
            DecodedOp::TlbRead => {
                ir.emit_call_intrinsic(Intrinsic::TlbRead, Vec::new(), crate::ir::NO_GUEST_REG)?;
            }
            DecodedOp::Mtc1 { rt, fs } => {
                let v = ir.emit_load_guest_reg(rt)?;
                write_fpr(ir, fs, FpFmt::Single, v)?;
            }
            DecodedOp::Mfc1 { rt, fs } => {
                let v = read_fpr(ir, fs, FpFmt::Single)?;
                let sign_extended = ir.emit_mask_and_cast(v, ValueType::S32, crate::ir::NO_GUEST_REG)?;
                ir.emit_mask_and_cast(sign_extended, ValueType::U64, rt)?;
            }
            DecodedOp::Dmtc1 { rt, fs } => {
                let v = ir.emit_load_guest_reg(rt)?;
                write_fpr(ir, fs, FpFmt::Double, v)?;
            }
            DecodedOp::Dmfc1 { rt, fs } => {
                let v = read_fpr(ir, fs, FpFmt::Double)?;
                ir.emit_mask_and_cast(v, ValueType::U64, rt)?;
            }
            DecodedOp::Cfc1 { rt, fs: _ } => {
                let raw = ir.emit_get_ptr(field::FCR31, ValueType::U32, crate::ir::NO_GUEST_REG)?;
                ir.emit_mask_and_cast(raw, ValueType::U64, rt)?;
            }
            DecodedOp::Ctc1 { rt, fs: _ } => {
                let v = ir.emit_load_guest_reg(rt)?;
                let masked = ir.emit_mask_and_cast(v, ValueType::U32, crate::ir::NO_GUEST_REG)?;
                ir.emit_set_ptr(field::FCR31, ValueType::U32, masked)?;
            }
            DecodedOp::FpBin { op, fmt, fd, fs, ft } => {
                let a = read_fpr(ir, fs, fmt)?;
                let b = read_fpr(ir, ft, fmt)?;
                let result =
                    ir.emit_call_intrinsic(Intrinsic::FpBinary { op, fmt }, vec![a, b], crate::ir::NO_GUEST_REG)?;
                write_fpr(ir, fd, fmt, result)?;
            }
            DecodedOp::FpCompare { fmt, predicate, fs, ft } => {
                let a = read_fpr(ir, fs, fmt)?;
                let b = read_fpr(ir, ft, fmt)?;
                ir.emit_call_intrinsic(
                    Intrinsic::FpCompare { fmt, predicate },
                    vec![a, b],
                    crate::ir::NO_GUEST_REG,
                )?;
            }
            DecodedOp::FpConvert { from, to, fd, fs } => {
                let a = read_fpr(ir, fs, from)?;
                let result =
                    ir.emit_call_intrinsic(Intrinsic::FpConvert { from, to }, vec![a], crate::ir::NO_GUEST_REG)?;
                write_fpr(ir, fd, to, result)?;
            }
            DecodedOp::Cop2Unusable => {
                ir.emit_raise_exception(Cop0Exception::CoprocessorUnusable, pc, in_delay_slot, 2)?;
                return Ok(true);
            }
            DecodedOp::Reserved { .. } => {
                ir.emit_raise_exception(Cop0Exception::ReservedInstruction, pc, in_delay_slot, 0)?;
                return Ok(true);
            }
        }

        Ok(false)
    }
}

struct CompiledBlock {
    ops: Vec<emit::HostOp>,
    guest_size_bytes: u32,
}

fn translate_reg_alu(
    ir: &mut IrContext,
    op: RegImmOp,
    a: IrId,
    b: IrId,
    dst: u8,
    pc: u32,
    in_delay_slot: bool,
) -> Result<(), TranslationError> {
    match op {
        RegImmOp::Add => {
            let raw = ir.emit_add(a, b, crate::ir::NO_GUEST_REG)?;
            let result = ir.emit_mask_and_cast(raw, ValueType::S32, dst)?;
            emit_overflow_trap(ir, a, b, result, ValueType::S32, false, pc, in_delay_slot)?;
        }
        RegImmOp::Addu => {
            let raw = ir.emit_add(a, b, crate::ir::NO_GUEST_REG)?;
            ir.emit_mask_and_cast(raw, ValueType::S32, dst)?;
        }
        RegImmOp::Sub => {
            let raw = ir.emit_sub(a, b, crate::ir::NO_GUEST_REG)?;
            let result = ir.emit_mask_and_cast(raw, ValueType::S32, dst)?;
            emit_overflow_trap(ir, a, b, result, ValueType::S32, true, pc, in_delay_slot)?;
        }
        RegImmOp::Subu => {
            let raw = ir.emit_sub(a, b, crate::ir::NO_GUEST_REG)?;
            ir.emit_mask_and_cast(raw, ValueType::S32, dst)?;
        }
        RegImmOp::Dadd => {
            let raw = ir.emit_add(a, b, dst)?;
            emit_overflow_trap(ir, a, b, raw, ValueType::S64, false, pc, in_delay_slot)?;
        }
        RegImmOp::Daddu => {
            ir.emit_add(a, b, dst)?;
        }
        RegImmOp::Dsub => {
            let raw = ir.emit_sub(a, b, dst)?;
            emit_overflow_trap(ir, a, b, raw, ValueType::S64, true, pc, in_delay_slot)?;
        }
        RegImmOp::Dsubu => {
            ir.emit_sub(a, b, dst)?;
        }
        RegImmOp::And => {
            ir.emit_and(a, b, dst)?;
        }
        RegImmOp::Or => {
            ir.emit_or(a, b, dst)?;
        }
        RegImmOp::Xor => {
            ir.emit_xor(a, b, dst)?;
        }
        RegImmOp::Nor => {
            let or = ir.emit_or(a, b, crate::ir::NO_GUEST_REG)?;
            ir.emit_not(or, dst)?;
        }
        RegImmOp::Slt => {
            ir.emit_check_condition(Condition::LtS, a, b, dst)?;
        }
        RegImmOp::Sltu => {
            ir.emit_check_condition(Condition::LtU, a, b, dst)?;
        }
    }
    Ok(())
}

/// Emits the standard XOR-of-operands-and-result signed-overflow test for an
/// add or subtract at the given width, trapping into `Overflow` when it
/// fires. `ty` must be `S32` for ADD/SUB/ADDI (checked against the 32-bit
/// result the caller already masked into) or `S64` for DADD/DSUB (checked
/// against the untruncated 64-bit result).
///
/// Addition overflows iff `(a ^ result) & (b ^ result)` is negative;
/// subtraction overflows iff `(a ^ b) & (a ^ result)` is negative. Masking
/// the operands to `ty` before the XORs keeps the sign bit at the right
/// position when `ty` is narrower than the 64-bit storage width.
fn emit_overflow_trap(
    ir: &mut IrContext,
    a: IrId,
    b: IrId,
    result: IrId,
    ty: ValueType,
    is_sub: bool,
    pc: u32,
    in_delay_slot: bool,
) -> Result<(), TranslationError> {
    let (a, b, result) = if ty.bits() < 64 {
        (
            ir.emit_mask_and_cast(a, ty, crate::ir::NO_GUEST_REG)?,
            ir.emit_mask_and_cast(b, ty, crate::ir::NO_GUEST_REG)?,
            ir.emit_mask_and_cast(result, ty, crate::ir::NO_GUEST_REG)?,
        )
    } else {
        (a, b, result)
    };
    let lhs_changed = if is_sub {
        ir.emit_xor(a, b, crate::ir::NO_GUEST_REG)?
    } else {
        ir.emit_xor(b, result, crate::ir::NO_GUEST_REG)?
    };
    let rhs_changed = ir.emit_xor(a, result, crate::ir::NO_GUEST_REG)?;
    let overflow_bits = ir.emit_and(lhs_changed, rhs_changed, crate::ir::NO_GUEST_REG)?;
    let zero = ir.emit_set_constant(Constant::S32(0), crate::ir::NO_GUEST_REG)?;
    let overflowed = ir.emit_check_condition(Condition::LtS, overflow_bits, zero, crate::ir::NO_GUEST_REG)?;
    ir.emit_conditional_raise_exception(overflowed, Cop0Exception::Overflow, pc, in_delay_slot, 0)?;
    Ok(())
}

fn translate_shift(
    ir: &mut IrContext,
    op: ShiftOp,
    operand: IrId,
    amount: IrId,
    dst: u8,
) -> Result<(), TranslationError> {
    let (ty, direction) = match op {
        ShiftOp::Sll => (ValueType::U32, ShiftDirection::Left),
        ShiftOp::Srl => (ValueType::U32, ShiftDirection::Right),
        ShiftOp::Sra => (ValueType::S32, ShiftDirection::Right),
    };
    let shifted = ir.emit_shift(operand, amount, ty, direction, crate::ir::NO_GUEST_REG)?;
    ir.emit_mask_and_cast(shifted, ValueType::S32, dst)?;
    Ok(())
}

fn mem_value_type(width: MemWidth, signed: bool) -> ValueType {
    match (width, signed) {
        (MemWidth::Byte, true) => ValueType::S8,
        (MemWidth::Byte, false) => ValueType::U8,
        (MemWidth::Half, true) => ValueType::S16,
        (MemWidth::Half, false) => ValueType::U16,
        (MemWidth::Word, true) => ValueType::S32,
        (MemWidth::Word, false) => ValueType::U32,
        (MemWidth::Doubleword, _) => ValueType::U64,
    }
}

fn effective_address(ir: &mut IrContext, base: u8, offset: i32) -> Result<IrId, TranslationError> {
    let base_val = ir.emit_load_guest_reg(base)?;
    let offset_const = ir.emit_set_constant(Constant::S32(offset), crate::ir::NO_GUEST_REG)?;
    ir.emit_add(base_val, offset_const, crate::ir::NO_GUEST_REG)
}

fn branch_condition(
    ir: &mut IrContext,
    kind: BranchKind,
    rs: u8,
    rt: u8,
) -> Result<IrId, TranslationError> {
    let a = ir.emit_load_guest_reg(rs)?;
    match kind {
        BranchKind::Eq => {
            let b = ir.emit_load_guest_reg(rt)?;
            ir.emit_check_condition(Condition::Eq, a, b, crate::ir::NO_GUEST_REG)
        }
        BranchKind::Ne => {
            let b = ir.emit_load_guest_reg(rt)?;
            ir.emit_check_condition(Condition::Ne, a, b, crate::ir::NO_GUEST_REG)
        }
        BranchKind::LeZero => {
            let zero = ir.emit_load_guest_reg(0)?;
            ir.emit_check_condition(Condition::LeS, a, zero, crate::ir::NO_GUEST_REG)
        }
        BranchKind::GtZero => {
            let zero = ir.emit_load_guest_reg(0)?;
            ir.emit_check_condition(Condition::GtS, a, zero, crate::ir::NO_GUEST_REG)
        }
        BranchKind::LtZero => {
            let zero = ir.emit_load_guest_reg(0)?;
            ir.emit_check_condition(Condition::LtS, a, zero, crate::ir::NO_GUEST_REG)
        }
        BranchKind::GeZero => {
            let zero = ir.emit_load_guest_reg(0)?;
            ir.emit_check_condition(Condition::GeS, a, zero, crate::ir::NO_GUEST_REG)
        }
    }
}

/// Reads an FPU data register at the given format's width. Values are
/// always stored flat; this does not replicate the `FR=0` 32-bit
/// even/odd-half remapping that [`GuestState::fpr_read32`] applies to
/// direct interpreter access, only a 64-bit-slot zero-extended view.
fn read_fpr(ir: &mut IrContext, index: u8, fmt: FpFmt) -> Result<IrId, TranslationError> {
    let raw = ir.emit_get_ptr(field::FPU_BASE + index as u32, ValueType::U64, crate::ir::NO_GUEST_REG)?;
    match fmt {
        FpFmt::Single | FpFmt::Word => ir.emit_mask_and_cast(raw, ValueType::U32, crate::ir::NO_GUEST_REG),
        FpFmt::Double | FpFmt::Long => Ok(raw),
    }
}

fn write_fpr(ir: &mut IrContext, index: u8, fmt: FpFmt, value: IrId) -> Result<IrId, TranslationError> {
    let widened = match fmt {
        FpFmt::Single | FpFmt::Word => ir.emit_mask_and_cast(value, ValueType::U32, crate::ir::NO_GUEST_REG)?,
        FpFmt::Double | FpFmt::Long => value,
    };
    ir.emit_set_ptr(field::FPU_BASE + index as u32, ValueType::U64, widened)
}
