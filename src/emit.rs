//! Host code emission (C10).
//!
//! The target host ISA is intentionally abstract: rather than emitting real
//! machine code, each live IR node lowers to one [`HostOp`], and a compiled
//! block is just `Vec<HostOp>` executed by [`execute`], a tight dispatch
//! loop closing over the guest state and the memory bus. This keeps the
//! translator fully portable while still exercising every stage a code
//! generator would: operand resolution, register/spill slot placement, and
//! a linear instruction stream the block cache can store and replay.

use crate::error::{GuestException, TranslationError};
use crate::ir::{Condition, Constant, Intrinsic, IrContext, IrId, IrKind, ShiftDirection, ValueType};
use crate::mmu::AccessKind;
use crate::state::cop0::Exception as Cop0Exception;
use crate::state::GuestState;

/// Where one operand or destination lives at execution time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HostSlot {
    Reg(u8),
    Spill(u32),
    Imm(u64),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BinOpKind {
    Or,
    And,
    Xor,
    Add,
    Sub,
}

/// The threaded-code host's instruction set. One block is `Vec<HostOp>`;
/// [`execute`] interprets it linearly, stopping at the first terminator
/// (`SetExitPc`, `SetCondExitPc`, `CondExit` taken, or `Eret`).
#[derive(Clone, Debug)]
pub enum HostOp {
    Move { dst: HostSlot, src: HostSlot },
    BinOp { dst: HostSlot, op: BinOpKind, lhs: HostSlot, rhs: HostSlot },
    Not { dst: HostSlot, src: HostSlot },
    Shift { dst: HostSlot, operand: HostSlot, amount: HostSlot, ty: ValueType, direction: ShiftDirection },
    Load { dst: HostSlot, ty: ValueType, address: HostSlot },
    Store { ty: ValueType, address: HostSlot, value: HostSlot },
    GetField { dst: HostSlot, field: u32 },
    SetField { field: u32, value: HostSlot },
    MaskAndCast { dst: HostSlot, src: HostSlot, ty: ValueType },
    CheckCondition { dst: HostSlot, condition: Condition, a: HostSlot, b: HostSlot },
    SetExitPc { value: HostSlot },
    SetCondExitPc { condition: HostSlot, pc_if_true: HostSlot, pc_if_false: HostSlot },
    CondExit { condition: HostSlot, flush_list: Vec<(u8, HostSlot)> },
    TlbLookup { dst: HostSlot, address: HostSlot, access: AccessKind },
    LoadGuestReg { dst: HostSlot, guest_reg: u8 },
    FlushGuestReg { guest_reg: u8, value: HostSlot },
    Multiply { dst: HostSlot, a: HostSlot, b: HostSlot, ty: ValueType, high: bool },
    Divide { dst: HostSlot, a: HostSlot, b: HostSlot, ty: ValueType, remainder: bool },
    Eret,
    CallIntrinsic { dst: HostSlot, intrinsic: Intrinsic, args: Vec<HostSlot> },
    RaiseException { exception: Cop0Exception, pc: u32, is_delay_slot: bool, cop_number: u64 },
    CondRaiseException {
        condition: HostSlot,
        exception: Cop0Exception,
        pc: u32,
        is_delay_slot: bool,
        cop_number: u64,
    },
    Nop,
}

/// The seam generated code crosses to touch guest-visible memory. Kept
/// separate from [`GuestState`] since the bus (RDRAM, cartridge ROM,
/// memory-mapped peripherals) is owned by whatever embeds this crate.
pub trait GuestBus {
    fn read(&mut self, ty: ValueType, paddr: u64) -> u64;
    fn write(&mut self, ty: ValueType, paddr: u64, value: u64);
}

fn resolve(ctx: &IrContext, id: IrId) -> HostSlot {
    let node = ctx.node(id);
    if let IrKind::SetConstant(c) = node.kind {
        return HostSlot::Imm(c.as_u64());
    }
    if let Some(reg) = node.alloc.host_reg {
        HostSlot::Reg(reg)
    } else {
        HostSlot::Spill(node.alloc.spill_slot)
    }
}

/// Lowers every live node of a finished block (already optimized and
/// allocated) into its host op. Dead nodes and bare constants contribute no
/// op: constants are re-materialized as `HostSlot::Imm` at each use site.
pub fn lower(ctx: &IrContext) -> Result<Vec<HostOp>, TranslationError> {
    let mut ops = Vec::new();

    for id in ctx.iter_ids() {
        let node = ctx.node(id);
        if node.dead_code {
            continue;
        }
        if matches!(node.kind, IrKind::SetConstant(_)) {
            continue;
        }

        let op = match &node.kind {
            IrKind::Nop => HostOp::Nop,
            IrKind::SetConstant(_) => unreachable!(),
            IrKind::Or(a, b) => bin_op(ctx, id, BinOpKind::Or, *a, *b),
            IrKind::And(a, b) => bin_op(ctx, id, BinOpKind::And, *a, *b),
            IrKind::Xor(a, b) => bin_op(ctx, id, BinOpKind::Xor, *a, *b),
            IrKind::Add(a, b) => bin_op(ctx, id, BinOpKind::Add, *a, *b),
            IrKind::Sub(a, b) => bin_op(ctx, id, BinOpKind::Sub, *a, *b),
            IrKind::Not(a) => HostOp::Not { dst: resolve(ctx, id), src: resolve(ctx, *a) },
            IrKind::Shift { operand, amount, ty, direction } => HostOp::Shift {
                dst: resolve(ctx, id),
                operand: resolve(ctx, *operand),
                amount: resolve(ctx, *amount),
                ty: *ty,
                direction: *direction,
            },
            IrKind::Store { ty, address, value } => HostOp::Store {
                ty: *ty,
                address: resolve(ctx, *address),
                value: resolve(ctx, *value),
            },
            IrKind::Load { ty, address } => {
                HostOp::Load { dst: resolve(ctx, id), ty: *ty, address: resolve(ctx, *address) }
            }
            IrKind::GetPtr { offset, .. } => HostOp::GetField { dst: resolve(ctx, id), field: *offset },
            IrKind::SetPtr { offset, value, .. } => {
                HostOp::SetField { field: *offset, value: resolve(ctx, *value) }
            }
            IrKind::MaskAndCast { operand, ty } => {
                HostOp::MaskAndCast { dst: resolve(ctx, id), src: resolve(ctx, *operand), ty: *ty }
            }
            IrKind::CheckCondition { condition, a, b } => HostOp::CheckCondition {
                dst: resolve(ctx, id),
                condition: *condition,
                a: resolve(ctx, *a),
                b: resolve(ctx, *b),
            },
            IrKind::SetBlockExitPc(a) => HostOp::SetExitPc { value: resolve(ctx, *a) },
            IrKind::SetCondBlockExitPc { condition, pc_if_true, pc_if_false } => HostOp::SetCondExitPc {
                condition: resolve(ctx, *condition),
                pc_if_true: resolve(ctx, *pc_if_true),
                pc_if_false: resolve(ctx, *pc_if_false),
            },
            IrKind::CondBlockExit { condition, flush_list } => HostOp::CondExit {
                condition: resolve(ctx, *condition),
                flush_list: flush_list.iter().map(|&(r, v)| (r, resolve(ctx, v))).collect(),
            },
            IrKind::TlbLookup { address, access } => {
                HostOp::TlbLookup { dst: resolve(ctx, id), address: resolve(ctx, *address), access: *access }
            }
            IrKind::LoadGuestReg(r) => HostOp::LoadGuestReg { dst: resolve(ctx, id), guest_reg: *r },
            IrKind::FlushGuestReg { guest_reg, value } => {
                HostOp::FlushGuestReg { guest_reg: *guest_reg, value: resolve(ctx, *value) }
            }
            IrKind::Multiply { a, b, ty, high } => HostOp::Multiply {
                dst: resolve(ctx, id),
                a: resolve(ctx, *a),
                b: resolve(ctx, *b),
                ty: *ty,
                high: *high,
            },
            IrKind::Divide { a, b, ty, remainder } => HostOp::Divide {
                dst: resolve(ctx, id),
                a: resolve(ctx, *a),
                b: resolve(ctx, *b),
                ty: *ty,
                remainder: *remainder,
            },
            IrKind::Eret => HostOp::Eret,
            IrKind::CallIntrinsic { intrinsic, args } => HostOp::CallIntrinsic {
                dst: resolve(ctx, id),
                intrinsic: *intrinsic,
                args: args.iter().map(|&a| resolve(ctx, a)).collect(),
            },
            IrKind::RaiseException { exception, pc, is_delay_slot, cop_number } => {
                HostOp::RaiseException {
                    exception: *exception,
                    pc: *pc,
                    is_delay_slot: *is_delay_slot,
                    cop_number: *cop_number,
                }
            }
            IrKind::CondRaiseException { condition, exception, pc, is_delay_slot, cop_number } => {
                HostOp::CondRaiseException {
                    condition: resolve(ctx, *condition),
                    exception: *exception,
                    pc: *pc,
                    is_delay_slot: *is_delay_slot,
                    cop_number: *cop_number,
                }
            }
        };
        ops.push(op);
    }

    Ok(ops)
}

/// Per-execution scratch: the host register file plus a spill area, both
/// sized generously and grown on demand rather than pre-sized from the
/// allocator's spill count.
struct Scratch {
    regs: [u64; 32],
    spill: Vec<u64>,
}

impl Scratch {
    fn new() -> Scratch {
        Scratch { regs: [0; 32], spill: Vec::new() }
    }

    fn read(&self, slot: HostSlot) -> u64 {
        match slot {
            HostSlot::Reg(r) => self.regs[r as usize],
            HostSlot::Spill(s) => self.spill.get(s as usize).copied().unwrap_or(0),
            HostSlot::Imm(v) => v,
        }
    }

    fn write(&mut self, slot: HostSlot, value: u64) {
        match slot {
            HostSlot::Reg(r) => self.regs[r as usize] = value,
            HostSlot::Spill(s) => {
                if s as usize >= self.spill.len() {
                    self.spill.resize(s as usize + 1, 0);
                }
                self.spill[s as usize] = value;
            }
            HostSlot::Imm(_) => unreachable!("imm is never a write target"),
        }
    }
}

fn truncate(ty: ValueType, value: u64) -> u64 {
    match ty {
        ValueType::U8 => value as u8 as u64,
        ValueType::S8 => value as u8 as i8 as i64 as u64,
        ValueType::U16 => value as u16 as u64,
        ValueType::S16 => value as u16 as i16 as i64 as u64,
        ValueType::U32 => value as u32 as u64,
        ValueType::S32 => value as u32 as i32 as i64 as u64,
        ValueType::U64 | ValueType::S64 => value,
    }
}

fn eval_condition(condition: Condition, a: u64, b: u64) -> bool {
    match condition {
        Condition::Eq => a == b,
        Condition::Ne => a != b,
        Condition::LtS => (a as i64) < (b as i64),
        Condition::LtU => a < b,
        Condition::GtS => (a as i64) > (b as i64),
        Condition::GtU => a > b,
        Condition::LeS => (a as i64) <= (b as i64),
        Condition::LeU => a <= b,
        Condition::GeS => (a as i64) >= (b as i64),
        Condition::GeU => a >= b,
    }
}

/// Outcome of running one block's compiled ops to completion.
pub struct ExecResult {
    pub next_pc: u64,
    pub eret: bool,
}

/// Interprets `ops` against `state`/`bus`, stopping at the block's
/// terminator. Any raised [`GuestException`] aborts the block immediately;
/// register flushes already performed by earlier ops remain committed,
/// matching the reference's "flush before trap site" ordering.
pub fn execute(
    ops: &[HostOp],
    state: &mut GuestState,
    bus: &mut dyn GuestBus,
) -> Result<ExecResult, GuestException> {
    let mut s = Scratch::new();

    for op in ops {
        match op {
            HostOp::Nop => {}
            HostOp::Move { dst, src } => s.write(*dst, s.read(*src)),
            HostOp::BinOp { dst, op, lhs, rhs } => {
                let (a, b) = (s.read(*lhs), s.read(*rhs));
                let v = match op {
                    BinOpKind::Or => a | b,
                    BinOpKind::And => a & b,
                    BinOpKind::Xor => a ^ b,
                    BinOpKind::Add => a.wrapping_add(b),
                    BinOpKind::Sub => a.wrapping_sub(b),
                };
                s.write(*dst, v);
            }
            HostOp::Not { dst, src } => s.write(*dst, !s.read(*src)),
            HostOp::Shift { dst, operand, amount, ty, direction } => {
                let operand = s.read(*operand);
                let amount = (s.read(*amount) & 63) as u32;
                let bits = ty.bits();
                let v = match direction {
                    ShiftDirection::Left => truncate(*ty, operand.wrapping_shl(amount)),
                    ShiftDirection::Right if ty.is_signed() => {
                        let signed = sign_extend(truncate(*ty, operand), bits);
                        truncate(*ty, (signed >> amount.min(63)) as u64)
                    }
                    ShiftDirection::Right => {
                        truncate(*ty, truncate(*ty, operand).wrapping_shr(amount.min(bits - 1)))
                    }
                };
                s.write(*dst, v);
            }
            HostOp::Load { dst, ty, address } => {
                let v = bus.read(*ty, s.read(*address));
                s.write(*dst, v);
            }
            HostOp::Store { ty, address, value } => {
                bus.write(*ty, s.read(*address), s.read(*value));
            }
            HostOp::GetField { dst, field } => s.write(*dst, state.read_field(*field)),
            HostOp::SetField { field, value } => state.write_field(*field, s.read(*value)),
            HostOp::MaskAndCast { dst, src, ty } => s.write(*dst, truncate(*ty, s.read(*src))),
            HostOp::CheckCondition { dst, condition, a, b } => {
                let v = eval_condition(*condition, s.read(*a), s.read(*b));
                s.write(*dst, v as u64);
            }
            HostOp::SetExitPc { value } => {
                return Ok(ExecResult { next_pc: s.read(*value), eret: false });
            }
            HostOp::SetCondExitPc { condition, pc_if_true, pc_if_false } => {
                let pc = if s.read(*condition) != 0 { s.read(*pc_if_true) } else { s.read(*pc_if_false) };
                return Ok(ExecResult { next_pc: pc, eret: false });
            }
            HostOp::CondExit { condition, flush_list } => {
                if s.read(*condition) != 0 {
                    for (guest_reg, value) in flush_list {
                        state.gpr_write(*guest_reg, s.read(*value));
                    }
                    return Ok(ExecResult { next_pc: state.next_pc, eret: false });
                }
            }
            HostOp::TlbLookup { dst, address, access } => {
                let paddr = crate::mmu::resolve(&state.cop0, s.read(*address), *access)?;
                s.write(*dst, paddr);
            }
            HostOp::LoadGuestReg { dst, guest_reg } => s.write(*dst, state.gpr_read(*guest_reg)),
            HostOp::FlushGuestReg { guest_reg, value } => state.gpr_write(*guest_reg, s.read(*value)),
            HostOp::Multiply { dst, a, b, ty, high } => {
                let product: u128 = if ty.is_signed() {
                    (sign_extend(s.read(*a), ty.bits()) as i64 as i128 as u128)
                        .wrapping_mul(sign_extend(s.read(*b), ty.bits()) as i64 as i128 as u128)
                } else {
                    (s.read(*a) as u128).wrapping_mul(s.read(*b) as u128)
                };
                s.write(*dst, if *high { (product >> 64) as u64 } else { product as u64 });
            }
            HostOp::Divide { dst, a, b, ty, remainder } => {
                let v = if ty.is_signed() {
                    let a = sign_extend(s.read(*a), ty.bits()) as i64;
                    let b = sign_extend(s.read(*b), ty.bits()) as i64;
                    if b == 0 {
                        0
                    } else if *remainder {
                        a.wrapping_rem(b) as u64
                    } else {
                        a.wrapping_div(b) as u64
                    }
                } else {
                    let a = s.read(*a);
                    let b = s.read(*b);
                    if b == 0 {
                        0
                    } else if *remainder {
                        a % b
                    } else {
                        a / b
                    }
                };
                s.write(*dst, v);
            }
            HostOp::Eret => return Ok(ExecResult { next_pc: 0, eret: true }),
            HostOp::CallIntrinsic { dst, intrinsic, args } => {
                let argv: Vec<u64> = args.iter().map(|&a| s.read(a)).collect();
                let result = run_intrinsic(state, *intrinsic, &argv)?;
                s.write(*dst, result);
            }
            HostOp::RaiseException { exception, pc, is_delay_slot, cop_number } => {
                state.cop0.enter_exception(*exception, *pc as u64, *is_delay_slot, *cop_number);
                return Err(GuestException::Cop0(*exception));
            }
            HostOp::CondRaiseException { condition, exception, pc, is_delay_slot, cop_number } => {
                if s.read(*condition) != 0 {
                    state.cop0.enter_exception(*exception, *pc as u64, *is_delay_slot, *cop_number);
                    return Err(GuestException::Cop0(*exception));
                }
            }
        }
    }

    unreachable!("a well-formed block always ends in a terminator");
}

fn fp_binary_s(op: crate::decode::FpBinOp, a: f32, b: f32) -> f32 {
    use crate::decode::FpBinOp;
    match op {
        FpBinOp::Add => a + b,
        FpBinOp::Sub => a - b,
        FpBinOp::Mul => a * b,
        FpBinOp::Div => a / b,
    }
}

fn fp_binary_d(op: crate::decode::FpBinOp, a: f64, b: f64) -> f64 {
    use crate::decode::FpBinOp;
    match op {
        FpBinOp::Add => a + b,
        FpBinOp::Sub => a - b,
        FpBinOp::Mul => a * b,
        FpBinOp::Div => a / b,
    }
}

/// Executes an FPU or TLB-maintenance intrinsic against guest state,
/// returning the bit pattern the caller's `SetPtr` will commit to the
/// destination register (zero for intrinsics with no numeric result).
fn run_intrinsic(
    state: &mut GuestState,
    intrinsic: Intrinsic,
    args: &[u64],
) -> Result<u64, GuestException> {
    use crate::decode::FpFmt;
    use crate::state::fpu::{
        check_cvt_l, check_cvt_w, check_fpu_arg_d, check_fpu_arg_s, check_fpu_result_d,
        check_fpu_result_s, compare_d, compare_s, ComparePredicate,
    };

    match intrinsic {
        Intrinsic::FpBinary { op, fmt } => match fmt {
            FpFmt::Single => {
                let a = f32::from_bits(args[0] as u32);
                let b = f32::from_bits(args[1] as u32);
                match state.fpu.binary_op_s(a, b, |a, b| fp_binary_s(op, a, b)) {
                    Some(v) => Ok(v.to_bits() as u64),
                    None => Err(GuestException::FloatingPoint),
                }
            }
            FpFmt::Double => {
                let a = f64::from_bits(args[0]);
                let b = f64::from_bits(args[1]);
                match state.fpu.binary_op_d(a, b, |a, b| fp_binary_d(op, a, b)) {
                    Some(v) => Ok(v.to_bits() as u64),
                    None => Err(GuestException::FloatingPoint),
                }
            }
            _ => Ok(0),
        },
        Intrinsic::FpConvert { from, to } => {
            let fcr31 = &mut state.fpu.fcr31;
            fcr31.clear_cause();
            let value = match from {
                FpFmt::Single => {
                    check_fpu_arg_s(fcr31, args[0] as u32);
                    f64::from(f32::from_bits(args[0] as u32))
                }
                FpFmt::Double => {
                    check_fpu_arg_d(fcr31, args[0]);
                    f64::from_bits(args[0])
                }
                FpFmt::Word => (args[0] as i32) as f64,
                FpFmt::Long => (args[0] as i64) as f64,
            };
            if fcr31.should_trap() {
                return Err(GuestException::FloatingPoint);
            }
            let result = match to {
                FpFmt::Single => check_fpu_result_s(fcr31, value as f32).to_bits() as u64,
                FpFmt::Double => check_fpu_result_d(fcr31, value).to_bits(),
                FpFmt::Word => {
                    if !check_cvt_w(fcr31, value) {
                        return Err(GuestException::FloatingPoint);
                    }
                    (value.round() as i32) as u32 as u64
                }
                FpFmt::Long => {
                    if !check_cvt_l(fcr31, value) {
                        return Err(GuestException::FloatingPoint);
                    }
                    (value.round() as i64) as u64
                }
            };
            if fcr31.should_trap() {
                return Err(GuestException::FloatingPoint);
            }
            Ok(result)
        }
        Intrinsic::FpCompare { fmt, predicate } => {
            state.fpu.fcr31.clear_cause();
            let pred = ComparePredicate::from_index(predicate);
            match fmt {
                FpFmt::Single => {
                    compare_s(&mut state.fpu.fcr31, pred, f32::from_bits(args[0] as u32), f32::from_bits(args[1] as u32))
                }
                FpFmt::Double => {
                    compare_d(&mut state.fpu.fcr31, pred, f64::from_bits(args[0]), f64::from_bits(args[1]))
                }
                _ => {}
            }
            if state.fpu.fcr31.should_trap() {
                return Err(GuestException::FloatingPoint);
            }
            Ok(0)
        }
        Intrinsic::TlbWrite { random } => {
            if random {
                state.cop0.tlb_write_random();
            } else {
                state.cop0.tlb_write_indexed();
            }
            Ok(0)
        }
        Intrinsic::TlbProbe => {
            state.cop0.tlb_probe();
            Ok(0)
        }
        Intrinsic::TlbRead => {
            state.cop0.tlb_read();
            Ok(0)
        }
    }
}

fn sign_extend(value: u64, bits: u32) -> u64 {
    if bits >= 64 {
        return value;
    }
    let shift = 64 - bits;
    (((value << shift) as i64) >> shift) as u64
}

fn bin_op(ctx: &IrContext, id: IrId, op: BinOpKind, a: IrId, b: IrId) -> HostOp {
    HostOp::BinOp { dst: resolve(ctx, id), op, lhs: resolve(ctx, a), rhs: resolve(ctx, b) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DynarecConfig;
    use crate::ir::NO_GUEST_REG;
    use crate::regalloc;

    struct NullBus;
    impl GuestBus for NullBus {
        fn read(&mut self, _ty: ValueType, _paddr: u64) -> u64 {
            0
        }
        fn write(&mut self, _ty: ValueType, _paddr: u64, _value: u64) {}
    }

    fn build_add_block() -> Vec<HostOp> {
        let mut ctx = IrContext::new(&DynarecConfig::default());
        let a = ctx.emit_set_constant(Constant::U32(2), 4).unwrap();
        let b = ctx.emit_set_constant(Constant::U32(3), 5).unwrap();
        ctx.emit_add(a, b, 6).unwrap();
        let pc = ctx.emit_set_constant(Constant::U32(0x100), NO_GUEST_REG).unwrap();
        ctx.emit_set_block_exit_pc(pc).unwrap();
        crate::ir::optimize::run(&mut ctx).unwrap();
        regalloc::allocate(&mut ctx);
        lower(&ctx).unwrap()
    }

    #[test]
    fn add_then_flush_commits_guest_register() {
        let ops = build_add_block();
        let mut state = GuestState::new(0);
        let mut bus = NullBus;
        let result = execute(&ops, &mut state, &mut bus).unwrap();
        assert_eq!(result.next_pc, 0x100);
        assert_eq!(state.gpr_read(6), 5);
    }

    #[test]
    fn constants_never_produce_a_lowered_op() {
        let ops = build_add_block();
        assert!(!ops.iter().any(|op| matches!(op, HostOp::Move { .. })));
    }
}
