//! Dead-code marking, last-use computation, and flush insertion (C8).
//!
//! Runs once per block, after the builder has finished emitting and before
//! the register allocator sees the instruction list.

use crate::error::TranslationError;
use crate::ir::{IrContext, IrId, IrKind};

fn for_each_operand(kind: &IrKind, mut f: impl FnMut(IrId)) {
    match *kind {
        IrKind::Nop
        | IrKind::SetConstant(_)
        | IrKind::LoadGuestReg(_)
        | IrKind::Eret => {}
        IrKind::Or(a, b)
        | IrKind::And(a, b)
        | IrKind::Xor(a, b)
        | IrKind::Add(a, b)
        | IrKind::Sub(a, b) => {
            f(a);
            f(b);
        }
        IrKind::Not(a) => f(a),
        IrKind::Shift { operand, amount, .. } => {
            f(operand);
            f(amount);
        }
        IrKind::Store { address, value, .. } => {
            f(address);
            f(value);
        }
        IrKind::Load { address, .. } => f(address),
        IrKind::GetPtr { .. } => {}
        IrKind::SetPtr { value, .. } => f(value),
        IrKind::MaskAndCast { operand, .. } => f(operand),
        IrKind::CheckCondition { a, b, .. } => {
            f(a);
            f(b);
        }
        IrKind::SetBlockExitPc(a) => f(a),
        IrKind::SetCondBlockExitPc { condition, pc_if_true, pc_if_false } => {
            f(condition);
            f(pc_if_true);
            f(pc_if_false);
        }
        IrKind::CondBlockExit { condition, ref flush_list } => {
            f(condition);
            for (_, value) in flush_list {
                f(*value);
            }
        }
        IrKind::TlbLookup { address, .. } => f(address),
        IrKind::FlushGuestReg { value, .. } => f(value),
        IrKind::Multiply { a, b, .. } => {
            f(a);
            f(b);
        }
        IrKind::Divide { a, b, .. } => {
            f(a);
            f(b);
        }
        IrKind::CallIntrinsic { ref args, .. } => {
            for &a in args {
                f(a);
            }
        }
        IrKind::RaiseException { .. } => {}
        IrKind::CondRaiseException { condition, .. } => f(condition),
    }
}

fn is_root(kind: &IrKind) -> bool {
    matches!(
        kind,
        IrKind::Store { .. }
            | IrKind::SetPtr { .. }
            | IrKind::SetBlockExitPc(_)
            | IrKind::SetCondBlockExitPc { .. }
            | IrKind::CondBlockExit { .. }
            | IrKind::FlushGuestReg { .. }
            | IrKind::Eret
            | IrKind::TlbLookup { .. }
            | IrKind::CallIntrinsic { .. }
            | IrKind::RaiseException { .. }
            | IrKind::CondRaiseException { .. }
    )
}

/// Marks every value reachable from a side-effecting root as live; anything
/// else is flagged `dead_code` and skipped by the allocator and emitter.
pub fn mark_live(ctx: &mut IrContext) {
    let n = ctx.len();
    let mut live = vec![false; n];
    let mut stack: Vec<IrId> = ctx.iter_ids().filter(|&id| is_root(&ctx.node(id).kind)).collect();

    while let Some(id) = stack.pop() {
        if live[id as usize] {
            continue;
        }
        live[id as usize] = true;
        let mut operands = Vec::new();
        for_each_operand(&ctx.node(id).kind, |op| operands.push(op));
        for op in operands {
            if !live[op as usize] {
                stack.push(op);
            }
        }
    }

    for id in 0..n as u32 {
        ctx.node_mut(id).dead_code = !live[id as usize];
    }
}

/// Single forward pass recording, for each value, the highest index at
/// which it is read. Constants and the entry-zero node keep their
/// `u32::MAX` "never free" sentinel.
pub fn compute_last_use(ctx: &mut IrContext) {
    for id in ctx.iter_ids().collect::<Vec<_>>() {
        let index = ctx.node(id).index;
        let mut operands = Vec::new();
        for_each_operand(&ctx.node(id).kind, |op| operands.push(op));
        for op in operands {
            let node = ctx.node_mut(op);
            if node.last_use != u32::MAX {
                node.last_use = node.last_use.max(index);
            }
        }
    }
}

/// Inserts a `FLUSH_GUEST_REG` after the last use of every guest register's
/// final bound value, skipping registers whose value is an untouched
/// pass-through read of themselves.
pub fn plan_flushes(ctx: &mut IrContext) {
    let bound: Vec<(u8, IrId)> = ctx.bound_guest_regs().collect();
    for (guest_reg, value) in bound {
        let is_pass_through =
            matches!(ctx.node(value).kind, IrKind::LoadGuestReg(r) if r == guest_reg);
        if is_pass_through {
            continue;
        }
        let last_use = ctx.node(value).last_use;
        let anchor = if last_use == u32::MAX { ctx.tail().unwrap() } else { last_use };
        ctx.insert_after(anchor, IrKind::FlushGuestReg { guest_reg, value });
    }
}

/// Runs the full C8 pipeline over a finished block. Fails if the builder
/// never planned a block exit.
pub fn run(ctx: &mut IrContext) -> Result<(), TranslationError> {
    if !ctx.block_end_pc_ir_emitted {
        return Err(TranslationError::MissingBlockExit);
    }
    compute_last_use(ctx);
    plan_flushes(ctx);
    mark_live(ctx);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DynarecConfig;
    use crate::ir::{Constant, NO_GUEST_REG};

    #[test]
    fn dead_value_not_feeding_a_root_is_marked_dead() {
        let mut ctx = IrContext::new(&DynarecConfig::default());
        let dead = ctx.emit_set_constant(Constant::U32(99), NO_GUEST_REG).unwrap();
        let pc = ctx.emit_set_constant(Constant::U32(0x1000), NO_GUEST_REG).unwrap();
        ctx.emit_set_block_exit_pc(pc).unwrap();
        mark_live(&mut ctx);
        assert!(ctx.node(dead).dead_code);
        assert!(!ctx.node(pc).dead_code);
    }

    #[test]
    fn flush_inserted_after_last_use() {
        let mut ctx = IrContext::new(&DynarecConfig::default());
        let v = ctx.emit_set_constant(Constant::U32(7), 4).unwrap();
        let _use_site = ctx.emit_add(v, v, NO_GUEST_REG).unwrap();
        let pc = ctx.emit_set_constant(Constant::U32(0x1000), NO_GUEST_REG).unwrap();
        ctx.emit_set_block_exit_pc(pc).unwrap();
        run(&mut ctx).unwrap();

        let mut saw_flush = false;
        for id in ctx.iter_ids() {
            if let IrKind::FlushGuestReg { guest_reg, value } = ctx.node(id).kind {
                assert_eq!(guest_reg, 4);
                assert_eq!(value, v);
                saw_flush = true;
            }
        }
        assert!(saw_flush);
    }

    #[test]
    fn missing_block_exit_is_fatal() {
        let mut ctx = IrContext::new(&DynarecConfig::default());
        ctx.emit_set_constant(Constant::U32(1), 1).unwrap();
        let err = run(&mut ctx).unwrap_err();
        assert_eq!(err, TranslationError::MissingBlockExit);
    }
}
