//! Linear-scan register allocation over the optimized IR (C9).
//!
//! Targets the fixed host-register bank of the threaded-code host described
//! in the crate's top-level docs. Constants are never given a host register:
//! the emitter re-materializes them at each use site instead, which is the
//! allocator's privilege to exercise per value.

use crate::ir::{IrContext, IrId, IrKind};

/// Size of the threaded-code host's register file.
pub const NUM_HOST_REGS: u8 = 16;

fn produces_value(kind: &IrKind) -> bool {
    !matches!(
        kind,
        IrKind::Store { .. }
            | IrKind::SetPtr { .. }
            | IrKind::FlushGuestReg { .. }
            | IrKind::SetBlockExitPc(_)
            | IrKind::SetCondBlockExitPc { .. }
            | IrKind::CondBlockExit { .. }
            | IrKind::Eret
            | IrKind::RaiseException { .. }
            | IrKind::CondRaiseException { .. }
    )
}

fn needs_host_register(kind: &IrKind) -> bool {
    produces_value(kind) && !matches!(kind, IrKind::SetConstant(_))
}

struct Occupant {
    value: IrId,
    last_use: u32,
}

/// Runs linear-scan allocation, annotating every live IR node's
/// [`crate::ir::RegAlloc`] in place.
pub fn allocate(ctx: &mut IrContext) {
    let mut occupants: Vec<Option<Occupant>> = (0..NUM_HOST_REGS).map(|_| None).collect();
    let mut next_spill_slot: u32 = 0;

    let order: Vec<IrId> = ctx.iter_ids().collect();
    for id in order {
        let index = ctx.node(id).index;

        // Retire any host register whose occupant is no longer needed.
        for slot in occupants.iter_mut() {
            if let Some(occ) = slot {
                if occ.last_use < index {
                    *slot = None;
                }
            }
        }

        if ctx.node(id).dead_code {
            continue;
        }
        if !needs_host_register(&ctx.node(id).kind) {
            continue;
        }

        let free_reg = occupants.iter().position(|o| o.is_none());
        let chosen = match free_reg {
            Some(r) => r as u8,
            None => {
                // Spill whichever occupant's next use is farthest away.
                let (victim, _) = occupants
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, o)| o.as_ref().map(|o| o.last_use).unwrap_or(0))
                    .unwrap();
                let evicted = occupants[victim].take().unwrap();
                ctx.node_mut(evicted.value).alloc.spilled = true;
                ctx.node_mut(evicted.value).alloc.spill_slot = next_spill_slot;
                ctx.node_mut(evicted.value).alloc.host_reg = None;
                next_spill_slot += 1;
                victim as u8
            }
        };

        occupants[chosen as usize] =
            Some(Occupant { value: id, last_use: ctx.node(id).last_use });
        ctx.node_mut(id).alloc.host_reg = Some(chosen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DynarecConfig;
    use crate::ir::{Constant, NO_GUEST_REG};

    #[test]
    fn constants_get_no_host_register() {
        let mut ctx = IrContext::new(&DynarecConfig::default());
        let c = ctx.emit_set_constant(Constant::U32(5), NO_GUEST_REG).unwrap();
        let pc = ctx.emit_set_constant(Constant::U32(0x100), NO_GUEST_REG).unwrap();
        ctx.emit_set_block_exit_pc(pc).unwrap();
        allocate(&mut ctx);
        assert_eq!(ctx.node(c).alloc.host_reg, None);
    }

    #[test]
    fn live_value_gets_a_host_register() {
        let mut ctx = IrContext::new(&DynarecConfig::default());
        let a = ctx.emit_load_guest_reg(1).unwrap();
        let b = ctx.emit_load_guest_reg(2).unwrap();
        let sum = ctx.emit_add(a, b, 3).unwrap();
        let pc = ctx.emit_set_constant(Constant::U32(0x100), NO_GUEST_REG).unwrap();
        ctx.emit_set_block_exit_pc(pc).unwrap();
        crate::ir::optimize::run(&mut ctx).unwrap();
        allocate(&mut ctx);
        assert!(ctx.node(sum).alloc.host_reg.is_some());
    }

    #[test]
    fn exhausting_host_registers_forces_a_spill() {
        let mut ctx = IrContext::new(&DynarecConfig::default());
        let mut values = Vec::new();
        for r in 1..=(NUM_HOST_REGS as u8 + 2) {
            values.push(ctx.emit_load_guest_reg(r).unwrap());
        }
        // keep every value alive by reading them all again at the end
        let mut last = values[0];
        for &v in &values[1..] {
            last = ctx.emit_add(last, v, NO_GUEST_REG).unwrap();
        }
        let pc = ctx.emit_set_constant(Constant::U32(0x100), NO_GUEST_REG).unwrap();
        ctx.emit_set_block_exit_pc(pc).unwrap();
        let _ = last;
        crate::ir::optimize::run(&mut ctx).unwrap();
        allocate(&mut ctx);
        assert!(values.iter().any(|&v| ctx.node(v).alloc.spilled));
    }
}
