//! SSA intermediate representation and its builder (C7).
//!
//! The arena is a flat `Vec<IrNode>`; nodes reference each other and form
//! the block's instruction list through `prev`/`next` indices rather than
//! pointers, so the whole context can be reset and reused across blocks
//! without an allocator in the loop.

pub mod optimize;

use crate::config::DynarecConfig;
use crate::error::TranslationError;
use crate::mmu::AccessKind;
use crustationlogger::*;

pub type IrId = u32;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValueType {
    U8,
    S8,
    S16,
    U16,
    S32,
    U32,
    U64,
    S64,
}

impl ValueType {
    pub fn bits(self) -> u32 {
        match self {
            ValueType::U8 | ValueType::S8 => 8,
            ValueType::S16 | ValueType::U16 => 16,
            ValueType::S32 | ValueType::U32 => 32,
            ValueType::U64 | ValueType::S64 => 64,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, ValueType::S8 | ValueType::S16 | ValueType::S32 | ValueType::S64)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Condition {
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShiftDirection {
    Left,
    Right,
}

/// Operations whose behavior lives on [`crate::state::GuestState`] rather
/// than in the arithmetic IR: FPU arithmetic/conversion/compare (which need
/// the full IEEE trap machinery) and TLB maintenance (which mutates 32
/// software-walked entries wholesale). Lowered to `HostOp::CallIntrinsic`
/// and interpreted directly against guest state at execution time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Intrinsic {
    FpBinary { op: crate::decode::FpBinOp, fmt: crate::decode::FpFmt },
    FpConvert { from: crate::decode::FpFmt, to: crate::decode::FpFmt },
    FpCompare { fmt: crate::decode::FpFmt, predicate: u8 },
    TlbWrite { random: bool },
    TlbProbe,
    TlbRead,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Constant {
    U8(u8),
    S8(i8),
    S16(i16),
    U16(u16),
    S32(i32),
    U32(u32),
    U64(u64),
    S64(i64),
}

impl Constant {
    pub fn is_zero(self) -> bool {
        match self {
            Constant::U8(v) => v == 0,
            Constant::S8(v) => v == 0,
            Constant::S16(v) => v == 0,
            Constant::U16(v) => v == 0,
            Constant::S32(v) => v == 0,
            Constant::U32(v) => v == 0,
            Constant::U64(v) => v == 0,
            Constant::S64(v) => v == 0,
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Constant::U8(v) => v as u64,
            Constant::S8(v) => v as i64 as u64,
            Constant::S16(v) => v as i64 as u64,
            Constant::U16(v) => v as u64,
            Constant::S32(v) => v as i64 as u64,
            Constant::U32(v) => v as u64,
            Constant::U64(v) => v,
            Constant::S64(v) => v as u64,
        }
    }
}

/// Sentinel guest-register value meaning "this node has no destination
/// guest register" (`NO_GUEST_REG` in the reference).
pub const NO_GUEST_REG: u8 = 0xFF;

#[derive(Clone, Debug)]
pub enum IrKind {
    Nop,
    SetConstant(Constant),
    Or(IrId, IrId),
    And(IrId, IrId),
    Not(IrId),
    Xor(IrId, IrId),
    Add(IrId, IrId),
    Sub(IrId, IrId),
    Shift {
        operand: IrId,
        amount: IrId,
        ty: ValueType,
        direction: ShiftDirection,
    },
    Store {
        ty: ValueType,
        address: IrId,
        value: IrId,
    },
    Load {
        ty: ValueType,
        address: IrId,
    },
    /// Reads a field out of the guest-state struct at a fixed byte offset
    /// (the generic replacement for a coprocessor-specific "get register").
    GetPtr {
        offset: u32,
        ty: ValueType,
    },
    SetPtr {
        offset: u32,
        ty: ValueType,
        value: IrId,
    },
    MaskAndCast {
        operand: IrId,
        ty: ValueType,
    },
    CheckCondition {
        condition: Condition,
        a: IrId,
        b: IrId,
    },
    SetBlockExitPc(IrId),
    SetCondBlockExitPc {
        condition: IrId,
        pc_if_true: IrId,
        pc_if_false: IrId,
    },
    CondBlockExit {
        condition: IrId,
        flush_list: Vec<(u8, IrId)>,
    },
    TlbLookup {
        address: IrId,
        access: AccessKind,
    },
    LoadGuestReg(u8),
    FlushGuestReg {
        guest_reg: u8,
        value: IrId,
    },
    Multiply {
        a: IrId,
        b: IrId,
        ty: ValueType,
        high: bool,
    },
    Divide {
        a: IrId,
        b: IrId,
        ty: ValueType,
        remainder: bool,
    },
    Eret,
    CallIntrinsic {
        intrinsic: Intrinsic,
        args: Vec<IrId>,
    },
    /// Unconditionally raises a guest exception, ending the block. `pc` and
    /// `is_delay_slot` are baked in at translation time since both are
    /// static properties of the faulting instruction's position.
    RaiseException {
        exception: crate::state::cop0::Exception,
        pc: u32,
        is_delay_slot: bool,
        cop_number: u64,
    },
    /// Raises a guest exception only if `condition` holds; otherwise falls
    /// through to the rest of the block. Used for integer-overflow traps,
    /// where the faulting operation's own result still needs computing.
    CondRaiseException {
        condition: IrId,
        exception: crate::state::cop0::Exception,
        pc: u32,
        is_delay_slot: bool,
        cop_number: u64,
    },
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RegAlloc {
    pub host_reg: Option<u8>,
    pub spilled: bool,
    pub spill_slot: u32,
}

#[derive(Clone, Debug)]
pub struct IrNode {
    pub kind: IrKind,
    pub index: u32,
    pub prev: Option<IrId>,
    pub next: Option<IrId>,
    pub dead_code: bool,
    /// Highest index at which this value is read. `u32::MAX` means "never
    /// free" (constants and the entry-zero node).
    pub last_use: u32,
    pub alloc: RegAlloc,
}

/// Per-block IR workspace: the arena, the head/tail of its instruction
/// list, and the guest-GPR value-numbering map.
pub struct IrContext {
    logger: Logger,
    cache: Vec<IrNode>,
    capacity: usize,
    flush_cache_capacity: usize,
    head: Option<IrId>,
    tail: Option<IrId>,
    guest_gpr_to_value: [Option<IrId>; 32],
    pub block_end_pc_ir_emitted: bool,
    pub block_end_pc_compiled: bool,
}

const ENTRY_ZERO: IrId = 0;

impl IrContext {
    pub fn new(config: &DynarecConfig) -> IrContext {
        let mut ctx = IrContext {
            logger: Logger::new("IR", Level::Info),
            cache: Vec::with_capacity(config.ir_cache_size),
            capacity: config.ir_cache_size,
            flush_cache_capacity: config.ir_flush_cache_size,
            head: None,
            tail: None,
            guest_gpr_to_value: [None; 32],
            block_end_pc_ir_emitted: false,
            block_end_pc_compiled: false,
        };
        ctx.reset();
        ctx
    }

    /// Resets the context for a new block: clears the arena and re-seeds
    /// the entry-zero constant that r0 always resolves to.
    pub fn reset(&mut self) {
        self.cache.clear();
        self.head = None;
        self.tail = None;
        self.guest_gpr_to_value = [None; 32];
        self.block_end_pc_ir_emitted = false;
        self.block_end_pc_compiled = false;

        let zero = self.push_node(IrKind::SetConstant(Constant::U64(0)));
        self.guest_gpr_to_value[0] = Some(zero);
        self.cache[zero as usize].last_use = u32::MAX;
        debug_assert_eq!(zero, ENTRY_ZERO);
    }

    pub fn node(&self, id: IrId) -> &IrNode {
        &self.cache[id as usize]
    }

    pub fn node_mut(&mut self, id: IrId) -> &mut IrNode {
        &mut self.cache[id as usize]
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn head(&self) -> Option<IrId> {
        self.head
    }

    pub fn tail(&self) -> Option<IrId> {
        self.tail
    }

    fn push_node(&mut self, kind: IrKind) -> IrId {
        let id = self.cache.len() as u32;
        let node = IrNode {
            kind,
            index: id,
            prev: self.tail,
            next: None,
            dead_code: true,
            last_use: id,
            alloc: RegAlloc::default(),
        };
        self.cache.push(node);
        if let Some(tail) = self.tail {
            self.cache[tail as usize].next = Some(id);
        } else {
            self.head = Some(id);
        }
        self.tail = Some(id);
        id
    }

    fn append(&mut self, kind: IrKind, guest_reg: u8) -> Result<IrId, TranslationError> {
        if self.cache.len() >= self.capacity {
            return Err(TranslationError::IrCacheOverflow { capacity: self.capacity });
        }
        let id = self.push_node(kind);
        if guest_reg != NO_GUEST_REG {
            self.update_guest_reg_mapping(guest_reg, id);
        }
        Ok(id)
    }

    fn update_guest_reg_mapping(&mut self, guest_reg: u8, value: IrId) {
        if guest_reg != 0 && (guest_reg as usize) < 32 {
            self.guest_gpr_to_value[guest_reg as usize] = Some(value);
        }
    }

    /// Inserts a node directly after `anchor` in the linked list without
    /// touching the guest-GPR map. Used by the optimizer to splice in
    /// `FLUSH_GUEST_REG` nodes after a value's last use.
    pub fn insert_after(&mut self, anchor: IrId, kind: IrKind) -> IrId {
        let id = self.cache.len() as u32;
        let anchor_next = self.cache[anchor as usize].next;
        let node = IrNode {
            kind,
            index: id,
            prev: Some(anchor),
            next: anchor_next,
            dead_code: false,
            last_use: u32::MAX,
            alloc: RegAlloc::default(),
        };
        self.cache.push(node);
        self.cache[anchor as usize].next = Some(id);
        if let Some(next) = anchor_next {
            self.cache[next as usize].prev = Some(id);
        } else {
            self.tail = Some(id);
        }
        id
    }

    // --- emission API, named after the operations they lower (ir_emit_* in
    // the reference this is modeled on) ---

    /// Emits a no-op. Used for opcodes that are architecturally defined but
    /// have nothing for this implementation to do (`cache`).
    pub fn emit_nop(&mut self) -> Result<IrId, TranslationError> {
        self.append(IrKind::Nop, NO_GUEST_REG)
    }

    pub fn emit_set_constant(
        &mut self,
        value: Constant,
        guest_reg: u8,
    ) -> Result<IrId, TranslationError> {
        if guest_reg == 0 {
            return Ok(ENTRY_ZERO);
        }
        if value.is_zero() && guest_reg != NO_GUEST_REG {
            self.update_guest_reg_mapping(guest_reg, ENTRY_ZERO);
            return Ok(ENTRY_ZERO);
        }
        self.append(IrKind::SetConstant(value), guest_reg)
    }

    /// Returns the guest register's current SSA value, or emits a fresh
    /// `LOAD_GUEST_REG` if none is bound yet (value-numbering on reads).
    pub fn emit_load_guest_reg(&mut self, guest_reg: u8) -> Result<IrId, TranslationError> {
        if guest_reg == 0 {
            return Ok(ENTRY_ZERO);
        }
        if let Some(existing) = self.guest_gpr_to_value[guest_reg as usize] {
            return Ok(existing);
        }
        self.append(IrKind::LoadGuestReg(guest_reg), guest_reg)
    }

    pub fn emit_or(&mut self, a: IrId, b: IrId, guest_reg: u8) -> Result<IrId, TranslationError> {
        self.append(IrKind::Or(a, b), guest_reg)
    }
    pub fn emit_and(&mut self, a: IrId, b: IrId, guest_reg: u8) -> Result<IrId, TranslationError> {
        self.append(IrKind::And(a, b), guest_reg)
    }
    pub fn emit_not(&mut self, a: IrId, guest_reg: u8) -> Result<IrId, TranslationError> {
        self.append(IrKind::Not(a), guest_reg)
    }
    pub fn emit_xor(&mut self, a: IrId, b: IrId, guest_reg: u8) -> Result<IrId, TranslationError> {
        self.append(IrKind::Xor(a, b), guest_reg)
    }
    pub fn emit_add(&mut self, a: IrId, b: IrId, guest_reg: u8) -> Result<IrId, TranslationError> {
        self.append(IrKind::Add(a, b), guest_reg)
    }
    pub fn emit_sub(&mut self, a: IrId, b: IrId, guest_reg: u8) -> Result<IrId, TranslationError> {
        self.append(IrKind::Sub(a, b), guest_reg)
    }

    pub fn emit_shift(
        &mut self,
        operand: IrId,
        amount: IrId,
        ty: ValueType,
        direction: ShiftDirection,
        guest_reg: u8,
    ) -> Result<IrId, TranslationError> {
        self.append(IrKind::Shift { operand, amount, ty, direction }, guest_reg)
    }

    pub fn emit_store(
        &mut self,
        ty: ValueType,
        address: IrId,
        value: IrId,
    ) -> Result<IrId, TranslationError> {
        self.append(IrKind::Store { ty, address, value }, NO_GUEST_REG)
    }

    pub fn emit_load(
        &mut self,
        ty: ValueType,
        address: IrId,
        guest_reg: u8,
    ) -> Result<IrId, TranslationError> {
        self.append(IrKind::Load { ty, address }, guest_reg)
    }

    pub fn emit_get_ptr(
        &mut self,
        offset: u32,
        ty: ValueType,
        guest_reg: u8,
    ) -> Result<IrId, TranslationError> {
        self.append(IrKind::GetPtr { offset, ty }, guest_reg)
    }

    pub fn emit_set_ptr(
        &mut self,
        offset: u32,
        ty: ValueType,
        value: IrId,
    ) -> Result<IrId, TranslationError> {
        self.append(IrKind::SetPtr { offset, ty, value }, NO_GUEST_REG)
    }

    pub fn emit_mask_and_cast(
        &mut self,
        operand: IrId,
        ty: ValueType,
        guest_reg: u8,
    ) -> Result<IrId, TranslationError> {
        self.append(IrKind::MaskAndCast { operand, ty }, guest_reg)
    }

    pub fn emit_check_condition(
        &mut self,
        condition: Condition,
        a: IrId,
        b: IrId,
        guest_reg: u8,
    ) -> Result<IrId, TranslationError> {
        self.append(IrKind::CheckCondition { condition, a, b }, guest_reg)
    }

    pub fn emit_set_block_exit_pc(&mut self, address: IrId) -> Result<IrId, TranslationError> {
        self.block_end_pc_ir_emitted = true;
        self.append(IrKind::SetBlockExitPc(address), NO_GUEST_REG)
    }

    pub fn emit_conditional_set_block_exit_pc(
        &mut self,
        condition: IrId,
        pc_if_true: IrId,
        pc_if_false: IrId,
    ) -> Result<IrId, TranslationError> {
        self.block_end_pc_ir_emitted = true;
        self.append(
            IrKind::SetCondBlockExitPc { condition, pc_if_true, pc_if_false },
            NO_GUEST_REG,
        )
    }

    /// Exits the block early if `condition` holds, snapshotting every guest
    /// register whose SSA value is not a pass-through read of itself into a
    /// flush list the allocator emits along the exit edge. Must be called
    /// only after the block's exit PC has already been planned.
    pub fn emit_conditional_block_exit(
        &mut self,
        condition: IrId,
    ) -> Result<IrId, TranslationError> {
        assert!(
            self.block_end_pc_ir_emitted,
            "conditional block exit emitted before the exit pc was planned"
        );

        let mut flush_list = Vec::new();
        for guest_reg in 1u8..32 {
            if let Some(value) = self.guest_gpr_to_value[guest_reg as usize] {
                let is_pass_through =
                    matches!(self.cache[value as usize].kind, IrKind::LoadGuestReg(r) if r == guest_reg);
                if !is_pass_through {
                    flush_list.push((guest_reg, value));
                }
            }
        }
        if flush_list.len() > self.flush_cache_capacity {
            return Err(TranslationError::FlushCacheOverflow { capacity: self.flush_cache_capacity });
        }
        self.append(IrKind::CondBlockExit { condition, flush_list }, NO_GUEST_REG)
    }

    pub fn emit_tlb_lookup(
        &mut self,
        address: IrId,
        access: AccessKind,
        guest_reg: u8,
    ) -> Result<IrId, TranslationError> {
        self.append(IrKind::TlbLookup { address, access }, guest_reg)
    }

    pub fn emit_multiply(
        &mut self,
        a: IrId,
        b: IrId,
        ty: ValueType,
        high: bool,
        guest_reg: u8,
    ) -> Result<IrId, TranslationError> {
        self.append(IrKind::Multiply { a, b, ty, high }, guest_reg)
    }

    pub fn emit_divide(
        &mut self,
        a: IrId,
        b: IrId,
        ty: ValueType,
        remainder: bool,
        guest_reg: u8,
    ) -> Result<IrId, TranslationError> {
        self.append(IrKind::Divide { a, b, ty, remainder }, guest_reg)
    }

    pub fn emit_eret(&mut self) -> Result<IrId, TranslationError> {
        self.block_end_pc_ir_emitted = true;
        self.append(IrKind::Eret, NO_GUEST_REG)
    }

    pub fn emit_call_intrinsic(
        &mut self,
        intrinsic: Intrinsic,
        args: Vec<IrId>,
        guest_reg: u8,
    ) -> Result<IrId, TranslationError> {
        self.append(IrKind::CallIntrinsic { intrinsic, args }, guest_reg)
    }

    pub fn emit_raise_exception(
        &mut self,
        exception: crate::state::cop0::Exception,
        pc: u32,
        is_delay_slot: bool,
        cop_number: u64,
    ) -> Result<IrId, TranslationError> {
        self.block_end_pc_ir_emitted = true;
        self.append(
            IrKind::RaiseException { exception, pc, is_delay_slot, cop_number },
            NO_GUEST_REG,
        )
    }

    /// Raises `exception` only if `condition` is nonzero; the block exit
    /// this instruction would otherwise reach is still planned normally by
    /// the caller, since execution falls through when the condition is
    /// false.
    pub fn emit_conditional_raise_exception(
        &mut self,
        condition: IrId,
        exception: crate::state::cop0::Exception,
        pc: u32,
        is_delay_slot: bool,
        cop_number: u64,
    ) -> Result<IrId, TranslationError> {
        self.append(
            IrKind::CondRaiseException { condition, exception, pc, is_delay_slot, cop_number },
            NO_GUEST_REG,
        )
    }

    /// Flushes every guest register whose bound value is not a pass-through
    /// read of itself back to the state struct. Called once at the natural
    /// end of block emission (see [`optimize::plan_flushes`] for the
    /// last-use-ordered variant used by the optimizer).
    pub fn bound_guest_regs(&self) -> impl Iterator<Item = (u8, IrId)> + '_ {
        self.guest_gpr_to_value
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(r, v)| v.map(|v| (r as u8, v)))
    }

    pub fn iter_ids(&self) -> IrIter<'_> {
        IrIter { ctx: self, next: self.head }
    }

    pub fn instr_to_string(&self, id: IrId) -> String {
        let node = self.node(id);
        match &node.kind {
            IrKind::Nop => "nop".to_string(),
            IrKind::SetConstant(c) => format!("v{} = {:?}", id, c),
            IrKind::Or(a, b) => format!("v{} = v{} | v{}", id, a, b),
            IrKind::And(a, b) => format!("v{} = v{} & v{}", id, a, b),
            IrKind::Not(a) => format!("v{} = ~v{}", id, a),
            IrKind::Xor(a, b) => format!("v{} = v{} ^ v{}", id, a, b),
            IrKind::Add(a, b) => format!("v{} = v{} + v{}", id, a, b),
            IrKind::Sub(a, b) => format!("v{} = v{} - v{}", id, a, b),
            IrKind::Shift { operand, amount, direction, .. } => {
                format!("v{} = v{} {:?} v{}", id, operand, direction, amount)
            }
            IrKind::Store { address, value, .. } => format!("*v{} = v{}", address, value),
            IrKind::Load { address, .. } => format!("v{} = *v{}", id, address),
            IrKind::GetPtr { offset, .. } => format!("v{} = *state[{}]", id, offset),
            IrKind::SetPtr { offset, value, .. } => format!("*state[{}] = v{}", offset, value),
            IrKind::MaskAndCast { operand, ty } => format!("v{} = (v{} as {:?})", id, operand, ty),
            IrKind::CheckCondition { condition, a, b } => {
                format!("v{} = v{} {:?} v{}", id, a, condition, b)
            }
            IrKind::SetBlockExitPc(a) => format!("exit_pc = v{}", a),
            IrKind::SetCondBlockExitPc { condition, pc_if_true, pc_if_false } => {
                format!("exit_pc = v{} ? v{} : v{}", condition, pc_if_true, pc_if_false)
            }
            IrKind::CondBlockExit { condition, .. } => format!("exit_block_if(v{})", condition),
            IrKind::TlbLookup { address, access } => format!("v{} = tlb_lookup(v{}, {:?})", id, address, access),
            IrKind::LoadGuestReg(r) => format!("v{} = guest_gpr[{}]", id, r),
            IrKind::FlushGuestReg { guest_reg, value } => {
                format!("guest_gpr[{}] = v{}", guest_reg, value)
            }
            IrKind::Multiply { a, b, high, .. } => format!("v{} = mult{}(v{}, v{})", id, if *high { "_hi" } else { "_lo" }, a, b),
            IrKind::Divide { a, b, remainder, .. } => format!("v{} = div{}(v{}, v{})", id, if *remainder { "_rem" } else { "" }, a, b),
            IrKind::Eret => "eret".to_string(),
            IrKind::CallIntrinsic { intrinsic, args } => {
                format!("v{} = call {:?}({:?})", id, intrinsic, args)
            }
            IrKind::RaiseException { exception, .. } => format!("raise {:?}", exception),
            IrKind::CondRaiseException { condition, exception, .. } => {
                format!("raise {:?} if v{}", exception, condition)
            }
        }
    }
}

pub struct IrIter<'a> {
    ctx: &'a IrContext,
    next: Option<IrId>,
}

impl<'a> Iterator for IrIter<'a> {
    type Item = IrId;

    fn next(&mut self) -> Option<IrId> {
        let current = self.next?;
        self.next = self.ctx.node(current).next;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> IrContext {
        IrContext::new(&DynarecConfig::default())
    }

    #[test]
    fn reset_seeds_entry_zero() {
        let ctx = ctx();
        assert_eq!(ctx.len(), 1);
        assert!(matches!(ctx.node(ENTRY_ZERO).kind, IrKind::SetConstant(Constant::U64(0))));
    }

    #[test]
    fn writing_r0_never_emits() {
        let mut c = ctx();
        let before = c.len();
        c.emit_set_constant(Constant::U32(0x1234), 0).unwrap();
        assert_eq!(c.len(), before);
    }

    #[test]
    fn zero_constant_reuses_entry_zero() {
        let mut c = ctx();
        let before = c.len();
        let id = c.emit_set_constant(Constant::U32(0), 5).unwrap();
        assert_eq!(id, ENTRY_ZERO);
        assert_eq!(c.len(), before);
    }

    #[test]
    fn load_guest_reg_is_value_numbered() {
        let mut c = ctx();
        let first = c.emit_load_guest_reg(4).unwrap();
        let second = c.emit_load_guest_reg(4).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn load_guest_reg_after_write_returns_written_value() {
        let mut c = ctx();
        let written = c.emit_set_constant(Constant::U32(42), 4).unwrap();
        let read = c.emit_load_guest_reg(4).unwrap();
        assert_eq!(written, read);
    }

    #[test]
    fn conditional_block_exit_before_exit_pc_is_fatal() {
        let mut c = ctx();
        let cond = c.emit_set_constant(Constant::U32(1), NO_GUEST_REG).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut c = c;
            c.emit_conditional_block_exit(cond)
        }));
        assert!(result.is_err());
    }

    #[test]
    fn conditional_block_exit_snapshots_modified_registers() {
        let mut c = ctx();
        c.emit_set_constant(Constant::U32(7), 3).unwrap();
        c.emit_load_guest_reg(5).unwrap(); // pass-through, should not be flushed
        let pc = c.emit_set_constant(Constant::U32(0x1000), NO_GUEST_REG).unwrap();
        c.emit_set_block_exit_pc(pc).unwrap();
        let cond = c.emit_set_constant(Constant::U32(1), NO_GUEST_REG).unwrap();
        let exit = c.emit_conditional_block_exit(cond).unwrap();
        match &c.node(exit).kind {
            IrKind::CondBlockExit { flush_list, .. } => {
                assert_eq!(flush_list.len(), 1);
                assert_eq!(flush_list[0].0, 3);
            }
            _ => panic!("expected CondBlockExit"),
        }
    }

    #[test]
    fn ir_cache_overflow_is_fatal() {
        let config = DynarecConfig { ir_cache_size: 2, ..DynarecConfig::default() };
        let mut c = IrContext::new(&config);
        // Arena already holds the entry-zero node (capacity 2 remaining: 1).
        c.emit_set_constant(Constant::U32(1), 5).unwrap();
        let err = c.emit_set_constant(Constant::U32(2), 6).unwrap_err();
        assert_eq!(err, TranslationError::IrCacheOverflow { capacity: 2 });
    }
}
