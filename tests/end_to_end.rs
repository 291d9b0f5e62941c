//! Black-box scenarios exercising the whole decode -> IR -> optimize ->
//! allocate -> emit -> execute pipeline through [`Translator`], rather than
//! any one stage in isolation. Guest programs are encoded by hand below
//! since this crate intentionally has no assembler.

use dynarec64::ir::ValueType;
use dynarec64::state::fpu::RoundingMode;
use dynarec64::{DynarecConfig, GuestBus, Translator};

/// Flat byte-addressable guest memory, big-endian, sized generously so test
/// programs never run off the end even with a wide `max_block_instructions`.
struct VecBus {
    mem: Vec<u8>,
}

impl VecBus {
    fn new(size: usize) -> VecBus {
        VecBus { mem: vec![0u8; size] }
    }

    fn put_word(&mut self, paddr: u64, word: u32) {
        let addr = paddr as usize;
        self.mem[addr..addr + 4].copy_from_slice(&word.to_be_bytes());
    }
}

impl GuestBus for VecBus {
    fn read(&mut self, ty: ValueType, paddr: u64) -> u64 {
        let addr = paddr as usize;
        let bytes = (ty.bits() / 8) as usize;
        let mut raw: u64 = 0;
        for b in &self.mem[addr..addr + bytes] {
            raw = (raw << 8) | *b as u64;
        }
        if ty.is_signed() {
            let shift = 64 - ty.bits();
            (((raw << shift) as i64) >> shift) as u64
        } else {
            raw
        }
    }

    fn write(&mut self, ty: ValueType, paddr: u64, value: u64) {
        let addr = paddr as usize;
        let bytes = (ty.bits() / 8) as usize;
        for (i, slot) in self.mem[addr..addr + bytes].iter_mut().enumerate() {
            let shift = (bytes - 1 - i) * 8;
            *slot = ((value >> shift) & 0xFF) as u8;
        }
    }
}

fn enc_ori(rt: u32, rs: u32, imm: u16) -> u32 {
    (0x0D << 26) | (rs << 21) | (rt << 16) | imm as u32
}

fn enc_add(rd: u32, rs: u32, rt: u32) -> u32 {
    (rs << 21) | (rt << 16) | (rd << 11) | 0x20
}

fn enc_sw(rt: u32, base: u32, offset: u16) -> u32 {
    (0x2B << 26) | (base << 21) | (rt << 16) | offset as u32
}

fn enc_lw(rt: u32, base: u32, offset: u16) -> u32 {
    (0x23 << 26) | (base << 21) | (rt << 16) | offset as u32
}

fn enc_beq(rs: u32, rt: u32, offset_words: u16) -> u32 {
    (0x04 << 26) | (rs << 21) | (rt << 16) | offset_words as u32
}

/// `add.s $f2, $f0, $f0`, encoded per this crate's own COP1 field mapping
/// (`fd` in bits 15-11, `fs` in bits 10-6, `ft` in bits 20-16 - see
/// `decode::decode_cop1_fmt`).
fn enc_add_s(fd: u32, fs: u32, ft: u32) -> u32 {
    const FMT_SINGLE: u32 = 0x10;
    (0x11 << 26) | (FMT_SINGLE << 21) | (ft << 16) | (fd << 11) | (fs << 6)
}

const KSEG0: u64 = 0x8000_0000;

#[test]
fn add_constant_round_trip() {
    let mut bus = VecBus::new(0x1000);
    bus.put_word(0x00, enc_ori(1, 0, 0x1234)); // ori r1, r0, 0x1234
    bus.put_word(0x04, enc_ori(2, 0, 0x5678)); // ori r2, r0, 0x5678
    bus.put_word(0x08, enc_add(3, 1, 2)); // add r3, r1, r2
    bus.put_word(0x0C, enc_sw(3, 0, 0)); // sw r3, 0(r0)

    let config = DynarecConfig { max_block_instructions: 4, ..Default::default() };
    let mut translator = Translator::new(KSEG0, config, bus);

    translator.translate_and_run(KSEG0).unwrap();

    assert_eq!(translator.state.gpr_read(3), 0x6EAC);
    let stored = translator.bus.read(ValueType::U32, 0);
    assert_eq!(stored, 0x0000_6EAC);
}

#[test]
fn branch_executes_delay_slot_then_skips_the_instruction_past_the_target() {
    let mut bus = VecBus::new(0x2000);
    bus.put_word(0x1000, enc_beq(0, 0, 2)); // beq r0, r0, +2 (always taken)
    bus.put_word(0x1004, enc_ori(1, 0, 0xBAD)); // delay slot: always executes
    bus.put_word(0x1008, enc_ori(1, 0, 0x600D)); // fallthrough-only: must not execute

    let mut translator = Translator::new(KSEG0 | 0x1000, DynarecConfig::default(), bus);
    let instructions = translator.translate_and_run(KSEG0 | 0x1000).unwrap();

    assert_eq!(instructions, 2, "block should stop after the delay slot");
    assert_eq!(translator.state.pc, KSEG0 | 0x100C);
    assert_eq!(translator.state.gpr_read(1), 0xBAD);
}

#[test]
fn tlb_miss_on_load_redirects_to_the_exception_vector() {
    const EXCEPTION_VECTOR: u64 = 0xFFFF_FFFF_8000_0180;
    let fault_vaddr: u64 = 0xC000_0000;

    let mut bus = VecBus::new(0x1000);
    bus.put_word(0x00, enc_lw(1, 2, 0)); // lw r1, 0(r2)

    let mut translator = Translator::new(KSEG0, DynarecConfig::default(), bus);
    translator.state.gpr_write(2, fault_vaddr);

    translator.translate_and_run(KSEG0).unwrap();

    let cause = translator.state.cop0.regs[13];
    assert_eq!((cause >> 2) & 0x1F, 2, "TlbLoad exception code");
    assert_eq!(translator.state.cop0.bad_vaddr(), fault_vaddr);
    assert_eq!(translator.state.cop0.epc(), translator.state.prev_pc);
    assert_eq!(translator.state.pc, EXCEPTION_VECTOR);
}

#[test]
fn fpu_subnormal_sum_flushes_to_min_positive_in_round_plus_inf() {
    let mut bus = VecBus::new(0x1000);
    bus.put_word(0x00, enc_add_s(2, 0, 0)); // add.s $f2, $f0, $f0

    let config = DynarecConfig { max_block_instructions: 1, ..Default::default() };
    let mut translator = Translator::new(KSEG0, config, bus);

    translator.state.fpu.regs[0] = 1; // smallest positive f32 subnormal
    translator.state.fpu.fcr31.flush_subnormals = true;
    translator.state.fpu.fcr31.rounding_mode = RoundingMode::PosInf;

    translator.translate_and_run(KSEG0).unwrap();

    let result_bits = translator.state.fpu.regs[2] as u32;
    assert_eq!(result_bits, f32::MIN_POSITIVE.to_bits());
    assert!(translator.state.fpu.fcr31.cause_underflow);
    assert!(translator.state.fpu.fcr31.cause_inexact);
    assert_ne!(translator.state.pc, 0xFFFF_FFFF_8000_0180, "no trap should fire");
}

#[test]
fn code_cache_churn_forces_bit_identical_retranslation() {
    let mut bus = VecBus::new(0x1000);
    bus.put_word(0x00, enc_ori(1, 0, 0x1111)); // block A, at paddr 0
    bus.put_word(0x10, enc_ori(2, 0, 0x2222)); // block B, at a distinct paddr

    // One guest instruction per block, and a code cache barely large enough
    // for one block's worth of ops, so installing a second, different block
    // always overflows and wipes out the first block's cache entry.
    let config = DynarecConfig { max_block_instructions: 1, code_cache_capacity: 1, ..Default::default() };
    let mut translator = Translator::new(KSEG0, config, bus);

    translator.translate_and_run(KSEG0).unwrap();
    assert_eq!(translator.state.gpr_read(1), 0x1111);

    translator.translate_and_run(KSEG0 | 0x10).unwrap();
    assert_eq!(translator.state.gpr_read(2), 0x2222);

    // Overwrite r1 so the next run can only restore 0x1111 by actually
    // re-translating and re-executing block A, not by replaying stale state.
    translator.state.gpr_write(1, 0);
    translator.translate_and_run(KSEG0).unwrap();
    assert_eq!(translator.state.gpr_read(1), 0x1111);
}

/// Re-derives the expected end state directly from the semantics this crate
/// implements rather than comparing against a shipped interpreter (none
/// ships with this crate - see the design notes on differential testing).
/// A passing run here is the "differential" check for this straight-line
/// integer program.
#[test]
fn differential_style_check_against_hand_derived_semantics() {
    let mut bus = VecBus::new(0x1000);
    bus.put_word(0x00, enc_ori(4, 0, 0x000F));
    bus.put_word(0x04, enc_ori(5, 0, 0x00F0));
    bus.put_word(0x08, enc_add(6, 4, 5));

    let config = DynarecConfig { max_block_instructions: 3, ..Default::default() };
    let mut translator = Translator::new(KSEG0, config, bus);
    translator.translate_and_run(KSEG0).unwrap();

    let expected_r4 = 0x000Fu64;
    let expected_r5 = 0x00F0u64;
    assert_eq!(translator.state.gpr_read(4), expected_r4);
    assert_eq!(translator.state.gpr_read(5), expected_r5);
    assert_eq!(translator.state.gpr_read(6), expected_r4 + expected_r5);
    assert_eq!(translator.state.gpr_read(0), 0, "r0 is hardwired zero");
}
