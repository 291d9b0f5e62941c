//! Tunables for the translation pipeline.
//!
//! Nothing in this module parses a file or a command line; a host harness is
//! expected to build a [`DynarecConfig`] (or use [`Default::default`]) and
//! hand it to [`crate::translator::Translator::new`].

/// Default values mirroring the reference constants of the system this
/// translator is modeled after.
pub mod defaults {
    /// Capacity of the per-block IR arena, in instructions. Four times the
    /// maximum number of guest instructions per block, since one guest
    /// instruction may lower to several IR nodes.
    pub const IR_CACHE_SIZE: usize = 4096;

    /// Capacity of the per-block conditional-exit flush-record arena.
    pub const IR_FLUSH_CACHE_SIZE: usize = 100;

    /// Maximum number of guest instructions translated into a single block
    /// before the decoder forces a block end.
    pub const MAX_BLOCK_INSTRUCTIONS: usize = 1024;

    /// Capacity of the code cache, measured in host-op slots (see the
    /// threaded-code host described in the crate's top-level docs).
    pub const CODE_CACHE_CAPACITY: usize = 1 << 20;

    /// log2 of the number of physical address bits owned by one block-cache
    /// outer slot. With `BLOCK_CACHE_INNER_BITS = 12`, each outer slot
    /// addresses a 4 KiB physical-address range.
    pub const BLOCK_CACHE_INNER_BITS: u32 = 12;

    /// Number of outer slots in the block cache, covering a 32-bit physical
    /// address space at `BLOCK_CACHE_INNER_BITS` granularity.
    pub const BLOCK_CACHE_OUTER_SIZE: usize = 1 << (32 - BLOCK_CACHE_INNER_BITS);
}

/// Runtime-tunable knobs for a [`crate::translator::Translator`].
///
/// The `Default` impl matches [`defaults`] exactly; construct a custom value
/// only to shrink the arenas for testing overflow behavior (see the IR cache
/// overflow test in `ir::tests`).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DynarecConfig {
    pub ir_cache_size: usize,
    pub ir_flush_cache_size: usize,
    pub max_block_instructions: usize,
    pub code_cache_capacity: usize,
}

impl Default for DynarecConfig {
    fn default() -> Self {
        DynarecConfig {
            ir_cache_size: defaults::IR_CACHE_SIZE,
            ir_flush_cache_size: defaults::IR_FLUSH_CACHE_SIZE,
            max_block_instructions: defaults::MAX_BLOCK_INSTRUCTIONS,
            code_cache_capacity: defaults::CODE_CACHE_CAPACITY,
        }
    }
}
