//! Bump-allocated arena holding every compiled block's host ops (C5).
//!
//! A block is a contiguous slice `arena[entry..entry+len]`; nothing is ever
//! freed individually. When a new block would not fit, the whole arena (and
//! the block cache pointing into it) is dropped at once rather than doing
//! any per-block bookkeeping.

use crate::cache::BlockCache;
use crate::emit::HostOp;

pub struct CodeCache {
    arena: Vec<HostOp>,
    capacity: usize,
}

impl CodeCache {
    pub fn new(capacity: usize) -> CodeCache {
        CodeCache { arena: Vec::with_capacity(capacity.min(4096)), capacity }
    }

    pub fn used(&self) -> usize {
        self.arena.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `ops` as one contiguous block, flushing the whole arena (and
    /// `block_cache`, since every entry it holds would now point past a
    /// truncated arena) first if the new block would not fit.
    pub fn install(&mut self, ops: Vec<HostOp>, block_cache: &mut BlockCache) -> (usize, usize) {
        let n = ops.len();
        if self.arena.len() + n >= self.capacity {
            self.arena.clear();
            block_cache.invalidate_all();
        }
        let start = self.arena.len();
        self.arena.extend(ops);
        (start, n)
    }

    pub fn slice(&self, entry: usize, len: usize) -> &[HostOp] {
        &self.arena[entry..entry + len]
    }

    /// Drops every compiled block unconditionally.
    pub fn flush(&mut self) {
        self.arena.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::block_cache::TranslatedBlock;

    fn ops(n: usize) -> Vec<HostOp> {
        vec![HostOp::Nop; n]
    }

    #[test]
    fn install_returns_a_growing_contiguous_region() {
        let mut cache = CodeCache::new(1024);
        let mut blocks = BlockCache::new();
        let (e1, l1) = cache.install(ops(4), &mut blocks);
        let (e2, _) = cache.install(ops(4), &mut blocks);
        assert_eq!(e1, 0);
        assert_eq!(l1, 4);
        assert_eq!(e2, 4);
    }

    #[test]
    fn overflow_flushes_arena_and_block_cache() {
        let mut cache = CodeCache::new(8);
        let mut blocks = BlockCache::new();
        blocks.install(
            0x1000,
            TranslatedBlock { guest_start_paddr: 0x1000, guest_size_bytes: 4, host_entry: 0, host_len: 4 },
        );
        cache.install(ops(4), &mut blocks);
        // used(4) + 4 >= capacity(8) triggers a flush before this insert.
        cache.install(ops(4), &mut blocks);
        assert!(blocks.lookup(0x1000).is_none());
        assert_eq!(cache.used(), 4);
    }
}
