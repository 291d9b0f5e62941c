//! Two-level guest-physical-address -> translated-block lookup (C4).

use crate::config::defaults;

/// A translated block's location in the code cache plus enough guest
/// metadata to decide whether a cached entry still covers the requested
/// address range.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TranslatedBlock {
    pub guest_start_paddr: u32,
    pub guest_size_bytes: u32,
    pub host_entry: usize,
    pub host_len: usize,
}

const INNER_BITS: u32 = defaults::BLOCK_CACHE_INNER_BITS;
const INNER_SIZE: usize = 1 << INNER_BITS;
const OUTER_SIZE: usize = defaults::BLOCK_CACHE_OUTER_SIZE;

type InnerTable = Box<[Option<TranslatedBlock>; INNER_SIZE]>;

/// The outer table is a flat `Vec`; each slot lazily allocates its inner
/// table on first [`BlockCache::install`]. `invalidate_all` only nulls the
/// outer slots, matching the reference implementation's whole-cache flush:
/// the inner tables stay allocated (and get overwritten lazily) rather than
/// being freed on every flush.
pub struct BlockCache {
    outer: Vec<Option<InnerTable>>,
}

fn split(paddr: u32) -> (usize, usize) {
    let paddr = paddr as usize;
    (paddr >> INNER_BITS, paddr & (INNER_SIZE - 1))
}

impl BlockCache {
    pub fn new() -> BlockCache {
        let mut outer = Vec::with_capacity(OUTER_SIZE);
        outer.resize_with(OUTER_SIZE, || None);
        BlockCache { outer }
    }

    pub fn lookup(&self, paddr: u32) -> Option<TranslatedBlock> {
        let (outer_idx, inner_idx) = split(paddr);
        self.outer[outer_idx].as_ref().and_then(|inner| inner[inner_idx])
    }

    pub fn install(&mut self, paddr: u32, block: TranslatedBlock) {
        let (outer_idx, inner_idx) = split(paddr);
        let inner = self.outer[outer_idx].get_or_insert_with(|| Box::new([None; INNER_SIZE]));
        inner[inner_idx] = Some(block);
    }

    /// Nulls every outer slot. Matches the reference's `flush_code_cache`:
    /// only the outer pointers are reset, not a per-entry walk.
    pub fn invalidate_all(&mut self) {
        for slot in self.outer.iter_mut() {
            *slot = None;
        }
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        BlockCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(paddr: u32) -> TranslatedBlock {
        TranslatedBlock {
            guest_start_paddr: paddr,
            guest_size_bytes: 4,
            host_entry: 0,
            host_len: 1,
        }
    }

    #[test]
    fn absent_until_installed() {
        let cache = BlockCache::new();
        assert!(cache.lookup(0x1000).is_none());
    }

    #[test]
    fn install_then_lookup_round_trips() {
        let mut cache = BlockCache::new();
        cache.install(0x1000, block(0x1000));
        assert_eq!(cache.lookup(0x1000), Some(block(0x1000)));
    }

    #[test]
    fn invalidate_all_clears_every_entry() {
        let mut cache = BlockCache::new();
        cache.install(0x1000, block(0x1000));
        cache.invalidate_all();
        assert!(cache.lookup(0x1000).is_none());
    }

    #[test]
    fn highest_address_does_not_wrap_into_slot_zero() {
        let mut cache = BlockCache::new();
        cache.install(0xFFFF_FFFC, block(0xFFFF_FFFC));
        assert!(cache.lookup(0).is_none());
        assert_eq!(cache.lookup(0xFFFF_FFFC), Some(block(0xFFFF_FFFC)));
    }
}
