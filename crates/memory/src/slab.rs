//! A single-process arena-backed [`SlabAllocator`] implementation. Chunk
//! sizing follows the classic memcached growth-factor scheme (spec §4.4 is
//! silent on the slab allocator's own internals — this crate only has to
//! satisfy the trait contract, not reproduce a particular slab layout).
//!
//! Whole-slab eviction (`get_item_by_evict_slab` / its reserved-pool
//! counterpart) is intentionally unimplemented here: evicting a slab page
//! means forcibly reclaiming every item on it, which requires coordinating
//! with the associative index and LRU registry that own those items —
//! collaborators this allocator has no handle to (spec §1: slab chunking
//! and eviction policy are out of scope). Both methods always return
//! `None`; an [`leasecache_core::store::ItemStore::alloc`] call that
//! reaches step four in a capacity-bounded [`MemorySlab`] fails cleanly
//! with `AllocationFailed` rather than silently fabricating eviction
//! mechanics we have no sound way to implement.

use leasecache_core::item::Item;
use leasecache_core::slab::{ItemRef, SlabAllocator, SlabId, SLABCLASS_MAX_ID, SLABCLASS_MIN_ID};
use leasecache_core::EngineConfig;

/// In-process slab allocator. `arena[i]` holds the `Item` for `ItemRef(i)`;
/// free lists are per slab class, one for the regular pool and one for the
/// reserved pool.
pub struct MemorySlab {
    classes: Vec<usize>,
    arena: Vec<Item>,
    free_regular: Vec<Vec<u32>>,
    free_reserved: Vec<Vec<u32>>,
    /// Caps total arena growth; `None` means unbounded. Set this to force
    /// deterministic allocation-exhaustion scenarios in tests.
    capacity: Option<usize>,
}

fn build_classes(config: &EngineConfig) -> Vec<usize> {
    let mut classes = Vec::new();
    let mut size = config.slab_chunk_size_min;
    while size <= config.slab_chunk_size_max && classes.len() < (SLABCLASS_MAX_ID - SLABCLASS_MIN_ID + 1) as usize {
        classes.push(size);
        let next = (size as f64 * config.slab_growth_factor).ceil() as usize;
        if next <= size {
            break;
        }
        size = next;
    }
    classes
}

impl MemorySlab {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_capacity(config, None)
    }

    pub fn with_capacity(config: &EngineConfig, capacity: Option<usize>) -> Self {
        let classes = build_classes(config);
        let n = classes.len();
        MemorySlab {
            classes,
            arena: Vec::new(),
            free_regular: vec![Vec::new(); n + 1],
            free_reserved: vec![Vec::new(); n + 1],
            capacity,
        }
    }

    fn fresh(&mut self, slab_id: SlabId) -> Option<ItemRef> {
        if let Some(cap) = self.capacity {
            if self.arena.len() >= cap {
                return None;
            }
        }
        let idx = self.arena.len() as u32;
        self.arena.push(Item::blank(slab_id));
        Some(ItemRef(idx))
    }
}

impl SlabAllocator for MemorySlab {
    fn slab_id(&self, total_bytes: usize) -> Option<SlabId> {
        self.classes
            .iter()
            .position(|&size| size >= total_bytes)
            .map(|pos| SLABCLASS_MIN_ID + pos as SlabId)
    }

    fn get_item(&mut self, slab_id: SlabId) -> Option<ItemRef> {
        if let Some(idx) = self.free_regular[slab_id as usize].pop() {
            return Some(ItemRef(idx));
        }
        self.fresh(slab_id)
    }

    fn get_reserved_item(&mut self, slab_id: SlabId, _lock_slab: bool) -> Option<ItemRef> {
        if let Some(idx) = self.free_reserved[slab_id as usize].pop() {
            return Some(ItemRef(idx));
        }
        self.fresh(slab_id)
    }

    fn get_item_by_evict_slab(&mut self, _slab_id: SlabId) -> Option<ItemRef> {
        None
    }

    fn get_reserved_item_by_evict_slab(&mut self, _slab_id: SlabId) -> Option<ItemRef> {
        None
    }

    fn put_item(&mut self, item: ItemRef) {
        let slab_id = self.arena[item.0 as usize].slab_id;
        self.free_regular[slab_id as usize].push(item.0);
    }

    fn put_reserved_item(&mut self, item: ItemRef, _lock_slab: bool) {
        let slab_id = self.arena[item.0 as usize].slab_id;
        self.free_reserved[slab_id as usize].push(item.0);
    }

    fn acquire_refcount(&mut self, item: ItemRef) {
        self.arena[item.0 as usize].refcount += 1;
    }

    fn release_refcount(&mut self, item: ItemRef) {
        let it = &mut self.arena[item.0 as usize];
        it.refcount = it.refcount.saturating_sub(1);
    }

    fn lruq_touch(&mut self, _item: ItemRef, _allocated: bool) {}

    fn lruq_touch_reserved(&mut self, _item: ItemRef, _allocated: bool) {}

    fn item(&self, item: ItemRef) -> &Item {
        &self.arena[item.0 as usize]
    }

    fn item_mut(&mut self, item: ItemRef) -> &mut Item {
        &mut self.arena[item.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slab_id_picks_smallest_fitting_class() {
        let config = EngineConfig::default();
        let slab = MemorySlab::new(&config);
        let id_small = slab.slab_id(64).unwrap();
        let id_large = slab.slab_id(4096).unwrap();
        assert!(id_large > id_small);
    }

    #[test]
    fn oversized_request_has_no_fitting_class() {
        let config = EngineConfig::default();
        let slab = MemorySlab::new(&config);
        assert!(slab.slab_id(config.slab_chunk_size_max * 2).is_none());
    }

    #[test]
    fn freed_item_is_reused_before_growing_the_arena() {
        let config = EngineConfig::default();
        let mut slab = MemorySlab::new(&config);
        let id = slab.slab_id(64).unwrap();
        let a = slab.get_item(id).unwrap();
        slab.put_item(a);
        let b = slab.get_item(id).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn capacity_bound_exhausts_cleanly() {
        let config = EngineConfig::default();
        let mut slab = MemorySlab::with_capacity(&config, Some(1));
        let id = slab.slab_id(64).unwrap();
        assert!(slab.get_item(id).is_some());
        assert!(slab.get_item(id).is_none());
    }
}
