//! The slab allocator collaborator contract (spec §4.4, §6). The slab
//! allocator itself — chunking, free lists, slab eviction policy — is out
//! of scope (spec §1); the core only ever reaches it through this trait.

use crate::item::Item;

/// A size-bucket identifier. `INVALID` (`u8::MAX`) signals "no slab class
/// fits this request" (spec §4.4 `slab_id`).
pub type SlabId = u8;
pub const SLAB_ID_INVALID: SlabId = u8::MAX;
pub const SLABCLASS_MIN_ID: SlabId = 1;
pub const SLABCLASS_MAX_ID: SlabId = 63;

/// An opaque handle to an item living inside the slab allocator's memory.
/// Stands in for the reference implementation's raw `struct item *`: since
/// the allocator itself is an external collaborator, the core never
/// dereferences slab memory directly, only through
/// [`SlabAllocator::item`]/[`SlabAllocator::item_mut`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ItemRef(pub u32);

/// External collaborator contract (spec §4.4). A concrete implementation
/// (e.g. `leasecache-memory::MemorySlab`) owns the actual chunk memory,
/// per-class free lists, and eviction policy; the core only calls through
/// this trait.
pub trait SlabAllocator {
    /// Maps a total item size (header + key + value) to a slab class, or
    /// `None` if no class is large enough.
    fn slab_id(&self, total_bytes: usize) -> Option<SlabId>;

    /// Pulls a fresh item from the regular pool of `slab_id`, allocating a
    /// new chunk if the class has no free slot.
    fn get_item(&mut self, slab_id: SlabId) -> Option<ItemRef>;

    /// Pulls a fresh item from the reserved pool. `lock_slab` mirrors the
    /// reference implementation's hint to avoid a second, redundant slab
    /// lock acquisition when the caller already holds it transitively
    /// (spec §5); a single-mutex Rust implementation has no second lock to
    /// avoid, so implementations may ignore it, but the parameter is kept
    /// to preserve the call-site contract.
    fn get_reserved_item(&mut self, slab_id: SlabId, lock_slab: bool) -> Option<ItemRef>;

    /// Evicts a whole slab of `slab_id` from the regular pool and returns
    /// one of its freed items, used when LRU-item eviction is disabled but
    /// slab eviction is enabled (spec §4.2 alloc policy, step 4).
    fn get_item_by_evict_slab(&mut self, slab_id: SlabId) -> Option<ItemRef>;

    /// Reserved-pool counterpart of [`SlabAllocator::get_item_by_evict_slab`].
    fn get_reserved_item_by_evict_slab(&mut self, slab_id: SlabId) -> Option<ItemRef>;

    /// Returns an item to the regular pool's free list.
    fn put_item(&mut self, item: ItemRef);

    /// Returns an item to the reserved pool's free list.
    fn put_reserved_item(&mut self, item: ItemRef, lock_slab: bool);

    /// Every item refcount increment mirrors onto its owning slab (spec §4.4).
    fn acquire_refcount(&mut self, item: ItemRef);

    /// Every item refcount decrement mirrors onto its owning slab (spec §4.4).
    fn release_refcount(&mut self, item: ItemRef);

    /// Notifies the slab subsystem an item in the regular pool was
    /// (re)linked at the tail of its LRU queue, so per-class eviction bias
    /// (write-only / read-only / access-based) can be updated.
    fn lruq_touch(&mut self, item: ItemRef, allocated: bool);

    /// Reserved-pool counterpart of [`SlabAllocator::lruq_touch`].
    fn lruq_touch_reserved(&mut self, item: ItemRef, allocated: bool);

    fn item(&self, item: ItemRef) -> &Item;

    fn item_mut(&mut self, item: ItemRef) -> &mut Item;
}
