//! The item store (spec §4.2): allocation, linking and lifecycle for items
//! living behind a [`SlabAllocator`] + [`AssocIndex`] pair. Every public
//! method here runs under the engine's single `cache_lock` (spec §5) — the
//! store itself holds no lock of its own.

use crate::assoc::AssocIndex;
use crate::error::{Error, Result};
use crate::item::{ItemFlags, ItemRole, KEY_MAX_LEN};
use crate::lru::LruRegistry;
use crate::slab::{ItemRef, SlabAllocator, SlabId};
use crate::time::AbsTime;

/// Fixed per-item overhead folded into the slab-class sizing request
/// (header fields that aren't part of the variable key/value payload).
const ITEM_HDR_OVERHEAD: usize = 48;

/// Aggregate counters for items reclaimed because they had already expired
/// at the moment [`ItemStore::alloc`] needed their slot, broken out by the
/// lease subtype that occupied the slot (spec §4.2, §7 `expired_*` stats).
#[derive(Clone, Copy, Debug, Default)]
pub struct ExpiredCounters {
    pub leases: u64,
    pub i_leases: u64,
    pub q_leases: u64,
    pub c_leases: u64,
    pub o_leases: u64,
}

/// Owns the LRU registry and CAS/expiry bookkeeping around a slab allocator
/// and associative index pair (spec §4.2, §4.4).
pub struct ItemStore<S: SlabAllocator, A: AssocIndex> {
    pub slab: S,
    pub index: A,
    lru: LruRegistry,
    use_cas: bool,
    use_lru_eviction: bool,
    next_cas: u64,
    oldest_live: AbsTime,
    pub expired: ExpiredCounters,
}

impl<S: SlabAllocator, A: AssocIndex> ItemStore<S, A> {
    pub fn new(slab: S, index: A, use_cas: bool, use_lru_eviction: bool) -> Self {
        ItemStore {
            slab,
            index,
            lru: LruRegistry::new(),
            use_cas,
            use_lru_eviction,
            next_cas: if use_cas { 1 } else { 0 },
            oldest_live: 0,
            expired: ExpiredCounters::default(),
        }
    }

    /// 0 when CAS is disabled at link time (spec §3.1 `cas`); otherwise a
    /// monotonically increasing counter, one per [`ItemStore::link`] call.
    fn next_cas(&mut self) -> u64 {
        if !self.use_cas {
            return 0;
        }
        let v = self.next_cas;
        self.next_cas += 1;
        v
    }

    /// The five-step allocation policy (spec §4.2): reuse an already-expired
    /// candidate outright; otherwise try a fresh chunk; otherwise, if LRU
    /// eviction is enabled, fall back to the same candidate found in step
    /// one even though it hadn't expired; otherwise evict a whole slab;
    /// otherwise fail. `find_reusable` is consulted exactly once — the
    /// candidate it names is held as the unexpired fallback across the
    /// fresh-chunk attempt rather than looked up a second time, mirroring
    /// `uit`'s lifecycle in the reference allocator.
    pub fn alloc(
        &mut self,
        key: &[u8],
        dataflags: u32,
        exptime: AbsTime,
        nbyte: usize,
        role: ItemRole,
        now: AbsTime,
    ) -> Result<ItemRef> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if key.len() > KEY_MAX_LEN {
            return Err(Error::KeyTooLong(key.len()));
        }

        let reserved = role.is_reserved();
        let total = ITEM_HDR_OVERHEAD + key.len() + nbyte;
        let slab_id = self.slab.slab_id(total).ok_or(Error::NoFittingSlabClass(total))?;

        let candidate = self.lru.find_reusable(&self.slab, slab_id, reserved);

        if let Some(cand) = candidate {
            if self.slab.item(cand).is_expired(now) {
                self.account_expired(cand);
                self.reuse_item(cand);
                return Ok(self.init_item(cand, slab_id, key, dataflags, exptime, nbyte, role, now));
            }
        }
        let fallback = if self.use_lru_eviction { candidate } else { None };

        let fresh = if reserved { self.slab.get_reserved_item(slab_id, true) } else { self.slab.get_item(slab_id) };
        if let Some(fresh_ref) = fresh {
            return Ok(self.init_item(fresh_ref, slab_id, key, dataflags, exptime, nbyte, role, now));
        }

        if let Some(fallback_ref) = fallback {
            self.reuse_item(fallback_ref);
            return Ok(self.init_item(fallback_ref, slab_id, key, dataflags, exptime, nbyte, role, now));
        }

        let evicted = if reserved {
            self.slab.get_reserved_item_by_evict_slab(slab_id)
        } else {
            self.slab.get_item_by_evict_slab(slab_id)
        };
        if let Some(evicted_ref) = evicted {
            return Ok(self.init_item(evicted_ref, slab_id, key, dataflags, exptime, nbyte, role, now));
        }

        Err(Error::AllocationFailed(slab_id))
    }

    /// Tears an about-to-be-recycled item out of the index and its LRU
    /// queue without touching refcount bookkeeping beyond the pin it may
    /// be holding (spec §4.2: "item_reuse").
    fn reuse_item(&mut self, item: ItemRef) {
        self.slab.item_mut(item).unset_pinned();
        if self.slab.item(item).is_linked() {
            self.slab.item_mut(item).flags.remove(ItemFlags::LINKED);
            let key = self.slab.item(item).key.clone();
            self.index.delete(&key);
            self.lru.unlink(&mut self.slab, item);
        }
    }

    /// Inspects the subtype of an about-to-be-reclaimed expired item and
    /// folds it into the aggregate counters. Must run before
    /// [`ItemStore::reuse_item`]/[`ItemStore::init_item`] overwrite `role`
    /// (spec SPEC_FULL §9 open question: expired-lease accounting reads
    /// `role` before the slot is recycled, not after).
    fn account_expired(&mut self, item: ItemRef) {
        let role = self.slab.item(item).role;
        if role.has_i_lease() {
            self.expired.leases += 1;
            self.expired.i_leases += 1;
        } else if role.has_q_lease() {
            self.expired.leases += 1;
            self.expired.q_leases += 1;
        } else if role.has_c_lease() {
            self.expired.leases += 1;
            self.expired.c_leases += 1;
        } else if role.has_o_lease() {
            self.expired.leases += 1;
            self.expired.o_leases += 1;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn init_item(
        &mut self,
        item: ItemRef,
        slab_id: SlabId,
        key: &[u8],
        dataflags: u32,
        exptime: AbsTime,
        nbyte: usize,
        role: ItemRole,
        now: AbsTime,
    ) -> ItemRef {
        self.slab.item_mut(item).refcount = 0;
        self.slab.acquire_refcount(item);

        let it = self.slab.item_mut(item);
        it.slab_id = slab_id;
        it.flags = if self.use_cas { ItemFlags::CAS } else { ItemFlags::EMPTY };
        it.role = role;
        it.cas = 0;
        it.exptime = exptime;
        it.atime = now;
        it.key = key.to_vec();
        it.data = vec![0u8; nbyte];
        it.dataflags = dataflags;
        it.config_number = 0;
        it.lru_prev = None;
        it.lru_next = None;
        item
    }

    /// Assigns a fresh CAS value, marks the item linked, inserts it into
    /// the associative index and links it at the tail of its LRU queue
    /// (spec §4.2).
    pub fn link(&mut self, item: ItemRef, now: AbsTime) {
        let cas = self.next_cas();
        let it = self.slab.item_mut(item);
        it.cas = cas;
        it.flags.insert(ItemFlags::LINKED);
        let key = it.key.clone();
        self.index.insert(&key, item);
        self.lru.link_tail(&mut self.slab, item, true, now);
    }

    /// General-purpose teardown (spec §4.2): automatically clears the pin
    /// on lease/colease/ptrans/hotkeys items, but NOT on session/transaction
    /// items — those require the caller to follow up with
    /// [`ItemStore::unset_pinned`] separately, mirroring the reference
    /// implementation's `_item_unlink(sess_it); item_unset_pinned(sess_it);`
    /// call pairs rather than folding the unpin into `_item_unlink` itself.
    pub fn unlink(&mut self, item: ItemRef) {
        let role = self.slab.item(item).role;
        let auto_unpins = matches!(role, ItemRole::Lease(_) | ItemRole::Colease(_) | ItemRole::Ptrans | ItemRole::Hotkeys);
        if auto_unpins {
            self.slab.item_mut(item).unset_pinned();
        }

        if self.slab.item(item).is_linked() {
            self.slab.item_mut(item).flags.remove(ItemFlags::LINKED);
            let key = self.slab.item(item).key.clone();
            self.index.delete(&key);
            self.lru.unlink(&mut self.slab, item);
        }

        self.maybe_free(item);
    }

    /// Explicit unpin for session/transaction items, called by the engine
    /// layer immediately after [`ItemStore::unlink`] (spec §4.2, §9).
    pub fn unset_pinned(&mut self, item: ItemRef) {
        self.slab.item_mut(item).unset_pinned();
        self.maybe_free(item);
    }

    fn maybe_free(&mut self, item: ItemRef) {
        let it = self.slab.item(item);
        if it.is_linked() || it.refcount != 0 {
            return;
        }
        if it.role.is_reserved() {
            self.slab.put_reserved_item(item, true);
        } else {
            self.slab.put_item(item);
        }
    }

    /// Repositions `item` to the tail of its LRU queue if it hasn't moved
    /// recently (spec §4.1, §4.2).
    pub fn touch(&mut self, item: ItemRef, now: AbsTime) {
        self.lru.touch(&mut self.slab, item, now);
    }

    /// Atomically swaps `old` out for `new` (spec §4.2 `replace`): unlinks
    /// `old` first so a duplicate key never sits in the index at once, then
    /// links `new`.
    pub fn replace(&mut self, old: ItemRef, new: ItemRef, now: AbsTime) {
        self.unlink(old);
        self.link(new, now);
    }

    /// Releases the caller's reference, returning the item to its slab free
    /// list once both unlinked and unreferenced (spec §4.2 `remove`).
    pub fn remove(&mut self, item: ItemRef) {
        self.slab.release_refcount(item);
        self.maybe_free(item);
    }

    /// Looks a key up, lazily evicting it if its own `exptime` has passed or
    /// it predates `oldest_live` (spec §4.2 `get`, §4.6 flush). On a hit,
    /// hands the caller one refcount they must release via
    /// [`ItemStore::remove`].
    pub fn get(&mut self, key: &[u8], now: AbsTime) -> Option<ItemRef> {
        let item = self.index.find(key)?;
        let it = self.slab.item(item);
        let expired = it.is_expired(now);
        let stale = self.oldest_live != 0 && it.atime <= self.oldest_live;
        if expired || stale {
            self.unlink(item);
            return None;
        }
        self.slab.acquire_refcount(item);
        Some(item)
    }

    /// Marks every currently-linked item as invalidated from now on by
    /// raising the high-water mark (spec §4.6). Idempotent: a repeat call
    /// with the same or an older `oldest_live` observes no further items to
    /// reclaim, since the per-queue walk below always stops at the first
    /// item whose `atime` already falls under the current mark.
    pub fn flush_expired(&mut self, oldest_live: AbsTime) {
        self.oldest_live = oldest_live;
        for slab_id in SlabId::MIN..=SlabId::MAX {
            for reserved in [false, true] {
                loop {
                    let Some(cur) = self.lru.tail(slab_id, reserved) else { break };
                    if self.slab.item(cur).atime < oldest_live {
                        break;
                    }
                    self.unlink(cur);
                }
            }
        }
    }

    /// Produces a `cachedump`-style listing of up to `limit` regular-pool
    /// items in `slab_id` (spec §4.1, §6).
    pub fn cache_dump(&self, slab_id: SlabId, limit: usize) -> Vec<u8> {
        self.lru.cache_dump(&self.slab, slab_id, limit)
    }
}
