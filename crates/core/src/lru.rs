//! LRU registry (spec §4.1): two arrays of intrusive doubly-linked
//! sequences indexed by slab class, one for the regular pool and one for
//! the reserved pool, each ordered oldest-to-newest by `atime`.

use crate::item::Item;
use crate::slab::{ItemRef, SlabAllocator, SlabId};
use crate::time::AbsTime;

/// We only reposition items in the LRU queue if they haven't been
/// repositioned in this many seconds, to avoid churning on hot items
/// (spec §4.1).
pub const ITEM_UPDATE_INTERVAL: AbsTime = 60;

/// Bound on how many items `find_reusable` walks from the head before
/// giving up (spec §4.1).
pub const ITEM_LRUQ_MAX_TRIES: u32 = 50;

/// 'cachedump' responses are capped at 2 MiB (spec §4.1, §6).
pub const ITEM_CACHEDUMP_MEMLIMIT: usize = 2 * 1024 * 1024;

const SLAB_CLASSES: usize = 256;

#[derive(Clone, Copy, Default)]
struct Queue {
    head: Option<ItemRef>,
    tail: Option<ItemRef>,
}

/// Per-slab-class ordered queues for the regular and reserved pools.
pub struct LruRegistry {
    regular: Vec<Queue>,
    reserved: Vec<Queue>,
}

impl Default for LruRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LruRegistry {
    pub fn new() -> Self {
        LruRegistry { regular: vec![Queue::default(); SLAB_CLASSES], reserved: vec![Queue::default(); SLAB_CLASSES] }
    }

    fn queue_mut(&mut self, slab_id: SlabId, reserved: bool) -> &mut Queue {
        if reserved {
            &mut self.reserved[slab_id as usize]
        } else {
            &mut self.regular[slab_id as usize]
        }
    }

    fn queue(&self, slab_id: SlabId, reserved: bool) -> &Queue {
        if reserved {
            &self.reserved[slab_id as usize]
        } else {
            &self.regular[slab_id as usize]
        }
    }

    /// Stamps `atime = now`, inserts at the tail of the item's queue, and
    /// notifies the slab interface so per-class eviction bias can be
    /// updated (spec §4.1).
    pub fn link_tail<S: SlabAllocator>(&mut self, slab: &mut S, item: ItemRef, allocated: bool, now: AbsTime) {
        let (slab_id, reserved) = {
            let it = slab.item(item);
            (it.slab_id, it.role.is_reserved())
        };

        slab.item_mut(item).atime = now;

        let old_tail = self.queue(slab_id, reserved).tail;
        slab.item_mut(item).lru_prev = old_tail;
        slab.item_mut(item).lru_next = None;

        match old_tail {
            Some(tail) => slab.item_mut(tail).lru_next = Some(item),
            None => self.queue_mut(slab_id, reserved).head = Some(item),
        }
        self.queue_mut(slab_id, reserved).tail = Some(item);

        if reserved {
            slab.lruq_touch_reserved(item, allocated);
        } else {
            slab.lruq_touch(item, allocated);
        }
    }

    /// Removes `item` from whichever queue it is linked into.
    pub fn unlink<S: SlabAllocator>(&mut self, slab: &mut S, item: ItemRef) {
        let (slab_id, reserved, prev, next) = {
            let it = slab.item(item);
            (it.slab_id, it.role.is_reserved(), it.lru_prev, it.lru_next)
        };

        match prev {
            Some(p) => slab.item_mut(p).lru_next = next,
            None => self.queue_mut(slab_id, reserved).head = next,
        }
        match next {
            Some(n) => slab.item_mut(n).lru_prev = prev,
            None => self.queue_mut(slab_id, reserved).tail = prev,
        }

        let it = slab.item_mut(item);
        it.lru_prev = None;
        it.lru_next = None;
    }

    /// No-op if the item was linked within the last [`ITEM_UPDATE_INTERVAL`]
    /// seconds; otherwise unlink + re-link at the tail (spec §4.1).
    pub fn touch<S: SlabAllocator>(&mut self, slab: &mut S, item: ItemRef, now: AbsTime) {
        let atime = slab.item(item).atime;
        if now.saturating_sub(atime) < ITEM_UPDATE_INTERVAL {
            return;
        }
        self.unlink(slab, item);
        self.link_tail(slab, item, false, now);
    }

    /// Walks at most [`ITEM_LRUQ_MAX_TRIES`] items from the head of the
    /// queue for `slab_id`/`reserved`, skipping anything still referenced.
    /// A pinned reserved item (refcount held only by its own pin) is
    /// treated as free precisely when `reserved` is true. Returns the
    /// first free candidate encountered — the caller inspects
    /// [`Item::is_expired`] on the result to distinguish an expired reuse
    /// from a plain LRU eviction (spec §4.1, §4.2).
    pub fn find_reusable<S: SlabAllocator>(&self, slab: &S, slab_id: SlabId, reserved: bool) -> Option<ItemRef> {
        let mut cur = self.queue(slab_id, reserved).head;
        let mut tries = 0u32;

        while let Some(cur_ref) = cur {
            if tries >= ITEM_LRUQ_MAX_TRIES {
                break;
            }
            tries += 1;

            let it = slab.item(cur_ref);
            let free = if reserved { it.refcount <= 1 } else { it.refcount == 0 };
            if free {
                return Some(cur_ref);
            }
            cur = it.lru_next;
        }

        None
    }

    /// The current tail (most recently touched item) of a queue, used by
    /// [`crate::store::ItemStore::flush_expired`] to walk newest-to-oldest.
    pub fn tail(&self, slab_id: SlabId, reserved: bool) -> Option<ItemRef> {
        self.queue(slab_id, reserved).tail
    }

    /// Produces a `cachedump`-style listing of the regular queue for
    /// `slab_id`, walked head (oldest) to tail, up to `limit` lines or
    /// [`ITEM_CACHEDUMP_MEMLIMIT`] bytes, whichever comes first. Truncation
    /// is silent (spec §4.1, §6).
    pub fn cache_dump<S: SlabAllocator>(&self, slab: &S, slab_id: SlabId, limit: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut cur = self.queue(slab_id, false).head;
        let mut emitted = 0usize;

        while let Some(cur_ref) = cur {
            if emitted >= limit {
                break;
            }
            let it = slab.item(cur_ref);
            let line = format_cache_dump_line(it);
            if out.len() + line.len() + b"END\r\n".len() > ITEM_CACHEDUMP_MEMLIMIT {
                break;
            }
            out.extend_from_slice(&line);
            emitted += 1;
            cur = it.lru_next;
        }

        out.extend_from_slice(b"END\r\n");
        out
    }
}

fn format_cache_dump_line(it: &Item) -> Vec<u8> {
    let key = String::from_utf8_lossy(&it.key);
    format!("ITEM {} [{} b; {} s]\r\n", key, it.nbyte(), it.exptime).into_bytes()
}
