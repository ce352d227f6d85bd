//! Key-list association helpers (spec §4.8). A *container* item is a
//! reserved item whose payload is a key-list codec buffer (spec §3.6):
//! `ptrans(key)` listing transaction ids, `colease(key)` listing session
//! ids, a transaction item listing the user keys it touched, a session item
//! listing the same, and a `Q_INV` lease item listing transaction ids.
//! Every add re-materializes the container by allocating a fresh reserved
//! item sized for the appended entry and replacing the old one in place;
//! every remove mutates the existing item's buffer (shrinking never needs
//! reallocation) and unlinks the container once its list is empty.

use leasecache_core::assoc::AssocIndex;
use leasecache_core::error::Result;
use leasecache_core::item::ItemRole;
use leasecache_core::keylist::{self, KeyList};
use leasecache_core::slab::{ItemRef, SlabAllocator};
use leasecache_core::store::ItemStore;
use leasecache_core::time::AbsTime;

use crate::keys::{colease_key, lease_key, ptrans_key};

/// Adds `entry` to the key-list container at `container_key`, creating it
/// (with `role`) if `existing` is `None`. A no-op, returning `existing`
/// unchanged, if `entry` is already present. `exptime` is only consulted
/// when a fresh container item is allocated.
///
/// The returned `ItemRef` carries no outstanding refcount beyond its pin:
/// every container role here is reserved, so the item is pinned immediately
/// after linking and the allocation's own initial refcount is released in
/// the same call, leaving refcount == 1 (the pin) as spec §8 property 2
/// requires for an idle pinned item.
pub fn assoc_add<S: SlabAllocator, A: AssocIndex>(
    store: &mut ItemStore<S, A>,
    container_key: &[u8],
    existing: Option<ItemRef>,
    entry: &[u8],
    role: ItemRole,
    exptime: AbsTime,
    now: AbsTime,
) -> Result<ItemRef> {
    let mut buf = match existing {
        Some(item) => store.slab.item(item).data.clone(),
        None => Vec::new(),
    };
    if KeyList::new(&buf).check(entry) {
        return Ok(existing.expect("check() against an empty buffer is always false"));
    }
    keylist::addkey(&mut buf, entry)?;

    let new_item = store.alloc(container_key, 0, exptime, buf.len(), role, now)?;
    store.slab.item_mut(new_item).data = buf;
    match existing {
        Some(old) => {
            let old_role = store.slab.item(old).role;
            store.replace(old, new_item, now);
            // `unlink` only auto-unpins lease/colease/ptrans/hotkeys; session
            // and transaction containers need this explicit follow-up or the
            // superseded item leaks its pin forever (spec §4.2, §9).
            if matches!(old_role, ItemRole::Session { .. } | ItemRole::Transaction) {
                store.unset_pinned(old);
            }
        }
        None => store.link(new_item, now),
    }
    if role.is_reserved() {
        store.slab.item_mut(new_item).set_pinned();
    }
    store.remove(new_item);
    Ok(new_item)
}

/// Removes `entry` from the container's key-list in place. Returns `true`
/// if the container is now empty, in which case it has already been
/// unlinked by this call.
pub fn remove_entry_from_list<S: SlabAllocator, A: AssocIndex>(
    store: &mut ItemStore<S, A>,
    container: ItemRef,
    entry: &[u8],
) -> Result<bool> {
    let mut buf = store.slab.item(container).data.clone();
    keylist::rmvkey(&mut buf, entry)?;
    let empty = buf.is_empty();
    store.slab.item_mut(container).data = buf;
    if empty {
        store.unlink(container);
    }
    Ok(empty)
}

/// `ptrans(key) += tid` — the `T`-prefixed list of transactions referencing
/// `key` (spec §3.2, §4.8).
pub fn assoc_key_tid<S: SlabAllocator, A: AssocIndex>(
    store: &mut ItemStore<S, A>,
    key: &[u8],
    tid: &[u8],
    now: AbsTime,
) -> Result<ItemRef> {
    let container_key = ptrans_key(key);
    let existing = store.index.find(&container_key);
    assoc_add(store, &container_key, existing, tid, ItemRole::Ptrans, 0, now)
}

/// `transaction(tid) += key` — the unprefixed transaction item's own
/// key-list, the mirror of [`assoc_key_tid`] (spec §3.5, §4.8).
pub fn assoc_tid_ptrans<S: SlabAllocator, A: AssocIndex>(
    store: &mut ItemStore<S, A>,
    tid: &[u8],
    key: &[u8],
    now: AbsTime,
) -> Result<ItemRef> {
    let existing = store.index.find(tid);
    assoc_add(store, tid, existing, key, ItemRole::Transaction, 0, now)
}

/// `colease(key) += sid` — the `O`-prefixed list of sessions holding a
/// colease on `key` (spec §3.2, §4.8).
pub fn assoc_key_sid<S: SlabAllocator, A: AssocIndex>(
    store: &mut ItemStore<S, A>,
    key: &[u8],
    sid: &[u8],
    role: ItemRole,
    now: AbsTime,
) -> Result<ItemRef> {
    let container_key = colease_key(key);
    let existing = store.index.find(&container_key);
    assoc_add(store, &container_key, existing, sid, role, 0, now)
}

/// `session(sid) += key` — the unprefixed session item's own key-list, the
/// mirror of [`assoc_key_sid`] (spec §3.5, §4.8).
pub fn assoc_sid_colease<S: SlabAllocator, A: AssocIndex>(
    store: &mut ItemStore<S, A>,
    sid: &[u8],
    key: &[u8],
    sess_status: leasecache_core::item::SessStatus,
    now: AbsTime,
) -> Result<ItemRef> {
    let existing = store.index.find(sid);
    assoc_add(store, sid, existing, key, ItemRole::Session { status: sess_status }, 0, now)
}

/// `lease(key) += tid` — a `Q_INV` lease's value is itself a key-list of
/// transaction ids (spec §3.3, §4.8), unlike `Q_REF`/`Q_INCR` which carry a
/// single decimal token.
pub fn assoc_tid_lease<S: SlabAllocator, A: AssocIndex>(
    store: &mut ItemStore<S, A>,
    key: &[u8],
    tid: &[u8],
    exptime: AbsTime,
    now: AbsTime,
) -> Result<ItemRef> {
    let container_key = lease_key(key);
    let existing = store.index.find(&container_key);
    assoc_add(
        store,
        &container_key,
        existing,
        tid,
        ItemRole::Lease(leasecache_core::item::LeaseKind::QuarantineInvalidate),
        exptime,
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use leasecache_core::config::EngineConfig;
    use leasecache_memory::{MemoryIndex, MemorySlab};

    fn store() -> ItemStore<MemorySlab, MemoryIndex> {
        let config = EngineConfig::default();
        ItemStore::new(MemorySlab::new(&config), MemoryIndex::new(), config.use_cas, config.use_lru_eviction)
    }

    #[test]
    fn ptrans_grows_and_shrinks() {
        let mut store = store();
        let item = assoc_key_tid(&mut store, b"k", b"t1", 0).unwrap();
        assert!(KeyList::new(&store.slab.item(item).data).check(b"t1"));

        let item = assoc_key_tid(&mut store, b"k", b"t2", 0).unwrap();
        assert!(KeyList::new(&store.slab.item(item).data).check(b"t1"));
        assert!(KeyList::new(&store.slab.item(item).data).check(b"t2"));

        let container_key = ptrans_key(b"k");
        let container = store.index.find(&container_key).unwrap();
        let empty = remove_entry_from_list(&mut store, container, b"t1").unwrap();
        assert!(!empty);
        let empty = remove_entry_from_list(&mut store, container, b"t2").unwrap();
        assert!(empty);
        assert!(store.index.find(&container_key).is_none());
    }
}
