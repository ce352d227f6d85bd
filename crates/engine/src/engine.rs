//! The lease/session state machine and operation facade (spec §4.7, §5).
//! [`Engine`] owns an [`ItemStore`], a [`Clock`], the lease token generator
//! and the running [`EngineStats`]; [`EngineHandle`] wraps it behind a
//! single [`parking_lot::Mutex`] modeling the reference implementation's one
//! global `cache_lock` — every façade method here runs with that lock held
//! for its whole duration, so the methods on [`Engine`] itself never need
//! their own synchronization.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::instrument;

use leasecache_core::assoc::AssocIndex;
use leasecache_core::config::EngineConfig;
use leasecache_core::item::{ColeaseKind, ItemRole, LeaseKind, SessStatus};
use leasecache_core::keylist::KeyList;
use leasecache_core::slab::{ItemRef, SlabAllocator};
use leasecache_core::store::ItemStore;
use leasecache_core::time::{AbsTime, Clock};

use crate::container::{
    assoc_key_sid, assoc_key_tid, assoc_sid_colease, assoc_tid_lease, assoc_tid_ptrans, remove_entry_from_list,
};
use crate::error::Result;
use crate::keys::{colease_key, lease_key, pending_marker_key, pending_version_key, ptrans_key};
use crate::lease_token::LeaseTokenGen;
use crate::result::{
    CiGetOutcome, ClientError, CoResult, IncrError, IqError, IqOutcome, OqReadOutcome, OqWriteOutcome, StoreResult,
    TxResult,
};
use crate::stats::EngineStats;

fn encode_u64(v: u64) -> Vec<u8> {
    v.to_string().into_bytes()
}

fn decode_u64(bytes: &[u8]) -> Option<u64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// The behavioral heart of the cache: item store plus lease/session state
/// machine, parameterized over the storage collaborators and the clock so
/// tests can swap in [`leasecache_core::time::FrozenClock`] (spec §2, §9).
pub struct Engine<S: SlabAllocator, A: AssocIndex, C: Clock> {
    store: ItemStore<S, A>,
    clock: C,
    config: EngineConfig,
    stats: EngineStats,
    lease_tokens: LeaseTokenGen,
}

impl<S: SlabAllocator, A: AssocIndex, C: Clock> Engine<S, A, C> {
    pub fn new(slab: S, index: A, clock: C, config: EngineConfig) -> Self {
        Engine {
            store: ItemStore::new(slab, index, config.use_cas, config.use_lru_eviction),
            clock,
            config,
            stats: EngineStats::default(),
            lease_tokens: LeaseTokenGen::new(),
        }
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    pub fn item(&self, item: ItemRef) -> &leasecache_core::item::Item {
        self.store.slab.item(item)
    }

    /// Releases a refcount handed out by a previous call (`get`, `iqget`'s
    /// `Value`, `ciget`'s `PendingVersion`, ...) (spec §4.2 `remove`).
    pub fn release_item(&mut self, item: ItemRef) {
        self.store.remove(item);
    }

    fn now(&self) -> AbsTime {
        self.clock.now()
    }

    /// Marks every item currently live as invalidated from now on, the
    /// `flush_all` primitive (spec §4.6). `oldest_live` is set to `now - 1`,
    /// not `now`, so items linked in the same clock second as the flush
    /// survive it — matching the reference implementation's
    /// `settings.oldest_live = current_time - 1`.
    #[instrument(skip(self))]
    pub fn flush_all(&mut self) {
        let now = self.now();
        self.store.flush_expired(now.saturating_sub(1));
        self.stats.merge_expired(self.store.expired);
    }

    pub fn cache_dump(&self, slab_id: leasecache_core::slab::SlabId, limit: usize) -> Vec<u8> {
        self.store.cache_dump(slab_id, limit)
    }

    // ---- plain value storage (spec §4.7.2) --------------------------------

    /// Allocates, links (replacing `existing` if present) and immediately
    /// releases the allocation's own refcount — a fire-and-forget store,
    /// never handing a live reference back to the caller (spec §8 property
    /// 2: idle items carry no refcount beyond their pin, zero for regular
    /// items).
    fn store_value(
        &mut self,
        key: &[u8],
        dataflags: u32,
        exptime: AbsTime,
        data: &[u8],
        pending: bool,
        existing: Option<ItemRef>,
        now: AbsTime,
    ) -> Result<()> {
        let item = self.store.alloc(key, dataflags, exptime, data.len(), ItemRole::Value { pending }, now)?;
        self.store.slab.item_mut(item).data = data.to_vec();
        match existing {
            Some(old) => self.store.replace(old, item, now),
            None => self.store.link(item, now),
        }
        self.store.remove(item);
        Ok(())
    }

    #[instrument(skip(self, data))]
    pub fn set(&mut self, key: &[u8], dataflags: u32, exptime: AbsTime, data: &[u8]) -> Result<StoreResult> {
        let now = self.now();
        let existing = self.store.get(key, now);
        self.store_value(key, dataflags, exptime, data, false, existing, now)?;
        if let Some(old) = existing {
            self.store.remove(old);
        }
        Ok(StoreResult::Stored)
    }

    #[instrument(skip(self, data))]
    pub fn add(&mut self, key: &[u8], dataflags: u32, exptime: AbsTime, data: &[u8]) -> Result<StoreResult> {
        let now = self.now();
        if let Some(existing) = self.store.get(key, now) {
            self.store.remove(existing);
            return Ok(StoreResult::NotStored);
        }
        self.store_value(key, dataflags, exptime, data, false, None, now)?;
        Ok(StoreResult::Stored)
    }

    #[instrument(skip(self, data))]
    pub fn replace(&mut self, key: &[u8], dataflags: u32, exptime: AbsTime, data: &[u8]) -> Result<StoreResult> {
        let now = self.now();
        let Some(existing) = self.store.get(key, now) else {
            return Ok(StoreResult::NotStored);
        };
        self.store_value(key, dataflags, exptime, data, false, Some(existing), now)?;
        self.store.remove(existing);
        Ok(StoreResult::Stored)
    }

    #[instrument(skip(self, data))]
    pub fn cas(&mut self, key: &[u8], dataflags: u32, exptime: AbsTime, data: &[u8], cas: u64) -> Result<StoreResult> {
        let now = self.now();
        let Some(existing) = self.store.get(key, now) else {
            return Ok(StoreResult::NotFound);
        };
        if self.store.slab.item(existing).cas != cas {
            self.store.remove(existing);
            return Ok(StoreResult::Exists);
        }
        self.store_value(key, dataflags, exptime, data, false, Some(existing), now)?;
        self.store.remove(existing);
        Ok(StoreResult::Stored)
    }

    /// Append/prepend share everything but which end the new bytes land on
    /// (spec §4.7.2, §9 open question: missing key -> `NotStored`, a present
    /// but zero-byte value merges normally).
    #[instrument(skip(self, data))]
    pub fn append(&mut self, key: &[u8], data: &[u8]) -> std::result::Result<StoreResult, ClientError> {
        self.append_or_prepend(key, data, false)
    }

    #[instrument(skip(self, data))]
    pub fn prepend(&mut self, key: &[u8], data: &[u8]) -> std::result::Result<StoreResult, ClientError> {
        self.append_or_prepend(key, data, true)
    }

    fn append_or_prepend(
        &mut self,
        key: &[u8],
        data: &[u8],
        prepend: bool,
    ) -> std::result::Result<StoreResult, ClientError> {
        let now = self.now();
        let Some(existing) = self.store.get(key, now) else {
            return Ok(StoreResult::NotStored);
        };

        let (dataflags, exptime, pending, mut merged) = {
            let it = self.store.slab.item(existing);
            let pending = matches!(it.role, ItemRole::Value { pending } if pending);
            (it.dataflags, it.exptime, pending, Vec::with_capacity(it.data.len() + data.len()))
        };
        if prepend {
            merged.extend_from_slice(data);
            merged.extend_from_slice(&self.store.slab.item(existing).data);
        } else {
            merged.extend_from_slice(&self.store.slab.item(existing).data);
            merged.extend_from_slice(data);
        }

        let new_item =
            match self.store.alloc(key, dataflags, exptime, merged.len(), ItemRole::Value { pending }, now) {
                Ok(item) => item,
                Err(_) => {
                    self.store.remove(existing);
                    return Err(ClientError::AppendSizeExceedsSlabClass);
                }
            };
        self.store.slab.item_mut(new_item).data = merged;
        if prepend {
            self.store.slab.item_mut(new_item).flags.insert(leasecache_core::item::ItemFlags::RALIGN);
        }
        self.store.replace(existing, new_item, now);
        self.store.remove(new_item);
        self.store.remove(existing);
        Ok(StoreResult::Stored)
    }

    #[instrument(skip(self))]
    pub fn delete(&mut self, key: &[u8]) -> Result<StoreResult> {
        let now = self.now();
        match self.store.get(key, now) {
            Some(item) => {
                self.store.unlink(item);
                self.store.remove(item);
                Ok(StoreResult::Exists)
            }
            None => Ok(StoreResult::NotFound),
        }
    }

    /// `get` with an additional unconditional teardown of `key`'s lease,
    /// pending version and colease before the lookup (spec §4.7.9).
    #[instrument(skip(self))]
    pub fn get_and_delete(&mut self, key: &[u8], delete_lease: bool) -> Result<StoreResult> {
        if delete_lease {
            if let Some(lease) = self.store.index.find(&lease_key(key)) {
                self.store.unlink(lease);
            }
            if let Some(pv) = self.store.index.find(&pending_version_key(key)) {
                self.store.unlink(pv);
            }
            if let Some(co) = self.store.index.find(&colease_key(key)) {
                self.store.unlink(co);
            }
        }
        self.delete(key)
    }

    #[instrument(skip(self))]
    pub fn get(&mut self, key: &[u8]) -> Option<ItemRef> {
        let now = self.now();
        self.store.get(key, now)
    }

    #[instrument(skip(self))]
    pub fn touch(&mut self, key: &[u8]) {
        let now = self.now();
        if let Some(item) = self.store.get(key, now) {
            self.store.touch(item, now);
            self.store.remove(item);
        }
    }

    // ---- reserved-item helpers --------------------------------------------

    /// Mints a fresh `I` lease over `key`, replacing any prior lease at that
    /// slot, and self-balances its own refcount (spec §4.7.1).
    fn mint_i_lease(&mut self, key: &[u8], token: u64, now: AbsTime) -> Result<()> {
        let encoded = encode_u64(token);
        let lease_key_bytes = lease_key(key);
        let existing = self.store.index.find(&lease_key_bytes);
        let item =
            self.store.alloc(&lease_key_bytes, 0, 0, encoded.len(), ItemRole::Lease(LeaseKind::Inhibit), now)?;
        self.store.slab.item_mut(item).data = encoded;
        match existing {
            Some(old) => self.store.replace(old, item, now),
            None => self.store.link(item, now),
        }
        self.store.slab.item_mut(item).set_pinned();
        self.store.remove(item);
        Ok(())
    }

    /// Replaces `pending_version_key(key)`'s payload with `data`, carrying
    /// `pending` through. Used by the Q-lease family whenever the refreshed
    /// value's bytes need a dedicated regular-pool item ahead of commit
    /// (spec §4.6).
    fn store_pending_version(
        &mut self,
        key: &[u8],
        dataflags: u32,
        exptime: AbsTime,
        data: &[u8],
        pending: bool,
        now: AbsTime,
    ) -> Result<()> {
        let pv_key = pending_version_key(key);
        let existing = self.store.index.find(&pv_key);
        let item = self.store.alloc(
            &pv_key,
            dataflags,
            exptime,
            data.len(),
            ItemRole::PendingVersion { pending },
            now,
        )?;
        self.store.slab.item_mut(item).data = data.to_vec();
        match existing {
            Some(old) => self.store.replace(old, item, now),
            None => self.store.link(item, now),
        }
        self.store.remove(item);
        Ok(())
    }

    /// Builds a live value item out of `pending_version_key(key)`'s payload
    /// and unlinks the pending version, overriding its `pending` bit with
    /// `pending` (spec §4.6, §4.7.5 commit, §4.7.7 dcommit's `O_REF` case).
    fn promote_pending_version(&mut self, key: &[u8], pending: bool, config_number: i32, now: AbsTime) -> Result<()> {
        let Some(pv) = self.store.index.find(&pending_version_key(key)) else {
            return Ok(());
        };
        let (dataflags, exptime, data) = {
            let it = self.store.slab.item(pv);
            (it.dataflags, it.exptime, it.data.clone())
        };
        let existing = self.store.index.find(key);
        let new_value =
            self.store.alloc(key, dataflags, exptime, data.len(), ItemRole::Value { pending }, now)?;
        self.store.slab.item_mut(new_value).data = data;
        self.store.slab.item_mut(new_value).config_number = config_number;
        match existing {
            Some(old) => self.store.replace(old, new_value, now),
            None => self.store.link(new_value, now),
        }
        self.store.remove(new_value);
        if let Some(old) = existing {
            self.store.remove(old);
        }
        self.store.unlink(pv);
        Ok(())
    }

    /// `pending_marker_key(key)` tracks whether a commit promised a value is
    /// coming without one existing yet (spec §3.2, §3.4). Reconciled at the
    /// end of `commit`: present iff `pending_flag` is set and no value has
    /// landed.
    fn reconcile_pending_marker(&mut self, key: &[u8], pending_flag: bool, now: AbsTime) -> Result<()> {
        let value_exists = self.store.index.find(key).is_some();
        let marker = self.store.index.find(&pending_marker_key(key));

        if value_exists || !pending_flag {
            if let Some(m) = marker {
                self.store.unlink(m);
            }
            return Ok(());
        }

        if marker.is_none() {
            let marker_key = pending_marker_key(key);
            let item = self.store.alloc(&marker_key, 0, 0, 1, ItemRole::PendingMarker, now)?;
            self.store.slab.item_mut(item).data = vec![1u8];
            self.store.link(item, now);
            self.store.remove(item);
        }
        Ok(())
    }

    // ---- IQ lease family (spec §4.7.1 - §4.7.4) ---------------------------

    /// The miss-path lookup: returns the live value, grants an `I` lease on
    /// a clean miss, reports `LEASE_HOTMISS` on a conflicting one, and
    /// (when `invalidate` is set) tears an existing value down in favor of a
    /// fresh lease instead of serving stale bytes (spec §4.7.1).
    #[instrument(skip(self))]
    pub fn iqget(
        &mut self,
        tid: &[u8],
        key: &[u8],
        lease_token: u64,
        invalidate: bool,
    ) -> std::result::Result<IqOutcome, IqError> {
        let now = self.now();

        let tid_owns_key = self
            .store
            .index
            .find(&ptrans_key(key))
            .is_some_and(|p| KeyList::new(&self.store.slab.item(p).data).check(tid));

        if tid_owns_key {
            return self.iqget_under_quarantine(key, now);
        }

        match self.store.get(key, now) {
            Some(value) => self.iqget_with_value(key, value, lease_token, invalidate, now),
            None => self.iqget_without_value(key, lease_token, now),
        }
    }

    fn iqget_under_quarantine(&mut self, key: &[u8], now: AbsTime) -> std::result::Result<IqOutcome, IqError> {
        match self.store.index.find(&lease_key(key)).map(|l| self.store.slab.item(l).role) {
            Some(ItemRole::Lease(LeaseKind::QuarantineIncrement)) => match self.store.get(&pending_version_key(key), now) {
                Some(pv) => Ok(IqOutcome::Value(pv)),
                None => Ok(IqOutcome::NoValue),
            },
            _ => Ok(IqOutcome::NoValue),
        }
    }

    fn iqget_with_value(
        &mut self,
        key: &[u8],
        value: ItemRef,
        lease_token: u64,
        invalidate: bool,
        now: AbsTime,
    ) -> std::result::Result<IqOutcome, IqError> {
        let existing_lease = self.store.index.find(&lease_key(key));
        if let Some(lease) = existing_lease {
            let role = self.store.slab.item(lease).role;
            if role.has_q_ref_lease() {
                let token = decode_u64(&self.store.slab.item(lease).data).unwrap_or(0);
                if token == lease_token {
                    self.store.remove(value);
                    return Ok(IqOutcome::NoValue);
                }
            }
        }

        if !invalidate {
            self.store.touch(value, now);
            return Ok(IqOutcome::Value(value));
        }

        match existing_lease {
            None => {
                let token = self.lease_tokens.mint();
                if self.mint_i_lease(key, token, now).is_err() {
                    self.store.remove(value);
                    return Err(IqError::ServerError);
                }
                self.store.unlink(value);
                self.store.remove(value);
                self.stats.i_lease_grants += 1;
                Ok(IqOutcome::Lease(token))
            }
            Some(lease) => {
                let stored = decode_u64(&self.store.slab.item(lease).data).unwrap_or(0);
                self.store.remove(value);
                if stored == lease_token {
                    Ok(IqOutcome::NoValue)
                } else {
                    Err(IqError::Miss)
                }
            }
        }
    }

    fn iqget_without_value(
        &mut self,
        key: &[u8],
        lease_token: u64,
        now: AbsTime,
    ) -> std::result::Result<IqOutcome, IqError> {
        match self.store.index.find(&lease_key(key)) {
            None => {
                let token = self.lease_tokens.mint();
                self.mint_i_lease(key, token, now).map_err(|_| IqError::ServerError)?;
                self.stats.i_lease_grants += 1;
                Ok(IqOutcome::Lease(token))
            }
            Some(lease) => {
                let stored = decode_u64(&self.store.slab.item(lease).data).unwrap_or(0);
                if stored == lease_token {
                    Ok(IqOutcome::NoValue)
                } else {
                    Err(IqError::Miss)
                }
            }
        }
    }

    /// Fills a value behind an `I` lease the caller was granted by `iqget`
    /// (spec §4.7.2): the lease must still exist and carry `lease_token`, or
    /// the write is refused. A pending marker present at the key is absorbed
    /// into the new value's `p` bit.
    #[instrument(skip(self, data))]
    pub fn iqset(&mut self, key: &[u8], dataflags: u32, exptime: AbsTime, data: &[u8], lease_token: u64) -> Result<StoreResult> {
        let now = self.now();
        let lease = self.store.index.find(&lease_key(key));
        let matches = lease.is_some_and(|l| {
            self.store.slab.item(l).role.has_i_lease()
                && decode_u64(&self.store.slab.item(l).data).unwrap_or(0) == lease_token
        });
        if !matches {
            return Ok(StoreResult::NotStored);
        }
        self.store.unlink(lease.unwrap());

        let marker = self.store.index.find(&pending_marker_key(key));
        let pending = marker.is_some();
        if let Some(m) = marker {
            self.store.unlink(m);
        }

        let existing = self.store.index.find(key);
        self.store_value(key, dataflags, exptime, data, pending, existing, now)?;
        Ok(StoreResult::Stored)
    }

    /// `Q_INV`: registers `tid` as quarantining `key` (spec §4.7.3). Adds
    /// `key` to the transaction's own key-list, `tid` to `key`'s `ptrans`
    /// list (used by `iqget`'s ownership check) and to the `Q_INV` lease's
    /// own tid list, then propagates the lease's `exptime` onto the live
    /// value if one exists (spec SPEC_FULL §9 open question).
    #[instrument(skip(self))]
    pub fn quarantine_and_register(&mut self, tid: &[u8], key: &[u8], lease_exptime: AbsTime) -> Result<()> {
        let now = self.now();
        assoc_tid_ptrans(&mut self.store, tid, key, now)?;
        assoc_key_tid(&mut self.store, key, tid, now)?;
        assoc_tid_lease(&mut self.store, key, tid, lease_exptime, now)?;

        if let Some(lease) = self.store.index.find(&lease_key(key)) {
            let exptime = self.store.slab.item(lease).exptime;
            if let Some(value) = self.store.index.find(key) {
                self.store.slab.item_mut(value).exptime = exptime;
            }
        }
        self.stats.q_inv_lease_grants += 1;
        Ok(())
    }

    /// `Q_REF`/`Q_INCR`: grants (or rejoins) a refresh lease on `key` for
    /// `tid` (spec §4.7.4). A matching in-flight lease returns its pending
    /// version (or bare pending marker); a conflicting one is a clean miss;
    /// otherwise any blocking `I` lease is voided and a fresh `Q_REF` lease
    /// is minted, cloning the live value (if any) into a pending version
    /// stamped with the lease's `exptime`.
    #[instrument(skip(self))]
    pub fn quarantine_and_read(
        &mut self,
        tid: &[u8],
        key: &[u8],
        lease_token: u64,
    ) -> std::result::Result<IqOutcome, IqError> {
        let now = self.now();
        let existing_lease = self.store.index.find(&lease_key(key));

        if let Some(lease) = existing_lease {
            let role = self.store.slab.item(lease).role;
            if matches!(role, ItemRole::Lease(LeaseKind::QuarantineRefresh) | ItemRole::Lease(LeaseKind::QuarantineIncrement)) {
                let token = decode_u64(&self.store.slab.item(lease).data).unwrap_or(0);
                if token != lease_token {
                    return Err(IqError::Miss);
                }
                return match self.store.get(&pending_version_key(key), now) {
                    Some(pv) => Ok(IqOutcome::Value(pv)),
                    None => Ok(IqOutcome::NoValue),
                };
            }
            if role.has_q_inv_lease() {
                return Err(IqError::Miss);
            }
            // an I lease blocking the way: void it
            self.store.unlink(lease);
            self.stats.lease_voids += 1;
        }

        let token = self.lease_tokens.mint();
        let encoded = encode_u64(token);
        let lease_key_bytes = lease_key(key);
        let lease_item = self
            .store
            .alloc(&lease_key_bytes, 0, 0, encoded.len(), ItemRole::Lease(LeaseKind::QuarantineRefresh), now)
            .map_err(|_| IqError::ServerError)?;
        self.store.slab.item_mut(lease_item).data = encoded;
        self.store.link(lease_item, now);
        self.store.slab.item_mut(lease_item).set_pinned();
        let lease_exptime = self.store.slab.item(lease_item).exptime;
        self.store.remove(lease_item);
        self.stats.q_ref_lease_grants += 1;

        let cloned = self.store.get(key, now);
        let outcome = match cloned {
            Some(value) => {
                let (dataflags, data, pending) = {
                    let it = self.store.slab.item(value);
                    let pending = matches!(it.role, ItemRole::Value { pending } if pending);
                    (it.dataflags, it.data.clone(), pending)
                };
                self.store.remove(value);
                self.store_pending_version(key, dataflags, lease_exptime, &data, pending, now)
                    .map_err(|_| IqError::ServerError)?;
                match self.store.get(&pending_version_key(key), now) {
                    Some(pv) => IqOutcome::Value(pv),
                    None => IqOutcome::NoValue,
                }
            }
            None => IqOutcome::NoValue,
        };

        assoc_tid_ptrans(&mut self.store, tid, key, now).map_err(|_| IqError::ServerError)?;
        Ok(outcome)
    }

    // ---- counters (spec §4.7.8) --------------------------------------------

    #[instrument(skip(self))]
    pub fn iqincr(&mut self, key: &[u8], delta: u64, lease_token: u64) -> std::result::Result<IqOutcome, IncrError> {
        self.iq_incr_decr(key, delta, true, lease_token)
    }

    #[instrument(skip(self))]
    pub fn iqdecr(&mut self, key: &[u8], delta: u64, lease_token: u64) -> std::result::Result<IqOutcome, IncrError> {
        self.iq_incr_decr(key, delta, false, lease_token)
    }

    fn iq_incr_decr(
        &mut self,
        key: &[u8],
        delta: u64,
        increment: bool,
        lease_token: u64,
    ) -> std::result::Result<IqOutcome, IncrError> {
        let now = self.now();
        let lease = self.store.index.find(&lease_key(key));
        match lease {
            Some(l) if self.store.slab.item(l).role.has_q_incr_lease() => {
                let token = decode_u64(&self.store.slab.item(l).data).unwrap_or(0);
                if token != lease_token {
                    return Err(IncrError::Miss);
                }
            }
            Some(_) => return Err(IncrError::Miss),
            None => {
                let token = self.lease_tokens.mint();
                let encoded = encode_u64(token);
                let lease_key_bytes = lease_key(key);
                let item = self
                    .store
                    .alloc(&lease_key_bytes, 0, 0, encoded.len(), ItemRole::Lease(LeaseKind::QuarantineIncrement), now)
                    .map_err(|_| IncrError::ServerError)?;
                self.store.slab.item_mut(item).data = encoded;
                self.store.link(item, now);
                self.store.slab.item_mut(item).set_pinned();
                self.store.remove(item);
                self.stats.q_incr_lease_grants += 1;
                return Ok(IqOutcome::LeaseNoValue(token));
            }
        }

        let pv_key = pending_version_key(key);
        let base: u64 = match self.store.index.find(&pv_key) {
            Some(pv) => decode_u64(&self.store.slab.item(pv).data).ok_or(IncrError::NonNumeric)?,
            None => match self.store.get(key, now) {
                Some(value) => {
                    let decoded = decode_u64(&self.store.slab.item(value).data);
                    self.store.remove(value);
                    decoded.ok_or(IncrError::NonNumeric)?
                }
                None => 0,
            },
        };
        let updated = if increment { base.wrapping_add(delta) } else { base.saturating_sub(delta) };
        let encoded = encode_u64(updated);

        let existing_pv = self.store.index.find(&pv_key);
        let (dataflags, exptime) = existing_pv
            .map(|pv| {
                let it = self.store.slab.item(pv);
                (it.dataflags, it.exptime)
            })
            .unwrap_or((0, 0));
        let new_pv = self
            .store
            .alloc(&pv_key, dataflags, exptime, encoded.len(), ItemRole::PendingVersion { pending: false }, now)
            .map_err(|_| IncrError::ServerError)?;
        self.store.slab.item_mut(new_pv).data = encoded;
        match existing_pv {
            Some(old) => self.store.replace(old, new_pv, now),
            None => self.store.link(new_pv, now),
        }
        Ok(IqOutcome::Value(new_pv))
    }

    // ---- commit / release (spec §4.7.5, §4.7.6) ---------------------------

    fn transaction_keys(&self, tid: &[u8]) -> Option<Vec<Vec<u8>>> {
        let item = self.store.index.find(tid)?;
        Some(KeyList::new(&self.store.slab.item(item).data).iter().map(|k| k.to_vec()).collect())
    }

    /// Finalizes `tid`'s quarantined keys (spec §4.7.5): for each, removes
    /// `tid` from a `Q_INV` lease's tid list (unlinking the lease once
    /// empty) and, if a pending version exists, promotes it to the live
    /// value carrying `pending_flag` and `config_number`; otherwise the
    /// value is dropped outright. A pending marker is reconciled afterward
    /// whether or not a value landed.
    #[instrument(skip(self))]
    pub fn commit(&mut self, tid: &[u8], pending_flag: bool, config_number: i32) -> Result<TxResult> {
        let now = self.now();
        let Some(keys) = self.transaction_keys(tid) else {
            return Ok(TxResult::NotFound);
        };

        for key in &keys {
            if let Some(lease) = self.store.index.find(&lease_key(key)) {
                if self.store.slab.item(lease).role.has_q_inv_lease() {
                    remove_entry_from_list(&mut self.store, lease, tid)?;
                }
            }

            if self.store.index.find(&pending_version_key(key)).is_some() {
                self.promote_pending_version(key, pending_flag, config_number, now)?;
            } else if let Some(value) = self.store.index.find(key) {
                self.store.unlink(value);
            }

            self.reconcile_pending_marker(key, pending_flag, now)?;
        }

        if let Some(txn) = self.store.index.find(tid) {
            self.store.unlink(txn);
            self.store.unset_pinned(txn);
        }
        self.stats.commits += 1;
        Ok(TxResult::Ok)
    }

    /// Unconditionally discards `tid`'s quarantine without promoting
    /// anything (spec §4.7.6): unlinks every pending version and either
    /// drops `tid` from a `Q_INV` lease's tid list or unlinks a non-`Q_INV`
    /// lease outright.
    #[instrument(skip(self))]
    pub fn release(&mut self, tid: &[u8]) -> Result<TxResult> {
        let Some(keys) = self.transaction_keys(tid) else {
            return Ok(TxResult::NotFound);
        };

        for key in &keys {
            if let Some(pv) = self.store.index.find(&pending_version_key(key)) {
                self.store.unlink(pv);
            }
            if let Some(lease) = self.store.index.find(&lease_key(key)) {
                if self.store.slab.item(lease).role.has_q_inv_lease() {
                    remove_entry_from_list(&mut self.store, lease, tid)?;
                } else {
                    self.store.unlink(lease);
                }
            }
        }

        if let Some(txn) = self.store.index.find(tid) {
            self.store.unlink(txn);
            self.store.unset_pinned(txn);
        }
        self.stats.releases += 1;
        Ok(TxResult::Ok)
    }

    // ---- CO (cooperative/owner) family (spec §4.7.7) -----------------------

    fn session_keys(&self, sid: &[u8]) -> Option<Vec<Vec<u8>>> {
        let item = self.store.index.find(sid)?;
        Some(KeyList::new(&self.store.slab.item(item).data).iter().map(|k| k.to_vec()).collect())
    }

    /// Any CO operation checks session liveness first: an `ABORT`-status
    /// session is torn down on the spot and every such op reports
    /// [`CoResult::Abort`]/its equivalent (spec §4.7.7 intro).
    fn session_is_aborted(&mut self, sid: &[u8]) -> bool {
        let Some(session) = self.store.index.find(sid) else { return false };
        if matches!(self.store.slab.item(session).role, ItemRole::Session { status: SessStatus::Abort }) {
            self.store.unlink(session);
            self.store.unset_pinned(session);
            self.stats.session_aborts += 1;
            true
        } else {
            false
        }
    }

    /// Unconditional session cleanup (spec §4.7.7 `co_unlease`): for each
    /// key the session touched, unlinks its lease, removes the session from
    /// the key's colease (unlinking it if now empty), and unlinks the
    /// key's pending version. Finally unpins and unlinks the session
    /// itself. Shared by the public `co_unlease` and by `validate`'s
    /// failure path (SPEC_FULL §9 decision: validate discards rather than
    /// promotes on conflict).
    fn discard_session(&mut self, sid: &[u8]) -> Result<()> {
        let Some(keys) = self.session_keys(sid) else { return Ok(()) };

        for key in &keys {
            if let Some(lease) = self.store.index.find(&lease_key(key)) {
                self.store.unlink(lease);
            }
            if let Some(colease) = self.store.index.find(&colease_key(key)) {
                remove_entry_from_list(&mut self.store, colease, sid)?;
            }
            if let Some(pv) = self.store.index.find(&pending_version_key(key)) {
                self.store.unlink(pv);
            }
        }

        if let Some(session) = self.store.index.find(sid) {
            self.store.unlink(session);
            self.store.unset_pinned(session);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn co_unlease(&mut self, sid: &[u8]) -> Result<()> {
        self.discard_session(sid)
    }

    /// Confirms every key the session touched still lists `sid` in its
    /// colease; on the first mismatch, discards the session and reports
    /// `Abort` (spec §4.7.7 `validate`).
    #[instrument(skip(self))]
    pub fn validate(&mut self, sid: &[u8]) -> Result<CoResult> {
        if self.session_is_aborted(sid) {
            return Ok(CoResult::Abort);
        }
        let Some(keys) = self.session_keys(sid) else {
            return Ok(CoResult::NotFound);
        };

        for key in &keys {
            let holds = self
                .store
                .index
                .find(&colease_key(key))
                .is_some_and(|c| KeyList::new(&self.store.slab.item(c).data).check(sid));
            if !holds {
                self.discard_session(sid)?;
                return Ok(CoResult::Abort);
            }
        }
        Ok(CoResult::Ok)
    }

    /// Flips every other session listed in `colease`'s key-list to
    /// `ABORT` status and drops them from the list, without unlinking the
    /// sessions themselves — they tear down the next time they're touched
    /// (spec §4.7.7, SPEC_FULL "Supplemental features" `abort_sessions`).
    fn abort_sessions(&mut self, colease: ItemRef, exclude_sid: &[u8]) -> Result<()> {
        let others: Vec<Vec<u8>> = KeyList::new(&self.store.slab.item(colease).data)
            .iter()
            .filter(|sid| *sid != exclude_sid)
            .map(|sid| sid.to_vec())
            .collect();

        for sid in &others {
            if let Some(session) = self.store.index.find(sid) {
                self.store.slab.item_mut(session).role = ItemRole::Session { status: SessStatus::Abort };
            }
            remove_entry_from_list(&mut self.store, colease, sid)?;
            self.stats.session_aborts += 1;
        }
        Ok(())
    }

    /// `ciget`: a cooperative or owner-qualified read attempt (spec
    /// §4.7.7). An existing owner colease either serves the session's
    /// pending version (if `sid` is on it) or aborts the session (if not).
    /// An in-flight `I`/`Q` lease reports `Ok`/`Retry` by token match.
    /// Otherwise `sid` joins (or creates) a `C` colease, minting an `I`
    /// lease too if the key has no value yet.
    #[instrument(skip(self))]
    pub fn ciget(&mut self, sid: &[u8], key: &[u8], lease_token: u64) -> Result<CiGetOutcome> {
        if self.session_is_aborted(sid) {
            return Ok(CiGetOutcome::Abort);
        }
        let now = self.now();

        if let Some(colease) = self.store.index.find(&colease_key(key)) {
            let role = self.store.slab.item(colease).role;
            if matches!(role, ItemRole::Colease(ColeaseKind::OwnerInvalidate) | ItemRole::Colease(ColeaseKind::OwnerRefresh)) {
                let in_list = KeyList::new(&self.store.slab.item(colease).data).check(sid);
                if !in_list {
                    self.discard_session(sid)?;
                    return Ok(CiGetOutcome::Abort);
                }
                return match self.store.get(&pending_version_key(key), now) {
                    Some(pv) => Ok(CiGetOutcome::PendingVersion(pv)),
                    None => Ok(CiGetOutcome::Ok),
                };
            }
        }

        if let Some(lease) = self.store.index.find(&lease_key(key)) {
            let role = self.store.slab.item(lease).role;
            if role.is_lease_holder() {
                let token = decode_u64(&self.store.slab.item(lease).data).unwrap_or(0);
                return Ok(if token == lease_token { CiGetOutcome::Ok } else { CiGetOutcome::Retry });
            }
        }

        assoc_key_sid(&mut self.store, key, sid, ItemRole::Colease(ColeaseKind::Cooperative), now)?;
        assoc_sid_colease(&mut self.store, sid, key, SessStatus::Alive, now)?;
        self.stats.c_lease_grants += 1;

        if self.store.index.find(key).is_none() {
            let token = self.lease_tokens.mint();
            self.mint_i_lease(key, token, now)?;
            self.stats.i_lease_grants += 1;
        }
        Ok(CiGetOutcome::Ok)
    }

    /// `oqread`: requests exclusive owner-refresh standing on `key` (spec
    /// §4.7.7). Aborts any other cooperative readers sharing a `C` colease
    /// on the key and replaces it with a fresh `O_REF` colease for `sid`,
    /// as long as no `Q_REF` lease is already in flight.
    #[instrument(skip(self))]
    pub fn oqread(&mut self, sid: &[u8], key: &[u8]) -> Result<OqReadOutcome> {
        if self.session_is_aborted(sid) {
            return Ok(OqReadOutcome::Abort);
        }
        let now = self.now();

        if let Some(colease) = self.store.index.find(&colease_key(key)) {
            match self.store.slab.item(colease).role {
                ItemRole::Colease(ColeaseKind::Cooperative) => {
                    self.abort_sessions(colease, sid)?;
                    // abort_sessions's remove_entry_from_list already unlinks
                    // the colease once its list empties (which it always
                    // does here, since sid itself was never a member); only
                    // unlink it ourselves if something left it still linked.
                    if self.store.index.find(&colease_key(key)).is_some() {
                        self.store.unlink(colease);
                    }
                }
                ItemRole::Colease(ColeaseKind::OwnerInvalidate) | ItemRole::Colease(ColeaseKind::OwnerRefresh) => {
                    let in_list = KeyList::new(&self.store.slab.item(colease).data).check(sid);
                    if !in_list {
                        self.discard_session(sid)?;
                        return Ok(OqReadOutcome::Abort);
                    }
                    return match self.store.get(key, now) {
                        Some(value) => Ok(OqReadOutcome::Value(value)),
                        None => Ok(OqReadOutcome::Abort),
                    };
                }
                _ => {}
            }
        }

        if let Some(lease) = self.store.index.find(&lease_key(key)) {
            if self.store.slab.item(lease).role.has_q_ref_lease() {
                return Ok(OqReadOutcome::Abort);
            }
        }

        let lease_key_bytes = lease_key(key);
        let lease_item = self.store.alloc(&lease_key_bytes, 0, 0, 0, ItemRole::Lease(LeaseKind::QuarantineRefresh), now)?;
        self.store.link(lease_item, now);
        self.store.slab.item_mut(lease_item).set_pinned();
        self.store.remove(lease_item);
        self.stats.q_ref_lease_grants += 1;

        assoc_key_sid(&mut self.store, key, sid, ItemRole::Colease(ColeaseKind::OwnerRefresh), now)?;
        assoc_sid_colease(&mut self.store, sid, key, SessStatus::Alive, now)?;
        self.stats.o_lease_grants += 1;

        match self.store.get(key, now) {
            Some(value) => Ok(OqReadOutcome::Value(value)),
            None => Ok(OqReadOutcome::Abort),
        }
    }

    fn oqswap_or_write(
        &mut self,
        sid: &[u8],
        key: &[u8],
        dataflags: u32,
        exptime: AbsTime,
        data: &[u8],
        tolerate_absent_colease: bool,
    ) -> Result<OqWriteOutcome> {
        if self.session_is_aborted(sid) {
            return Ok(OqWriteOutcome::Abort);
        }
        let now = self.now();

        let colease = self.store.index.find(&colease_key(key));
        let has_sid = colease.is_some_and(|c| KeyList::new(&self.store.slab.item(c).data).check(sid));

        if !has_sid {
            if colease.is_some() || !tolerate_absent_colease {
                return Ok(OqWriteOutcome::Abort);
            }
            assoc_key_sid(&mut self.store, key, sid, ItemRole::Colease(ColeaseKind::OwnerRefresh), now)?;
            assoc_sid_colease(&mut self.store, sid, key, SessStatus::Alive, now)?;
            self.stats.o_lease_grants += 1;
        }

        self.store_pending_version(key, dataflags, exptime, data, false, now)?;

        if let Some(lease) = self.store.index.find(&lease_key(key)) {
            if self.store.slab.item(lease).role.has_q_ref_lease() {
                self.store.unlink(lease);
            }
        }
        Ok(OqWriteOutcome::Ok)
    }

    /// Requires an existing `O` colease including `sid` (spec §4.7.7).
    #[instrument(skip(self, data))]
    pub fn oqswap(&mut self, sid: &[u8], key: &[u8], dataflags: u32, exptime: AbsTime, data: &[u8]) -> Result<OqWriteOutcome> {
        self.oqswap_or_write(sid, key, dataflags, exptime, data, false)
    }

    /// Like `oqswap`, but tolerates no colease existing yet by creating an
    /// `O_REF` one for `sid` on the spot (spec §4.7.7).
    #[instrument(skip(self, data))]
    pub fn oqwrite(&mut self, sid: &[u8], key: &[u8], dataflags: u32, exptime: AbsTime, data: &[u8]) -> Result<OqWriteOutcome> {
        self.oqswap_or_write(sid, key, dataflags, exptime, data, true)
    }

    /// Owner-qualified finalize (spec §4.7.7 `dcommit`): per touched key,
    /// drops `sid` from the key's lease and colease, then resolves by
    /// colease subtype — `O_INV` unlinks the value outright, `O_REF`
    /// promotes the pending version, `C` evicts the value immediately (spec
    /// SPEC_FULL §9 decision: "expire the value" is read as "evict it now",
    /// since a literal `exptime = 0` would instead mean "never expire",
    /// contradicting the operation's stated intent). Unpins and unlinks the
    /// session last.
    #[instrument(skip(self))]
    pub fn dcommit(&mut self, sid: &[u8]) -> Result<CoResult> {
        if self.session_is_aborted(sid) {
            return Ok(CoResult::Abort);
        }
        let now = self.now();
        let Some(keys) = self.session_keys(sid) else {
            return Ok(CoResult::NotFound);
        };

        for key in &keys {
            if let Some(lease) = self.store.index.find(&lease_key(key)) {
                self.store.unlink(lease);
            }

            let colease = self.store.index.find(&colease_key(key));
            let colease_role = colease.map(|c| self.store.slab.item(c).role);
            if let Some(colease_item) = colease {
                remove_entry_from_list(&mut self.store, colease_item, sid)?;
            }

            match colease_role {
                Some(ItemRole::Colease(ColeaseKind::OwnerInvalidate)) => {
                    if let Some(value) = self.store.index.find(key) {
                        self.store.unlink(value);
                    }
                }
                Some(ItemRole::Colease(ColeaseKind::OwnerRefresh)) => {
                    self.promote_pending_version(key, false, 0, now)?;
                }
                Some(ItemRole::Colease(ColeaseKind::Cooperative)) => {
                    if let Some(value) = self.store.index.find(key) {
                        self.store.unlink(value);
                    }
                }
                None => {}
            }
        }

        if let Some(session) = self.store.index.find(sid) {
            self.store.unlink(session);
            self.store.unset_pinned(session);
        }
        Ok(CoResult::Ok)
    }

    // ---- session/transaction registration ---------------------------------

    /// Adds `key` to `sid`'s own key-list, creating the session descriptor
    /// if this is its first touched key (spec §3.5, §4.8). Front-end code
    /// calls this ahead of `ciget`/`oqread`/`oqswap`/`oqwrite` so the
    /// session item exists for `validate`/`dcommit`/`co_unlease` to find.
    #[instrument(skip(self))]
    pub fn register_session_key(&mut self, sid: &[u8], key: &[u8]) -> Result<()> {
        let now = self.now();
        assoc_sid_colease(&mut self.store, sid, key, SessStatus::Alive, now)?;
        Ok(())
    }
}

/// A handle shared across threads, wrapping [`Engine`] behind a single
/// [`parking_lot::Mutex`] — the reference implementation's one global
/// `cache_lock` (spec §5). Cloning shares the same underlying engine.
#[derive(Clone)]
pub struct EngineHandle<S: SlabAllocator, A: AssocIndex, C: Clock> {
    inner: Arc<Mutex<Engine<S, A, C>>>,
}

impl<S: SlabAllocator, A: AssocIndex, C: Clock> EngineHandle<S, A, C> {
    pub fn new(slab: S, index: A, clock: C, config: EngineConfig) -> Self {
        EngineHandle { inner: Arc::new(Mutex::new(Engine::new(slab, index, clock, config))) }
    }

    /// Runs `f` with the lock held. Every façade operation on [`Engine`] is
    /// meant to be called this way; there is deliberately no per-method
    /// forwarding here; callers take the lock once per logical operation and
    /// may batch several calls under it, matching spec §5's framing of
    /// `cache_lock` as a single coarse-grained critical section rather than
    /// a per-method lock.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut Engine<S, A, C>) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }
}
