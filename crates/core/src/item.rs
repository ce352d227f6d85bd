//! The cached item and its role-tagged payload (spec §3.1, §9 "duck-typed
//! item flags"). The reference implementation overloads a single `flags` /
//! `coflags` pair of bitmasks across every kind of reserved item (lease,
//! colease, pending-version, pending-marker, ptrans, session/transaction).
//! We keep the structural bookkeeping bits (`ItemFlags`) but replace the
//! role/subtype overloading with a tagged [`ItemRole`] enum; predicates like
//! `is_lease_holder` or `has_q_inv_lease` become variant tests on `role`.

use crate::time::AbsTime;

/// Debug sentinel carried by every item, checked by assertions (spec §7).
pub const ITEM_MAGIC: u32 = 0xfeed_face;

/// 1 <= nkey <= KEY_MAX_LEN (spec §6).
pub const KEY_MAX_LEN: usize = 250;

/// Structural bookkeeping bits. Role/subtype markers live in [`ItemRole`]
/// instead of here. Hand-rolled rather than pulling in `bitflags`: five
/// fixed bits, no iteration or serialization needed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ItemFlags(u8);

impl ItemFlags {
    pub const EMPTY: ItemFlags = ItemFlags(0);
    /// Present in the associative index and in some LRU queue.
    pub const LINKED: ItemFlags = ItemFlags(0b0000_0001);
    /// Returned to the slab allocator; must not be touched again.
    pub const SLABBED: ItemFlags = ItemFlags(0b0000_0010);
    /// CAS is enabled for this item (cas field is meaningful).
    pub const CAS: ItemFlags = ItemFlags(0b0000_0100);
    /// Value bytes are right-aligned within the chunk (prepend result).
    pub const RALIGN: ItemFlags = ItemFlags(0b0000_1000);
    /// An engine-held refcount is pinning this item against eviction.
    pub const PINNED: ItemFlags = ItemFlags(0b0001_0000);

    pub const fn contains(self, other: ItemFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn insert(&mut self, other: ItemFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ItemFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for ItemFlags {
    type Output = ItemFlags;
    fn bitor(self, rhs: ItemFlags) -> ItemFlags {
        ItemFlags(self.0 | rhs.0)
    }
}

/// Session liveness, carried only by session items (spec §3.1 `sess_status`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessStatus {
    Alive,
    Abort,
}

/// The `I`/`Q` lease family subtype (spec §3.3). Stored under the `L`
/// prefix key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaseKind {
    /// Miss-filler intends to fetch and set; value is a single token.
    Inhibit,
    /// Invalidation transaction quarantine; value is a key-list of tids.
    QuarantineInvalidate,
    /// Refresh transaction quarantine; value is a decimal token.
    QuarantineRefresh,
    /// Increment/append transaction quarantine; value is a decimal token.
    QuarantineIncrement,
}

/// The `C`/`O` colease family subtype (spec §3.3). Stored under the `O`
/// prefix key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColeaseKind {
    /// Cooperative readers.
    Cooperative,
    /// Exclusive write-candidate, invalidate flavor.
    OwnerInvalidate,
    /// Exclusive write-candidate, refresh flavor.
    OwnerRefresh,
}

/// What role an item plays in the keyspace (spec §3.2, §3.5, §9).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemRole {
    /// A plain user value. `pending` is the `p` bit of spec §3.4.
    Value { pending: bool },
    /// An `L`-prefixed lease holder.
    Lease(LeaseKind),
    /// An `O`-prefixed colease holder (value = key-list of session ids).
    Colease(ColeaseKind),
    /// A `V`-prefixed pending-version item (spec §4.6).
    PendingVersion { pending: bool },
    /// A `P`-prefixed 1-byte pending marker (spec §3.2, glossary).
    PendingMarker,
    /// A `T`-prefixed key-list of transaction ids referencing a key.
    Ptrans,
    /// A transaction descriptor, keyed by `tid` (spec §3.5).
    Transaction,
    /// A session descriptor, keyed by `sid` (spec §3.5).
    Session { status: SessStatus },
    /// Reserved for parity with the reference implementation's hotkeys
    /// marker bit; the engine does not implement hotkey tracking.
    Hotkeys,
}

impl ItemRole {
    /// Reserved items (lease/colease/pending-version-is-not-reserved.../
    /// ptrans/session/transaction) live in the reserved LRU and are created
    /// pinned (spec §3.1, §5). Pending-version items are regular-pool value
    /// items (spec §4.6) even though they are V-prefixed.
    pub fn is_reserved(self) -> bool {
        matches!(
            self,
            ItemRole::Lease(_)
                | ItemRole::Colease(_)
                | ItemRole::Ptrans
                | ItemRole::Transaction
                | ItemRole::Session { .. }
                | ItemRole::Hotkeys
        )
    }

    pub fn is_lease_holder(self) -> bool {
        matches!(self, ItemRole::Lease(_))
    }

    pub fn has_i_lease(self) -> bool {
        matches!(self, ItemRole::Lease(LeaseKind::Inhibit))
    }

    pub fn has_q_lease(self) -> bool {
        matches!(
            self,
            ItemRole::Lease(LeaseKind::QuarantineInvalidate)
                | ItemRole::Lease(LeaseKind::QuarantineRefresh)
                | ItemRole::Lease(LeaseKind::QuarantineIncrement)
        )
    }

    pub fn has_q_inv_lease(self) -> bool {
        matches!(self, ItemRole::Lease(LeaseKind::QuarantineInvalidate))
    }

    pub fn has_q_ref_lease(self) -> bool {
        matches!(self, ItemRole::Lease(LeaseKind::QuarantineRefresh))
    }

    pub fn has_q_incr_lease(self) -> bool {
        matches!(self, ItemRole::Lease(LeaseKind::QuarantineIncrement))
    }

    pub fn has_co_lease(self) -> bool {
        matches!(self, ItemRole::Colease(_))
    }

    pub fn has_c_lease(self) -> bool {
        matches!(self, ItemRole::Colease(ColeaseKind::Cooperative))
    }

    pub fn has_o_lease(self) -> bool {
        matches!(
            self,
            ItemRole::Colease(ColeaseKind::OwnerInvalidate) | ItemRole::Colease(ColeaseKind::OwnerRefresh)
        )
    }
}

/// The unit held by the cache (spec §3.1). `key`/`data` are owned buffers:
/// the reference implementation points into slab-owned memory, but since
/// the slab allocator is an external collaborator here (spec §1), the core
/// owns its bytes directly and the [`crate::slab::SlabAllocator`]
/// implementation is responsible for accounting capacity.
#[derive(Clone, Debug)]
pub struct Item {
    pub magic: u32,
    pub slab_id: u8,
    pub offset: u32,
    pub refcount: u16,
    pub flags: ItemFlags,
    pub role: ItemRole,
    pub cas: u64,
    pub exptime: AbsTime,
    pub atime: AbsTime,
    pub key: Vec<u8>,
    pub data: Vec<u8>,
    pub dataflags: u32,
    pub config_number: i32,

    /// Intrusive doubly-linked LRU pointers (spec §4.1: "intrusive
    /// doubly-linked sequences"). `None` means "not linked into any
    /// queue" or "at that end of the queue".
    pub(crate) lru_prev: Option<crate::slab::ItemRef>,
    pub(crate) lru_next: Option<crate::slab::ItemRef>,
}

impl Item {
    /// An unpopulated chunk fresh out of a slab class, before
    /// [`crate::store::ItemStore::alloc`] stamps in a real key/role. Exists
    /// so a [`crate::slab::SlabAllocator`] implementation outside this
    /// crate can materialize new chunks without reaching into
    /// crate-private fields.
    pub fn blank(slab_id: u8) -> Self {
        Item {
            magic: ITEM_MAGIC,
            slab_id,
            offset: 0,
            refcount: 0,
            flags: ItemFlags::EMPTY,
            role: ItemRole::Value { pending: false },
            cas: 0,
            exptime: 0,
            atime: 0,
            key: Vec::new(),
            data: Vec::new(),
            dataflags: 0,
            config_number: 0,
            lru_prev: None,
            lru_next: None,
        }
    }

    pub fn new(slab_id: u8, key: &[u8], dataflags: u32, exptime: AbsTime, nbyte: usize, role: ItemRole) -> Self {
        debug_assert!(!key.is_empty() && key.len() <= KEY_MAX_LEN);
        Item {
            magic: ITEM_MAGIC,
            slab_id,
            offset: 0,
            refcount: 1,
            flags: ItemFlags::EMPTY,
            role,
            cas: 0,
            exptime,
            atime: 0,
            key: key.to_vec(),
            data: vec![0u8; nbyte],
            dataflags,
            config_number: 0,
            lru_prev: None,
            lru_next: None,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.flags.contains(ItemFlags::LINKED)
    }

    pub fn is_pinned(&self) -> bool {
        self.flags.contains(ItemFlags::PINNED)
    }

    pub fn set_pinned(&mut self) {
        if !self.is_pinned() {
            self.flags.insert(ItemFlags::PINNED);
            self.refcount += 1;
        }
    }

    pub fn unset_pinned(&mut self) {
        if self.is_pinned() {
            self.flags.remove(ItemFlags::PINNED);
            self.refcount = self.refcount.saturating_sub(1);
        }
    }

    pub fn is_expired(&self, now: AbsTime) -> bool {
        self.exptime > 0 && self.exptime <= now
    }

    pub fn nbyte(&self) -> usize {
        self.data.len()
    }

    pub fn nkey(&self) -> usize {
        self.key.len()
    }
}
