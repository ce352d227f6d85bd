//! Engine-wide configuration, constructed once at startup and threaded
//! through every collaborator by value (spec §9: "a single engine context
//! value, not ambient global state").

use crate::time::AbsTime;

/// Tunables fixed for the lifetime of an engine instance. Mirrors the
/// reference implementation's `settings` struct (spec §4.2, §4.1, §6), but
/// scoped down to what this crate's modules actually consult — the wire
/// protocol, threading model and listen sockets are out of scope (spec §1).
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Smallest slab class size in bytes.
    pub slab_chunk_size_min: usize,
    /// Largest slab class size in bytes; allocation requests above this
    /// fail with [`crate::error::Error::NoFittingSlabClass`].
    pub slab_chunk_size_max: usize,
    /// Growth factor between adjacent slab classes.
    pub slab_growth_factor: f64,
    /// Whether CAS values are assigned at link time (spec §3.1).
    pub use_cas: bool,
    /// Whether allocation may fall back to evicting an unexpired LRU item
    /// (spec §4.2 alloc policy, step 3).
    pub use_lru_eviction: bool,
    /// Minimum quiet interval before an item is repositioned in its LRU
    /// queue on access (spec §4.1).
    pub item_update_interval: AbsTime,
    /// Byte cap on a single `cachedump` response (spec §4.1, §6).
    pub cachedump_memlimit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            slab_chunk_size_min: 48,
            slab_chunk_size_max: 1024 * 1024,
            slab_growth_factor: 1.25,
            use_cas: true,
            use_lru_eviction: true,
            item_update_interval: crate::lru::ITEM_UPDATE_INTERVAL,
            cachedump_memlimit: crate::lru::ITEM_CACHEDUMP_MEMLIMIT,
        }
    }
}
