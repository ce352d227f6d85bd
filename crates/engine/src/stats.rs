//! Per-operation counters (SPEC_FULL.md "Supplemental features"). Plain
//! `u64` fields rather than atomics: every counter is only ever touched
//! from inside a façade call already holding the engine's single mutex
//! (spec §5), so a second synchronization mechanism would be redundant.

/// A point-in-time copy of [`EngineStats`], returned by
/// [`crate::engine::Engine::stats`] for an external reporter to consume
/// without holding the engine lock.
#[derive(Clone, Copy, Debug, Default)]
pub struct EngineStats {
    pub i_lease_grants: u64,
    pub q_inv_lease_grants: u64,
    pub q_ref_lease_grants: u64,
    pub q_incr_lease_grants: u64,
    pub c_lease_grants: u64,
    pub o_lease_grants: u64,

    pub lease_voids: u64,
    pub session_aborts: u64,
    pub commits: u64,
    pub releases: u64,

    pub expired_leases: u64,
    pub expired_i_leases: u64,
    pub expired_q_leases: u64,
    pub expired_c_leases: u64,
    pub expired_o_leases: u64,
}

impl EngineStats {
    pub fn merge_expired(&mut self, counters: leasecache_core::store::ExpiredCounters) {
        self.expired_leases += counters.leases;
        self.expired_i_leases += counters.i_leases;
        self.expired_q_leases += counters.q_leases;
        self.expired_c_leases += counters.c_leases;
        self.expired_o_leases += counters.o_leases;
    }
}
