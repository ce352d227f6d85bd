//! Crate error type. Protocol-facing outcomes (NOT_FOUND, EXISTS,
//! LEASE_HOTMISS, ...) are modeled as plain result-code enums in
//! `leasecache-engine` (spec §7); `Error` here is reserved for the
//! exceptional conditions spec §7 says should terminate on failure or that
//! indicate a collaborator wiring bug, following the teacher's
//! `reifydb-type`/`reifydb-auth` convention of one `thiserror` enum per
//! crate plus a crate-local `Result` alias.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("key length {0} exceeds KEY_MAX_LEN (250)")]
    KeyTooLong(usize),

    #[error("key must not be empty")]
    EmptyKey,

    #[error("no slab class fits {0} bytes")]
    NoFittingSlabClass(usize),

    #[error("slab allocator exhausted for slab class {0}")]
    AllocationFailed(u8),

    #[error("item store invariant violated: {0}")]
    InvariantViolation(&'static str),

    #[error("key-list codec error: {0}")]
    KeyList(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
