//! Exceptional conditions (spec §7: "invariants guarded by assertions,
//! terminate on failure"). Protocol-facing outcomes live in [`crate::result`]
//! instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] leasecache_core::error::Error),

    #[error("invariant violated: {0}")]
    InvariantViolation(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
