//! Protocol-facing result codes (spec §4.7, §7). These are plain enums, not
//! [`crate::error::Error`] variants: a lease conflict or a cache miss is an
//! expected, typed outcome the front-end branches on, not an exceptional
//! condition.

use leasecache_core::slab::ItemRef;

/// Success payload of [`crate::engine::Engine::iqget`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IqOutcome {
    /// A live value; caller owns one refcount on the returned item.
    Value(ItemRef),
    /// The caller's `tid` owns the key under a `Q_INV` lease, or a `Q_INCR`
    /// lease exists with no pending version yet.
    NoValue,
    /// A fresh `I` lease was minted; the caller must fetch-and-fill.
    Lease(u64),
    /// `Q_INCR`'s pending version doesn't exist yet, but a lease was (re)granted.
    LeaseNoValue(u64),
}

/// Failure outcome of [`crate::engine::Engine::iqget`] (spec §7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IqError {
    /// A conflicting lease exists under a different token; retry later.
    Miss,
    ServerError,
}

/// Outcome of the update-family store operations (`set`/`add`/`replace`/
/// `append`/`prepend`/`cas`/`iqset`/`delete`) (spec §4.7.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreResult {
    Stored,
    NotStored,
    NotFound,
    Exists,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientError {
    NonNumericValue,
    AppendSizeExceedsSlabClass,
}

/// CO-family outcomes that carry no value payload (spec §4.7.7, §7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoResult {
    Ok,
    Abort,
    Retry,
    Invalid,
    NotFound,
}

/// Outcome of [`crate::engine::Engine::commit`]/[`crate::engine::Engine::release`]
/// (spec §4.7.5, §4.7.6) — neither has a value payload or a conflict case,
/// only "the transaction existed" or not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxResult {
    Ok,
    NotFound,
}

/// Success payload of [`crate::engine::Engine::ciget`] (spec §4.7.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CiGetOutcome {
    /// An `O`-family colease already includes this session; returns its
    /// pending version.
    PendingVersion(ItemRef),
    /// The session may proceed to read the live value itself.
    Ok,
    Retry,
    Abort,
}

/// Success payload of [`crate::engine::Engine::oqread`] (spec §4.7.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OqReadOutcome {
    Value(ItemRef),
    Abort,
}

/// Outcome of [`crate::engine::Engine::oqswap`]/[`crate::engine::Engine::oqwrite`]
/// (spec §4.7.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OqWriteOutcome {
    Ok,
    Abort,
}

/// Failure outcome of [`crate::engine::Engine::iqincr`]/[`crate::engine::Engine::iqdecr`]
/// (spec §4.7.8, §7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncrError {
    /// A conflicting lease exists under a different token.
    Miss,
    /// The existing value or pending version isn't ASCII-decimal (spec §6).
    NonNumeric,
    ServerError,
}
