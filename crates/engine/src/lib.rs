//! The lease/session state machine built on top of `leasecache-core`'s item
//! store (spec §4.7, §5): associative-key prefixing, lease token minting,
//! the IQ/CO operation facade, and the per-operation statistics a front-end
//! protocol layer would report.

pub mod container;
pub mod engine;
pub mod error;
pub mod keys;
pub mod lease_token;
pub mod result;
pub mod stats;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use engine::{Engine, EngineHandle};
pub use error::{Error, Result};
pub use lease_token::{LeaseTokenGen, LEASE_HOTMISS};
pub use result::{
    CiGetOutcome, ClientError, CoResult, IncrError, IqError, IqOutcome, OqReadOutcome, OqWriteOutcome, StoreResult,
    TxResult,
};
pub use stats::EngineStats;
