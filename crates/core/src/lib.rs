//! Item store, LRU registry and key-list codec behind the lease-protocol
//! cache engine (spec §1, §4). This crate only ever reaches storage through
//! the [`slab::SlabAllocator`] and [`assoc::AssocIndex`] traits — a concrete
//! backing implementation lives in `leasecache-memory`, and the lease/
//! session state machine built on top lives in `leasecache-engine`.

pub mod assoc;
pub mod config;
pub mod error;
pub mod item;
pub mod keylist;
pub mod lru;
pub mod slab;
pub mod store;
pub mod time;

pub use assoc::AssocIndex;
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use item::{ColeaseKind, Item, ItemFlags, ItemRole, LeaseKind, SessStatus};
pub use keylist::KeyList;
pub use slab::{ItemRef, SlabAllocator, SlabId};
pub use store::{ExpiredCounters, ItemStore};
pub use time::{AbsTime, Clock, FrozenClock, SystemClock};
