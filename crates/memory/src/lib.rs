//! Concrete in-process [`leasecache_core::slab::SlabAllocator`] and
//! [`leasecache_core::assoc::AssocIndex`] implementations. Single process,
//! no persistence, no sharding — a reference backing suitable for
//! embedding the engine in one address space and for its own test suite.

pub mod assoc;
pub mod slab;

pub use assoc::MemoryIndex;
pub use slab::MemorySlab;
