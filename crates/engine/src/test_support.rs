//! Test harness wiring a [`MemorySlab`] + [`MemoryIndex`] + [`FrozenClock`]
//! triple behind an [`Engine`], mirroring the reference implementation's
//! pattern of a single in-memory fixture shared by every unit and
//! integration test (spec §8, §9 "deterministic test clock").

use leasecache_core::config::EngineConfig;
use leasecache_core::time::FrozenClock;
use leasecache_memory::{MemoryIndex, MemorySlab};

use crate::engine::Engine;

pub type TestEngine = Engine<MemorySlab, MemoryIndex, ClockHandle>;

/// A ready-to-use engine over an unbounded in-memory slab, its clock
/// frozen at `start` (default `1_000`) so expiry and LRU-ordering tests are
/// deterministic without sleeping.
pub struct TestCache {
    pub engine: TestEngine,
    pub clock: std::sync::Arc<FrozenClock>,
}

impl TestCache {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let clock = std::sync::Arc::new(FrozenClock::new(1_000));
        let engine = Engine::new(MemorySlab::new(&config), MemoryIndex::new(), ClockHandle(clock.clone()), config);
        TestCache { engine, clock }
    }

    /// A cache whose slab allocator is capped, for exhaustion / eviction
    /// tests (spec §4.2 alloc policy step 4).
    pub fn bounded(capacity: usize) -> Self {
        let config = EngineConfig::default();
        let clock = std::sync::Arc::new(FrozenClock::new(1_000));
        let slab = MemorySlab::with_capacity(&config, Some(capacity));
        let engine = Engine::new(slab, MemoryIndex::new(), ClockHandle(clock.clone()), config);
        TestCache { engine, clock }
    }

    pub fn advance(&self, seconds: u32) -> u32 {
        self.clock.advance(seconds)
    }
}

impl Default for TestCache {
    fn default() -> Self {
        Self::new()
    }
}

/// [`FrozenClock`] lives behind an `Arc` so tests can advance time from
/// outside the engine while the engine itself only ever sees [`Clock::now`].
#[derive(Clone)]
pub struct ClockHandle(std::sync::Arc<FrozenClock>);

impl leasecache_core::time::Clock for ClockHandle {
    fn now(&self) -> leasecache_core::time::AbsTime {
        self.0.now()
    }
}
