//! Monotonic seconds counter with a known epoch (spec §2 component 1).

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Absolute seconds since the engine epoch. `0` has the reserved meaning
/// "never" wherever it appears as an `exptime`.
pub type AbsTime = u32;

/// A source of the engine's monotonic clock. Implementations must never go
/// backwards within a process lifetime.
pub trait Clock: Send + Sync {
    fn now(&self) -> AbsTime;
}

/// Wall-clock backed implementation, seconds since `UNIX_EPOCH`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> AbsTime {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as AbsTime)
            .unwrap_or(0)
    }
}

/// A clock that only advances when told to. Used by tests to make expiry
/// and LRU ordering deterministic without sleeping.
#[derive(Debug, Default)]
pub struct FrozenClock {
    now: AtomicU32,
}

impl FrozenClock {
    pub fn new(start: AbsTime) -> Self {
        Self { now: AtomicU32::new(start) }
    }

    pub fn advance(&self, seconds: u32) -> AbsTime {
        self.now.fetch_add(seconds, Ordering::SeqCst) + seconds
    }

    pub fn set(&self, at: AbsTime) {
        self.now.store(at, Ordering::SeqCst);
    }
}

impl Clock for FrozenClock {
    fn now(&self) -> AbsTime {
        self.now.load(Ordering::SeqCst)
    }
}
