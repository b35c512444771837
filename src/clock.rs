//! Timestamp sources.
//!
//! The limiter never reads a clock itself; callers pass timestamps in. These
//! clocks serve the pieces that need a notion of "now": the idle-key sweeper
//! and the command-line driver when an input line carries no timestamp.
//!
//! A sweeper must read time in the same unit and epoch as the admission
//! timestamps. When those come from the caller, use [`HighWaterClock`].

use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current time, in the same unit as admission timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock returning Unix seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock for tests and log replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: i64) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Clock that reads as the greatest timestamp observed so far.
///
/// Feeding every admission timestamp through [`HighWaterClock::observe`]
/// keeps a sweeper on the caller's timeline, whatever epoch it uses.
/// Before the first observation it reads `i64::MIN`, at which no key is idle.
#[derive(Debug)]
pub struct HighWaterClock {
    high_water: AtomicI64,
}

impl HighWaterClock {
    pub fn new() -> Self {
        Self {
            high_water: AtomicI64::new(i64::MIN),
        }
    }

    /// Advance to `timestamp` if it is newer than anything seen.
    pub fn observe(&self, timestamp: i64) {
        self.high_water.fetch_max(timestamp, Ordering::SeqCst);
    }
}

impl Default for HighWaterClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for HighWaterClock {
    fn now(&self) -> i64 {
        self.high_water.load(Ordering::SeqCst)
    }
}
