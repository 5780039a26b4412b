//! Clock abstraction for cache ages and record timestamps.
//!
//! Every timestamp the assistant persists (context snapshots, the last
//! generated command) comes from a [`TimeProvider`], so freshness logic can be
//! tested by injecting a fixed or manually advanced clock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for providing timestamps.
///
/// # Example
///
/// ```
/// use forgor::clock::{SystemTimeProvider, TimeProvider};
///
/// let clock = SystemTimeProvider;
/// assert!(clock.now() > 0);
/// ```
pub trait TimeProvider: Send + Sync {
    /// Returns the current Unix timestamp in seconds.
    fn now(&self) -> u64;
}

/// Wall-clock time provider used in production.
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
///
/// ```
/// use forgor::clock::{ManualClock, TimeProvider};
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(330);
/// assert_eq!(clock.now(), 1_330);
/// ```
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Moves the clock forward by `secs` seconds.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, value: u64) {
        self.now.store(value, Ordering::SeqCst);
    }
}

impl TimeProvider for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
