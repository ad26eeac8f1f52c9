//! Clock abstraction.
//!
//! Expiry in warden is always a data comparison against a clock reading,
//! never a scheduled timer. Components take the clock as a trait object so
//! tests can drive time manually.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;

/// A source of unix timestamps.
pub trait Clock: Send + Sync {
    /// The current unix time in seconds.
    fn now_unix(&self) -> i64;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// A manually-driven clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a manual clock starting at the given unix time.
    pub fn new(now: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(now),
        })
    }

    /// Set the current time.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Advance the current time by the given number of seconds.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_unix(), 1_000);
        clock.advance(3_600);
        assert_eq!(clock.now_unix(), 4_600);
        clock.set(42);
        assert_eq!(clock.now_unix(), 42);
    }

    #[test]
    fn test_system_clock_is_plausible() {
        // Any date after 2020 is good enough to prove we read real time.
        assert!(SystemClock.now_unix() > 1_577_836_800);
    }
}
