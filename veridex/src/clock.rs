//! Wall-clock abstraction.
//!
//! Every time-driven policy decision in Veridex (session expiry, the
//! 24-hour spending window, token lifetimes, approval deadlines) reads the
//! clock through this seam so that tests can drive time deterministically.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::timestamp::UnixTimestamp;

/// A source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> UnixTimestamp;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixTimestamp {
        UnixTimestamp::now()
    }
}

/// A manually advanced clock for tests.
///
/// Starts at a fixed instant and only moves when told to, so window
/// rollover and expiry behavior can be asserted without sleeping.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    /// Creates a manual clock set to `start`.
    #[must_use]
    pub fn new(start: UnixTimestamp) -> Self {
        Self(AtomicU64::new(start.as_secs()))
    }

    /// Moves the clock forward by `secs` seconds.
    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute instant.
    pub fn set(&self, now: UnixTimestamp) {
        self.0.store(now.as_secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UnixTimestamp {
        UnixTimestamp::from_secs(self.0.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(UnixTimestamp::from_secs(1000));
        assert_eq!(clock.now().as_secs(), 1000);
        clock.advance(500);
        assert_eq!(clock.now().as_secs(), 1500);
        clock.set(UnixTimestamp::from_secs(10));
        assert_eq!(clock.now().as_secs(), 10);
    }
}
