//! Injectable time source for rate-limiting engines.
//!
//! Engines read "now" exclusively through a [`Clock`] instead of calling
//! `SystemTime::now()` directly, so unit tests can advance time
//! deterministically instead of sleeping real wall-clock seconds.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current time, expressed as Unix nanoseconds.
///
/// Timestamps are signed because the wire format (see [`crate::key`]) allows
/// negative values, and because deltas between two readings are computed as
/// plain subtraction without an intermediate unsigned representation.
pub trait Clock: Send + Sync {
    /// Returns the current time as nanoseconds since the Unix epoch.
    fn now_ns(&self) -> i64;
}

/// The real wall-clock, backed by [`SystemTime::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> i64 {
        let now = SystemTime::now();
        match now.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_nanos() as i64,
            Err(e) => -(e.duration().as_nanos() as i64),
        }
    }
}

/// A manually-advanced clock for deterministic engine and CAS-loop tests.
///
/// Starts at an arbitrary fixed instant rather than zero so that engines
/// exercising "window_start in the past" logic see a realistic magnitude.
#[derive(Debug)]
pub struct TestClock {
    now_ns: AtomicI64,
}

impl TestClock {
    /// Create a test clock starting at the given Unix-nanosecond instant.
    pub fn new(start_ns: i64) -> Self {
        Self {
            now_ns: AtomicI64::new(start_ns),
        }
    }

    /// Advance the clock forward by the given number of nanoseconds.
    pub fn advance_ns(&self, delta_ns: i64) {
        self.now_ns.fetch_add(delta_ns, Ordering::SeqCst);
    }

    /// Advance the clock forward by the given duration.
    pub fn advance(&self, delta: std::time::Duration) {
        self.advance_ns(delta.as_nanos() as i64);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new(1_700_000_000_000_000_000)
    }
}

impl Clock for TestClock {
    fn now_ns(&self) -> i64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}
