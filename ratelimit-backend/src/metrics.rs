//! Backend and CAS-loop metrics.
//!
//! Enable the `metrics` feature to use these metrics. All functions in this
//! module are `#[inline]` no-ops when the feature is disabled, so the
//! instrumentation compiles away entirely.
//!
//! ## Naming pattern
//!
//! `ratelimit_backend_{operation}_{metric_type}`.

use std::time::Duration;

#[cfg(feature = "metrics")]
use std::time::Instant;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

/// Zero-cost timer for metrics collection.
///
/// When the `metrics` feature is enabled this captures the start time; when
/// disabled it is a zero-sized struct with no overhead.
pub struct Timer {
    #[cfg(feature = "metrics")]
    start: Instant,
}

impl Timer {
    /// Start a new timer, capturing the current instant if metrics are
    /// enabled.
    #[inline]
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "metrics")]
            start: Instant::now(),
        }
    }

    /// Elapsed duration since the timer was created.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        #[cfg(feature = "metrics")]
        {
            self.start.elapsed()
        }
        #[cfg(not(feature = "metrics"))]
        {
            Duration::ZERO
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "metrics")]
lazy_static! {
    /// Total CAS attempts (get + check_and_set round-trips) per engine.
    pub static ref CAS_ATTEMPTS_TOTAL: &'static str = {
        metrics::describe_counter!(
            "ratelimit_backend_cas_attempts_total",
            "Total number of CAS attempts per engine."
        );
        "ratelimit_backend_cas_attempts_total"
    };

    /// Histogram of CAS attempts needed per call.
    pub static ref CAS_ATTEMPTS_PER_CALL: &'static str = {
        metrics::describe_histogram!(
            "ratelimit_backend_cas_attempts_per_call",
            metrics::Unit::Count,
            "Number of CAS attempts a single Allow/Peek/Reset call needed."
        );
        "ratelimit_backend_cas_attempts_per_call"
    };

    /// Total CAS mismatches (lost races) per engine.
    pub static ref CAS_MISMATCH_TOTAL: &'static str = {
        metrics::describe_counter!(
            "ratelimit_backend_cas_mismatch_total",
            "Total number of CAS compare mismatches per engine."
        );
        "ratelimit_backend_cas_mismatch_total"
    };

    /// Total contention-exhaustion events per engine.
    pub static ref CONTENTION_TOTAL: &'static str = {
        metrics::describe_counter!(
            "ratelimit_backend_contention_total",
            "Total number of calls that exhausted their retry budget."
        );
        "ratelimit_backend_contention_total"
    };

    /// Backend read-duration histogram.
    pub static ref READ_DURATION: &'static str = {
        metrics::describe_histogram!(
            "ratelimit_backend_read_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of backend get operations in seconds."
        );
        "ratelimit_backend_read_duration_seconds"
    };

    /// Backend CAS-write-duration histogram.
    pub static ref WRITE_DURATION: &'static str = {
        metrics::describe_histogram!(
            "ratelimit_backend_write_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of backend check_and_set operations in seconds."
        );
        "ratelimit_backend_write_duration_seconds"
    };
}

/// Record one CAS attempt (a `get` + optional `check_and_set` round-trip).
#[cfg(feature = "metrics")]
#[inline]
pub fn record_cas_attempt(engine: &str) {
    metrics::counter!(*CAS_ATTEMPTS_TOTAL, "engine" => engine.to_string()).increment(1);
}

/// No-op when the `metrics` feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_cas_attempt(_engine: &str) {}

/// Record the total number of CAS attempts a completed call needed.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_attempts_per_call(engine: &str, attempts: u32) {
    metrics::histogram!(*CAS_ATTEMPTS_PER_CALL, "engine" => engine.to_string())
        .record(attempts as f64);
}

/// No-op when the `metrics` feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_attempts_per_call(_engine: &str, _attempts: u32) {}

/// Record a lost CAS race (compare mismatch).
#[cfg(feature = "metrics")]
#[inline]
pub fn record_cas_mismatch(engine: &str) {
    metrics::counter!(*CAS_MISMATCH_TOTAL, "engine" => engine.to_string()).increment(1);
}

/// No-op when the `metrics` feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_cas_mismatch(_engine: &str) {}

/// Record a retry-budget exhaustion.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_contention(engine: &str) {
    metrics::counter!(*CONTENTION_TOTAL, "engine" => engine.to_string()).increment(1);
}

/// No-op when the `metrics` feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_contention(_engine: &str) {}

/// Record a backend read's duration.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_read(engine: &str, duration: Duration) {
    metrics::histogram!(*READ_DURATION, "engine" => engine.to_string())
        .record(duration.as_secs_f64());
}

/// No-op when the `metrics` feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_read(_engine: &str, _duration: Duration) {}

/// Record a backend CAS write's duration.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_write(engine: &str, duration: Duration) {
    metrics::histogram!(*WRITE_DURATION, "engine" => engine.to_string())
        .record(duration.as_secs_f64());
}

/// No-op when the `metrics` feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_write(_engine: &str, _duration: Duration) {}
