//! In-memory backend capacity metrics.
//!
//! Enable the `metrics` feature to use these metrics.
//!
//! ## Metrics
//!
//! - `ratelimit_memory_entries` - current number of live entries (gauge)
//! - `ratelimit_memory_swept_total` - entries removed by lazy/manual expiry sweeps (counter)
//!
//! Both metrics carry a `backend` label to distinguish multiple instances.

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Metric name for the live entry count gauge.
    pub static ref MEMORY_ENTRIES: &'static str = {
        metrics::describe_gauge!(
            "ratelimit_memory_entries",
            "Current number of entries held by the in-memory backend."
        );
        "ratelimit_memory_entries"
    };

    /// Metric name for the expiry-sweep counter.
    pub static ref MEMORY_SWEPT_TOTAL: &'static str = {
        metrics::describe_counter!(
            "ratelimit_memory_swept_total",
            "Total number of entries removed by lazy or manual expiry sweeps."
        );
        "ratelimit_memory_swept_total"
    };
}

/// Record the current entry count for `backend`.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_entry_count(backend: &str, entries: u64) {
    metrics::gauge!(*MEMORY_ENTRIES, "backend" => backend.to_string()).set(entries as f64);
}

/// No-op when the `metrics` feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_entry_count(_backend: &str, _entries: u64) {}

/// Record that `swept` entries were removed by an expiry sweep.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_swept(backend: &str, swept: u64) {
    if swept > 0 {
        metrics::counter!(*MEMORY_SWEPT_TOTAL, "backend" => backend.to_string()).increment(swept);
    }
}

/// No-op when the `metrics` feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_swept(_backend: &str, _swept: u64) {}
