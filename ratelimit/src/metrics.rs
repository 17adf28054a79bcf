//! Admission-decision metrics, layered above the CAS-loop metrics already
//! recorded by `ratelimit-backend`.

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Requests admitted, labeled by engine and quota name.
    pub static ref ADMITTED_TOTAL: &'static str = {
        metrics::describe_counter!(
            "ratelimit_admitted_total",
            "Total number of requests admitted, by engine and quota."
        );
        "ratelimit_admitted_total"
    };
    /// Requests denied, labeled by engine and quota name.
    pub static ref DENIED_TOTAL: &'static str = {
        metrics::describe_counter!(
            "ratelimit_denied_total",
            "Total number of requests denied, by engine and quota."
        );
        "ratelimit_denied_total"
    };
    /// Requests denied because the CAS retry loop exhausted its budget.
    pub static ref CONTENTION_EXHAUSTED_TOTAL: &'static str = {
        metrics::describe_counter!(
            "ratelimit_contention_exhausted_total",
            "Total number of allow()/peek() calls that failed because the CAS retry loop ran out of attempts."
        );
        "ratelimit_contention_exhausted_total"
    };
    /// Secondary-denial refunds that themselves failed.
    pub static ref REFUND_FAILURE_TOTAL: &'static str = {
        metrics::describe_counter!(
            "ratelimit_refund_failure_total",
            "Total number of best-effort primary refunds that failed after a secondary denial."
        );
        "ratelimit_refund_failure_total"
    };
}

/// Record an admission decision for one engine/quota pair.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_decision(engine: &str, quota: &str, allowed: bool) {
    if allowed {
        metrics::counter!(*ADMITTED_TOTAL, "engine" => engine.to_string(), "quota" => quota.to_string()).increment(1);
    } else {
        metrics::counter!(*DENIED_TOTAL, "engine" => engine.to_string(), "quota" => quota.to_string()).increment(1);
    }
}

/// Record that the CAS retry loop exhausted its attempts for `engine`.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_contention_exhausted(engine: &str) {
    metrics::counter!(*CONTENTION_EXHAUSTED_TOTAL, "engine" => engine.to_string()).increment(1);
}

/// Record that a best-effort primary refund failed.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_refund_failure(engine: &str) {
    metrics::counter!(*REFUND_FAILURE_TOTAL, "engine" => engine.to_string()).increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_decision(_engine: &str, _quota: &str, _allowed: bool) {}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_contention_exhausted(_engine: &str) {}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_refund_failure(_engine: &str) {}
