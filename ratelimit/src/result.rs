//! Per-quota and merged admission results returned by every strategy and by
//! [`crate::Limiter`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// The name a single-quota engine reports its one entry under.
pub const DEFAULT_QUOTA: &str = "default";

/// Outcome of one quota's evaluation within a single engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaResult {
    /// Whether this quota alone admitted the request.
    pub allowed: bool,
    /// Units consumed against this quota's current window/bucket.
    pub used: u64,
    /// Units still available (`total - used`, floor-clamped at zero).
    pub remaining: u64,
    /// The quota's configured capacity.
    pub total: u64,
    /// Unix-nanosecond instant at which `remaining` will next increase.
    pub reset_ns: i64,
}

/// Outcome of one engine's `allow`/`peek`/`reset` call: the AND of every
/// named quota plus the individual results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaOutcome {
    /// Whether every quota in [`QuotaOutcome::quotas`] allowed the request.
    pub allowed: bool,
    /// Per-quota results, keyed by quota name (`"default"` for single-quota
    /// engines).
    pub quotas: BTreeMap<SmolStr, QuotaResult>,
}

impl QuotaOutcome {
    /// Build a single-quota outcome under the [`DEFAULT_QUOTA`] name.
    pub fn single(result: QuotaResult) -> Self {
        let mut quotas = BTreeMap::new();
        quotas.insert(SmolStr::new(DEFAULT_QUOTA), result);
        Self {
            allowed: result.allowed,
            quotas,
        }
    }
}

/// The merged, caller-facing result of [`crate::Limiter::allow`] or
/// [`crate::Limiter::peek`].
///
/// When a secondary strategy is configured, quota names are prefixed
/// `primary_<name>` / `secondary_<name>` so callers can inspect both
/// engines' accounting from one map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllowResult {
    /// Whether the request was admitted overall.
    pub allowed: bool,
    /// Merged, possibly-prefixed per-quota results.
    pub quotas: BTreeMap<SmolStr, QuotaResult>,
}

pub(crate) fn merge_prefixed(prefix: &str, outcome: &QuotaOutcome, into: &mut BTreeMap<SmolStr, QuotaResult>) {
    for (name, result) in &outcome.quotas {
        into.insert(SmolStr::new(format!("{prefix}_{name}")), *result);
    }
}
