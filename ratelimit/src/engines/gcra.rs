//! GCRA (generic cell rate algorithm) engine. Primary-only (§4.7): a single
//! theoretical-arrival-time scalar replaces the fixed-window/token-bucket
//! pair of counters, trading smoothing against the inability to also serve
//! as a secondary strategy.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use ratelimit_backend::{CasLoopConfig, Mode, MutatorOutcome, SyncBackend, StateCodec, cas_loop};
use ratelimit_core::{Clock, CoreError, EngineTag, Key};

use crate::error::RateLimitResult;
use crate::result::QuotaOutcome;
use crate::strategy::Strategy;

/// GCRA configuration: `burst` cells of tolerance, admitted at `rate`/second.
pub struct GcraStrategy {
    burst: u64,
    emission_interval_ns: i64,
    delay_tolerance_ns: i64,
}

impl GcraStrategy {
    /// Build a strategy. Rejects `burst == 0` or a non-positive `rate`.
    pub fn new(burst: u64, rate: f64) -> Result<Self, CoreError> {
        if burst == 0 {
            return Err(CoreError::InvalidConfig("GCRA burst must be at least 1"));
        }
        if !(rate > 0.0) {
            return Err(CoreError::InvalidConfig("GCRA rate must be positive"));
        }
        let emission_interval_ns = (1.0 / rate * 1_000_000_000.0) as i64;
        let delay_tolerance_ns = emission_interval_ns * (burst - 1) as i64;
        Ok(Self {
            burst,
            emission_interval_ns,
            delay_tolerance_ns,
        })
    }

    fn decode(&self, key: &Key, prev: Option<&str>, now_ns: i64) -> Result<i64, ratelimit_backend::BackendError> {
        match prev {
            None => Ok(now_ns),
            Some(blob) => {
                let mut fields = StateCodec::decode(key.as_str(), blob)?;
                fields.next_i64()
            }
        }
    }

    fn encode(&self, tat_ns: i64) -> String {
        StateCodec::encoder().push_i64(tat_ns).finish()
    }
}

#[async_trait]
impl Strategy for GcraStrategy {
    fn engine_tag(&self) -> EngineTag {
        EngineTag::Gcra
    }

    fn default_max_retries(&self) -> u32 {
        self.burst as u32 + 1
    }

    async fn allow(
        &self,
        backend: &SyncBackend,
        key: &Key,
        clock: &dyn Clock,
        max_retries: u32,
        deadline: Option<Instant>,
    ) -> RateLimitResult<QuotaOutcome> {
        let config = CasLoopConfig {
            max_retries,
            ttl: Some(ttl_for(self.delay_tolerance_ns)),
            deadline,
            ..CasLoopConfig::default()
        };
        let outcome = cas_loop(
            backend,
            key,
            "gcra",
            Mode::TryUpdate,
            config,
            || clock.now_ns(),
            |prev, now_ns| {
                let tat_ns = self.decode(key, prev, now_ns)?;
                let earliest_tat = tat_ns.max(now_ns);
                let allow_at = earliest_tat - self.delay_tolerance_ns;

                if now_ns >= allow_at {
                    let new_tat = earliest_tat + self.emission_interval_ns;
                    let (used, remaining) = usage(new_tat, now_ns, self.emission_interval_ns, self.burst);
                    Ok(MutatorOutcome {
                        new_state: Some(self.encode(new_tat)),
                        allowed: true,
                        result: QuotaOutcome::single(crate::result::QuotaResult {
                            allowed: true,
                            used,
                            remaining,
                            total: self.burst,
                            reset_ns: new_tat,
                        }),
                    })
                } else {
                    let (used, remaining) = usage(earliest_tat, now_ns, self.emission_interval_ns, self.burst);
                    Ok(MutatorOutcome {
                        new_state: None,
                        allowed: false,
                        result: QuotaOutcome::single(crate::result::QuotaResult {
                            allowed: false,
                            used,
                            remaining,
                            total: self.burst,
                            reset_ns: allow_at,
                        }),
                    })
                }
            },
        )
        .await?;
        Ok(outcome)
    }

    async fn peek(
        &self,
        backend: &SyncBackend,
        key: &Key,
        clock: &dyn Clock,
        max_retries: u32,
        deadline: Option<Instant>,
    ) -> RateLimitResult<QuotaOutcome> {
        let config = CasLoopConfig {
            max_retries,
            deadline,
            ..CasLoopConfig::default()
        };
        let outcome = cas_loop(
            backend,
            key,
            "gcra",
            Mode::ReadOnly,
            config,
            || clock.now_ns(),
            |prev, now_ns| {
                let tat_ns = self.decode(key, prev, now_ns)?;
                let earliest_tat = tat_ns.max(now_ns);
                let allow_at = earliest_tat - self.delay_tolerance_ns;
                let allowed = now_ns >= allow_at;
                let (used, remaining) = usage(earliest_tat, now_ns, self.emission_interval_ns, self.burst);
                Ok(MutatorOutcome {
                    new_state: None,
                    allowed,
                    result: QuotaOutcome::single(crate::result::QuotaResult {
                        allowed,
                        used,
                        remaining,
                        total: self.burst,
                        reset_ns: if allowed { earliest_tat } else { allow_at },
                    }),
                })
            },
        )
        .await?;
        Ok(outcome)
    }

    async fn reset(&self, backend: &SyncBackend, key: &Key, deadline: Option<Instant>) -> RateLimitResult<()> {
        use ratelimit_backend::Backend;
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(ratelimit_backend::BackendError::Canceled { key: key.to_string() }.into());
            }
        }
        backend.delete(key).await?;
        Ok(())
    }

    async fn refund(
        &self,
        backend: &SyncBackend,
        key: &Key,
        clock: &dyn Clock,
        max_retries: u32,
        deadline: Option<Instant>,
    ) -> RateLimitResult<()> {
        let config = CasLoopConfig {
            max_retries,
            ttl: Some(ttl_for(self.delay_tolerance_ns)),
            deadline,
            ..CasLoopConfig::default()
        };
        cas_loop(
            backend,
            key,
            "gcra",
            Mode::TryUpdate,
            config,
            || clock.now_ns(),
            |prev, now_ns| {
                let tat_ns = self.decode(key, prev, now_ns)?;
                let refunded = (tat_ns - self.emission_interval_ns).max(now_ns);
                Ok(MutatorOutcome {
                    new_state: Some(self.encode(refunded)),
                    allowed: true,
                    result: (),
                })
            },
        )
        .await?;
        Ok(())
    }
}

fn usage(tat_ns: i64, now_ns: i64, emission_interval_ns: i64, burst: u64) -> (u64, u64) {
    let occupied_ns = (tat_ns - now_ns).max(0);
    let used = (occupied_ns / emission_interval_ns.max(1)) as u64;
    let used = used.min(burst);
    (used, burst.saturating_sub(used))
}

fn ttl_for(delay_tolerance_ns: i64) -> Duration {
    Duration::from_nanos((delay_tolerance_ns.max(0) as u64) * 2).max(Duration::from_secs(1))
}
