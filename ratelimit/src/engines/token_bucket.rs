//! Token-bucket engine: a continuously-refilling reservoir of up to `burst`
//! fractional tokens, refilled at `rate` tokens per second.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use ratelimit_backend::{CasLoopConfig, Mode, MutatorOutcome, SyncBackend, StateCodec, cas_loop};
use ratelimit_core::{Clock, CoreError, EngineTag, Key};

use crate::error::RateLimitResult;
use crate::result::QuotaOutcome;
use crate::strategy::Strategy;

/// Token-bucket configuration: `burst` capacity, refilled at `rate`/second.
pub struct TokenBucketStrategy {
    burst: u64,
    rate: f64,
}

impl TokenBucketStrategy {
    /// Build a strategy. Rejects `burst == 0` or a non-positive `rate`.
    pub fn new(burst: u64, rate: f64) -> Result<Self, CoreError> {
        if burst == 0 {
            return Err(CoreError::InvalidConfig("token bucket burst must be at least 1"));
        }
        if !(rate > 0.0) {
            return Err(CoreError::InvalidConfig("token bucket rate must be positive"));
        }
        Ok(Self { burst, rate })
    }

    fn decode(&self, key: &Key, prev: Option<&str>, now_ns: i64) -> Result<(f64, i64), ratelimit_backend::BackendError> {
        match prev {
            None => Ok((self.burst as f64, now_ns)),
            Some(blob) => {
                let mut fields = StateCodec::decode(key.as_str(), blob)?;
                let tokens_bits = fields.next_i64()?;
                let last_refill_ns = fields.next_i64()?;
                Ok((f64::from_bits(tokens_bits as u64), last_refill_ns))
            }
        }
    }

    fn encode(&self, tokens: f64, last_refill_ns: i64) -> String {
        StateCodec::encoder()
            .push_i64(tokens.to_bits() as i64)
            .push_i64(last_refill_ns)
            .finish()
    }

    fn refill(&self, tokens: f64, last_refill_ns: i64, now_ns: i64) -> f64 {
        let elapsed_s = (now_ns - last_refill_ns).max(0) as f64 / 1_000_000_000.0;
        (tokens + elapsed_s * self.rate).min(self.burst as f64)
    }
}

#[async_trait]
impl Strategy for TokenBucketStrategy {
    fn engine_tag(&self) -> EngineTag {
        EngineTag::TokenBucket
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
            ttl: Some(ttl_for(self.burst, self.rate)),
            deadline,
            ..CasLoopConfig::default()
        };
        let outcome = cas_loop(
            backend,
            key,
            "tb",
            Mode::TryUpdate,
            config,
            || clock.now_ns(),
            |prev, now_ns| {
                let (tokens, last_refill_ns) = self.decode(key, prev, now_ns)?;
                let refilled = self.refill(tokens, last_refill_ns, now_ns);

                if refilled >= 1.0 {
                    let remaining_after = refilled - 1.0;
                    let reset_ns = now_ns + reset_delay_ns(remaining_after.fract(), self.rate);
                    Ok(MutatorOutcome {
                        new_state: Some(self.encode(remaining_after, now_ns)),
                        allowed: true,
                        result: QuotaOutcome::single(crate::result::QuotaResult {
                            allowed: true,
                            used: self.burst - remaining_after.floor() as u64,
                            remaining: remaining_after.floor() as u64,
                            total: self.burst,
                            reset_ns,
                        }),
                    })
                } else {
                    let reset_ns = now_ns + reset_delay_ns(refilled, self.rate);
                    Ok(MutatorOutcome {
                        new_state: None,
                        allowed: false,
                        result: QuotaOutcome::single(crate::result::QuotaResult {
                            allowed: false,
                            used: self.burst,
                            remaining: 0,
                            total: self.burst,
                            reset_ns,
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
            "tb",
            Mode::ReadOnly,
            config,
            || clock.now_ns(),
            |prev, now_ns| {
                let (tokens, last_refill_ns) = self.decode(key, prev, now_ns)?;
                let refilled = self.refill(tokens, last_refill_ns, now_ns);
                let allowed = refilled >= 1.0;
                let remaining = refilled.floor() as u64;
                let reset_ns = if allowed {
                    now_ns + reset_delay_ns(refilled.fract(), self.rate)
                } else {
                    now_ns + reset_delay_ns(refilled, self.rate)
                };
                Ok(MutatorOutcome {
                    new_state: None,
                    allowed,
                    result: QuotaOutcome::single(crate::result::QuotaResult {
                        allowed,
                        used: self.burst.saturating_sub(remaining),
                        remaining,
                        total: self.burst,
                        reset_ns,
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
            ttl: Some(ttl_for(self.burst, self.rate)),
            deadline,
            ..CasLoopConfig::default()
        };
        cas_loop(
            backend,
            key,
            "tb",
            Mode::TryUpdate,
            config,
            || clock.now_ns(),
            |prev, now_ns| {
                let (tokens, last_refill_ns) = self.decode(key, prev, now_ns)?;
                let refilled = self.refill(tokens, last_refill_ns, now_ns);
                let replayed = (refilled + 1.0).min(self.burst as f64);
                Ok(MutatorOutcome {
                    new_state: Some(self.encode(replayed, now_ns)),
                    allowed: true,
                    result: (),
                })
            },
        )
        .await?;
        Ok(())
    }
}

fn reset_delay_ns(tokens_needed_fraction: f64, rate: f64) -> i64 {
    ((1.0 - tokens_needed_fraction).max(0.0) / rate * 1_000_000_000.0) as i64
}

fn ttl_for(burst: u64, rate: f64) -> Duration {
    let refill_seconds = burst as f64 / rate;
    Duration::from_secs_f64((refill_seconds * 2.0).max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratelimit_core::{KeyBuilder, TestClock};
    use ratelimit_memory::MemoryBackend;

    fn key() -> Key {
        KeyBuilder::new("api")
            .engine(EngineTag::TokenBucket)
            .dynamic(Some("user-1"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn burst_admissions_then_deny() {
        let strategy = TokenBucketStrategy::new(5, 0.5).unwrap();
        let backend = MemoryBackend::new();
        let clock = TestClock::new(0);

        for _ in 0..5 {
            assert!(strategy.allow(&backend, &key(), &clock, 10, None).await.unwrap().allowed);
        }
        assert!(!strategy.allow(&backend, &key(), &clock, 10, None).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn tokens_refill_over_time() {
        let strategy = TokenBucketStrategy::new(5, 0.5).unwrap();
        let backend = MemoryBackend::new();
        let clock = TestClock::new(0);

        for _ in 0..5 {
            strategy.allow(&backend, &key(), &clock, 10, None).await.unwrap();
        }
        clock.advance(Duration::from_millis(2200));
        assert!(strategy.allow(&backend, &key(), &clock, 10, None).await.unwrap().allowed);
        assert!(!strategy.allow(&backend, &key(), &clock, 10, None).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn refund_replays_a_token() {
        let strategy = TokenBucketStrategy::new(2, 1.0).unwrap();
        let backend = MemoryBackend::new();
        let clock = TestClock::new(0);

        strategy.allow(&backend, &key(), &clock, 10, None).await.unwrap();
        strategy.allow(&backend, &key(), &clock, 10, None).await.unwrap();
        assert!(!strategy.allow(&backend, &key(), &clock, 10, None).await.unwrap().allowed);

        strategy.refund(&backend, &key(), &clock, 10, None).await.unwrap();
        assert!(strategy.allow(&backend, &key(), &clock, 10, None).await.unwrap().allowed);
    }

    #[test]
    fn rejects_zero_burst() {
        assert!(TokenBucketStrategy::new(0, 1.0).is_err());
    }

    #[test]
    fn rejects_non_positive_rate() {
        assert!(TokenBucketStrategy::new(1, 0.0).is_err());
    }
}
