//! Leaky-bucket engine: the dual of token bucket. A level that fills by one
//! on each admission and continuously drains at `rate` per second.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use ratelimit_backend::{CasLoopConfig, Mode, MutatorOutcome, SyncBackend, StateCodec, cas_loop};
use ratelimit_core::{Clock, CoreError, EngineTag, Key};

use crate::error::RateLimitResult;
use crate::result::QuotaOutcome;
use crate::strategy::Strategy;

/// Leaky-bucket configuration: `burst` capacity, drained at `rate`/second.
pub struct LeakyBucketStrategy {
    burst: u64,
    rate: f64,
}

impl LeakyBucketStrategy {
    /// Build a strategy. Rejects `burst == 0` or a non-positive `rate`.
    pub fn new(burst: u64, rate: f64) -> Result<Self, CoreError> {
        if burst == 0 {
            return Err(CoreError::InvalidConfig("leaky bucket burst must be at least 1"));
        }
        if !(rate > 0.0) {
            return Err(CoreError::InvalidConfig("leaky bucket rate must be positive"));
        }
        Ok(Self { burst, rate })
    }

    fn decode(&self, key: &Key, prev: Option<&str>, now_ns: i64) -> Result<(f64, i64), ratelimit_backend::BackendError> {
        match prev {
            None => Ok((0.0, now_ns)),
            Some(blob) => {
                let mut fields = StateCodec::decode(key.as_str(), blob)?;
                let level_bits = fields.next_i64()?;
                let last_leak_ns = fields.next_i64()?;
                Ok((f64::from_bits(level_bits as u64), last_leak_ns))
            }
        }
    }

    fn encode(&self, level: f64, last_leak_ns: i64) -> String {
        StateCodec::encoder()
            .push_i64(level.to_bits() as i64)
            .push_i64(last_leak_ns)
            .finish()
    }

    fn drain(&self, level: f64, last_leak_ns: i64, now_ns: i64) -> f64 {
        let elapsed_s = (now_ns - last_leak_ns).max(0) as f64 / 1_000_000_000.0;
        (level - elapsed_s * self.rate).max(0.0)
    }
}

#[async_trait]
impl Strategy for LeakyBucketStrategy {
    fn engine_tag(&self) -> EngineTag {
        EngineTag::LeakyBucket
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
            "lb",
            Mode::TryUpdate,
            config,
            || clock.now_ns(),
            |prev, now_ns| {
                let (level, last_leak_ns) = self.decode(key, prev, now_ns)?;
                let drained = self.drain(level, last_leak_ns, now_ns);

                if drained + 1.0 <= self.burst as f64 {
                    let new_level = drained + 1.0;
                    let reset_ns = now_ns + drain_delay_ns(new_level.fract(), self.rate);
                    Ok(MutatorOutcome {
                        new_state: Some(self.encode(new_level, now_ns)),
                        allowed: true,
                        result: QuotaOutcome::single(crate::result::QuotaResult {
                            allowed: true,
                            used: new_level.ceil() as u64,
                            remaining: self.burst.saturating_sub(new_level.floor() as u64),
                            total: self.burst,
                            reset_ns,
                        }),
                    })
                } else {
                    let overflow = drained - self.burst as f64 + 1.0;
                    let reset_ns = now_ns + drain_delay_ns(overflow, self.rate);
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
            "lb",
            Mode::ReadOnly,
            config,
            || clock.now_ns(),
            |prev, now_ns| {
                let (level, last_leak_ns) = self.decode(key, prev, now_ns)?;
                let drained = self.drain(level, last_leak_ns, now_ns);
                let allowed = drained + 1.0 <= self.burst as f64;
                let remaining = self.burst.saturating_sub(drained.floor() as u64);
                let reset_ns = now_ns
                    + if allowed {
                        drain_delay_ns(drained.fract(), self.rate)
                    } else {
                        drain_delay_ns(drained - self.burst as f64 + 1.0, self.rate)
                    };
                Ok(MutatorOutcome {
                    new_state: None,
                    allowed,
                    result: QuotaOutcome::single(crate::result::QuotaResult {
                        allowed,
                        used: drained.ceil() as u64,
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
            "lb",
            Mode::TryUpdate,
            config,
            || clock.now_ns(),
            |prev, now_ns| {
                let (level, last_leak_ns) = self.decode(key, prev, now_ns)?;
                let drained = self.drain(level, last_leak_ns, now_ns);
                let refunded = (drained - 1.0).max(0.0);
                Ok(MutatorOutcome {
                    new_state: Some(self.encode(refunded, now_ns)),
                    allowed: true,
                    result: (),
                })
            },
        )
        .await?;
        Ok(())
    }
}

fn drain_delay_ns(level_units: f64, rate: f64) -> i64 {
    (level_units.max(0.0) / rate * 1_000_000_000.0) as i64
}

fn ttl_for(burst: u64, rate: f64) -> Duration {
    let drain_seconds = burst as f64 / rate;
    Duration::from_secs_f64((drain_seconds * 2.0).max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratelimit_core::{KeyBuilder, TestClock};
    use ratelimit_memory::MemoryBackend;

    fn key() -> Key {
        KeyBuilder::new("api")
            .engine(EngineTag::LeakyBucket)
            .dynamic(Some("user-1"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn fills_to_capacity_then_denies() {
        let strategy = LeakyBucketStrategy::new(10, 0.1).unwrap();
        let backend = MemoryBackend::new();
        let clock = TestClock::new(0);

        let mut allowed_count = 0;
        for _ in 0..20 {
            if strategy.allow(&backend, &key(), &clock, 30, None).await.unwrap().allowed {
                allowed_count += 1;
            }
        }
        assert_eq!(allowed_count, 10);
    }

    #[tokio::test]
    async fn drains_over_time() {
        let strategy = LeakyBucketStrategy::new(10, 0.1).unwrap();
        let backend = MemoryBackend::new();
        let clock = TestClock::new(0);

        for _ in 0..10 {
            assert!(strategy.allow(&backend, &key(), &clock, 30, None).await.unwrap().allowed);
        }
        assert!(!strategy.allow(&backend, &key(), &clock, 30, None).await.unwrap().allowed);

        clock.advance(Duration::from_secs(10));
        assert!(strategy.allow(&backend, &key(), &clock, 30, None).await.unwrap().allowed);
    }

    #[test]
    fn rejects_zero_burst() {
        assert!(LeakyBucketStrategy::new(0, 1.0).is_err());
    }
}
