//! Fixed-window engine: one or more named quotas sharing a rolling-window
//! counter, bundled into a single state blob so one CAS updates all of them
//! atomically.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use ratelimit_backend::{CasLoopConfig, Mode, MutatorOutcome, SyncBackend, cas_loop};
use ratelimit_core::{Clock, CoreError, EngineTag, Key};
use smol_str::SmolStr;

use crate::error::RateLimitResult;
use crate::result::{QuotaOutcome, QuotaResult};
use crate::strategy::Strategy;

/// One named quota: `limit` admissions per `window`.
#[derive(Debug, Clone)]
pub struct QuotaSpec {
    /// Quota name, reported as a key in [`QuotaOutcome::quotas`].
    pub name: SmolStr,
    /// Maximum admissions within one rolling window.
    pub limit: u64,
    /// Window length.
    pub window: Duration,
}

impl QuotaSpec {
    /// Build a quota spec.
    pub fn new(name: impl Into<SmolStr>, limit: u64, window: Duration) -> Self {
        Self {
            name: name.into(),
            limit,
            window,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Decoded {
    count: i64,
    window_start_ns: i64,
}

/// Fixed-window rate limiter over one or more quotas.
pub struct FixedWindowStrategy {
    quotas: Vec<QuotaSpec>,
}

impl FixedWindowStrategy {
    /// Build a strategy from one or more quotas, sorted by name so the
    /// encoded blob's field order is deterministic.
    ///
    /// Rejects an empty quota list, a zero limit, a zero window, or
    /// duplicate quota names.
    pub fn new(mut quotas: Vec<QuotaSpec>) -> Result<Self, CoreError> {
        if quotas.is_empty() {
            return Err(CoreError::InvalidConfig(
                "fixed window strategy requires at least one quota",
            ));
        }
        for q in &quotas {
            if q.limit == 0 {
                return Err(CoreError::InvalidConfig(
                    "fixed window quota limit must be at least 1",
                ));
            }
            if q.window.is_zero() {
                return Err(CoreError::InvalidConfig(
                    "fixed window quota window must be greater than zero",
                ));
            }
        }
        quotas.sort_by(|a, b| a.name.cmp(&b.name));
        for pair in quotas.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(CoreError::InvalidConfig("duplicate fixed window quota name"));
            }
        }
        Ok(Self { quotas })
    }

    fn decode(&self, key: &Key, prev: Option<&str>) -> Result<Vec<Decoded>, ratelimit_backend::BackendError> {
        let Some(blob) = prev else {
            return Ok(self
                .quotas
                .iter()
                .map(|_| Decoded {
                    count: 0,
                    window_start_ns: 0,
                })
                .collect());
        };
        let mut fields = ratelimit_backend::StateCodec::decode(key.as_str(), blob)?;
        let mut out = Vec::with_capacity(self.quotas.len());
        for q in &self.quotas {
            let name = fields.next_str()?;
            if name != q.name.as_str() {
                return Err(ratelimit_backend::BackendError::StateCorrupt {
                    key: key.to_string(),
                    reason: format!("expected quota {:?}, found {:?}", q.name, name),
                });
            }
            let count = fields.next_i64()?;
            let window_start_ns = fields.next_i64()?;
            out.push(Decoded {
                count,
                window_start_ns,
            });
        }
        Ok(out)
    }

    fn encode(&self, decoded: &[Decoded]) -> String {
        let mut encoder = ratelimit_backend::StateCodec::encoder();
        for (q, d) in self.quotas.iter().zip(decoded) {
            encoder = encoder
                .push_str(q.name.as_str())
                .push_i64(d.count)
                .push_i64(d.window_start_ns);
        }
        encoder.finish()
    }

    fn quota_result(q: &QuotaSpec, d: Decoded) -> QuotaResult {
        QuotaResult {
            allowed: (d.count as u64) <= q.limit,
            used: d.count.max(0) as u64,
            remaining: q.limit.saturating_sub(d.count.max(0) as u64),
            total: q.limit,
            reset_ns: d.window_start_ns + q.window.as_nanos() as i64,
        }
    }

    fn rolled(&self, q: &QuotaSpec, d: Decoded, now_ns: i64, first_seen: bool) -> Decoded {
        if first_seen || now_ns - d.window_start_ns >= q.window.as_nanos() as i64 {
            Decoded {
                count: 0,
                window_start_ns: now_ns,
            }
        } else {
            d
        }
    }
}

#[async_trait]
impl Strategy for FixedWindowStrategy {
    fn engine_tag(&self) -> EngineTag {
        EngineTag::FixedWindow
    }

    fn default_max_retries(&self) -> u32 {
        self.quotas.iter().map(|q| q.limit).max().unwrap_or(1) as u32 + 1
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
            ttl: Some(ttl_for(&self.quotas)),
            deadline,
            ..CasLoopConfig::default()
        };
        let outcome = cas_loop(
            backend,
            key,
            "fw",
            Mode::TryUpdate,
            config,
            || clock.now_ns(),
            |prev, now_ns| {
                let decoded = self.decode(key, prev)?;
                let first_seen = prev.is_none();
                let rolled: Vec<Decoded> = self
                    .quotas
                    .iter()
                    .zip(&decoded)
                    .map(|(q, d)| self.rolled(q, *d, now_ns, first_seen))
                    .collect();
                let denied = rolled
                    .iter()
                    .zip(&self.quotas)
                    .any(|(d, q)| (d.count as u64) >= q.limit);

                if denied {
                    let results = self
                        .quotas
                        .iter()
                        .zip(&decoded)
                        .map(|(q, d)| (q.name.clone(), Self::quota_result(q, *d)))
                        .collect();
                    return Ok(MutatorOutcome {
                        new_state: None,
                        allowed: false,
                        result: QuotaOutcome {
                            allowed: false,
                            quotas: results,
                        },
                    });
                }

                let consumed: Vec<Decoded> = rolled
                    .into_iter()
                    .map(|d| Decoded {
                        count: d.count + 1,
                        window_start_ns: d.window_start_ns,
                    })
                    .collect();
                let results = self
                    .quotas
                    .iter()
                    .zip(&consumed)
                    .map(|(q, d)| (q.name.clone(), Self::quota_result(q, *d)))
                    .collect();
                Ok(MutatorOutcome {
                    new_state: Some(self.encode(&consumed)),
                    allowed: true,
                    result: QuotaOutcome {
                        allowed: true,
                        quotas: results,
                    },
                })
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
            "fw",
            Mode::ReadOnly,
            config,
            || clock.now_ns(),
            |prev, now_ns| {
                let decoded = self.decode(key, prev)?;
                let first_seen = prev.is_none();
                let virtual_state: Vec<Decoded> = self
                    .quotas
                    .iter()
                    .zip(&decoded)
                    .map(|(q, d)| self.rolled(q, *d, now_ns, first_seen))
                    .collect();
                let results: std::collections::BTreeMap<_, _> = self
                    .quotas
                    .iter()
                    .zip(&virtual_state)
                    .map(|(q, d)| (q.name.clone(), Self::quota_result(q, *d)))
                    .collect();
                let allowed = results.values().all(|r| r.allowed);
                Ok(MutatorOutcome {
                    new_state: None,
                    allowed,
                    result: QuotaOutcome {
                        allowed,
                        quotas: results,
                    },
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
            ttl: Some(ttl_for(&self.quotas)),
            deadline,
            ..CasLoopConfig::default()
        };
        cas_loop(
            backend,
            key,
            "fw",
            Mode::TryUpdate,
            config,
            || clock.now_ns(),
            |prev, now_ns| {
                let decoded = self.decode(key, prev)?;
                let mut changed = false;
                let refunded: Vec<Decoded> = self
                    .quotas
                    .iter()
                    .zip(&decoded)
                    .map(|(q, d)| {
                        let in_window = now_ns - d.window_start_ns < q.window.as_nanos() as i64;
                        if in_window && d.count > 0 {
                            changed = true;
                            Decoded {
                                count: d.count - 1,
                                window_start_ns: d.window_start_ns,
                            }
                        } else {
                            *d
                        }
                    })
                    .collect();
                Ok(MutatorOutcome {
                    new_state: changed.then(|| self.encode(&refunded)),
                    allowed: true,
                    result: (),
                })
            },
        )
        .await?;
        Ok(())
    }
}

fn ttl_for(quotas: &[QuotaSpec]) -> Duration {
    quotas
        .iter()
        .map(|q| q.window * 2)
        .max()
        .unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratelimit_core::{KeyBuilder, TestClock};
    use ratelimit_memory::MemoryBackend;

    fn key() -> Key {
        KeyBuilder::new("api")
            .engine(EngineTag::FixedWindow)
            .dynamic(Some("user-1"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn single_quota_allows_up_to_limit_then_denies() {
        let strategy =
            FixedWindowStrategy::new(vec![QuotaSpec::new("requests", 2, Duration::from_secs(5))])
                .unwrap();
        let backend = MemoryBackend::new();
        let clock = TestClock::new(0);

        let first = strategy.allow(&backend, &key(), &clock, 5, None).await.unwrap();
        assert!(first.allowed);
        let second = strategy.allow(&backend, &key(), &clock, 5, None).await.unwrap();
        assert!(second.allowed);
        let third = strategy.allow(&backend, &key(), &clock, 5, None).await.unwrap();
        assert!(!third.allowed);
    }

    #[tokio::test]
    async fn window_rolls_over_after_elapsed_duration() {
        let strategy =
            FixedWindowStrategy::new(vec![QuotaSpec::new("requests", 1, Duration::from_secs(5))])
                .unwrap();
        let backend = MemoryBackend::new();
        let clock = TestClock::new(0);

        assert!(strategy.allow(&backend, &key(), &clock, 5, None).await.unwrap().allowed);
        assert!(!strategy.allow(&backend, &key(), &clock, 5, None).await.unwrap().allowed);

        clock.advance(Duration::from_secs(6));
        assert!(strategy.allow(&backend, &key(), &clock, 5, None).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn denied_quota_does_not_decrement_other_quotas() {
        let strategy = FixedWindowStrategy::new(vec![
            QuotaSpec::new("requests", 10, Duration::from_secs(60)),
            QuotaSpec::new("connections", 1, Duration::from_secs(60)),
        ])
        .unwrap();
        let backend = MemoryBackend::new();
        let clock = TestClock::new(0);

        let first = strategy.allow(&backend, &key(), &clock, 5, None).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.quotas["requests"].remaining, 9);
        assert_eq!(first.quotas["connections"].remaining, 0);

        let second = strategy.allow(&backend, &key(), &clock, 5, None).await.unwrap();
        assert!(!second.allowed);
        assert_eq!(second.quotas["requests"].used, 1);
    }

    #[tokio::test]
    async fn peek_never_mutates_stored_state() {
        let strategy =
            FixedWindowStrategy::new(vec![QuotaSpec::new("requests", 5, Duration::from_secs(5))])
                .unwrap();
        let backend = MemoryBackend::new();
        let clock = TestClock::new(0);

        strategy.allow(&backend, &key(), &clock, 5, None).await.unwrap();
        let before = {
            use ratelimit_backend::Backend;
            backend.get(&key()).await.unwrap()
        };
        strategy.peek(&backend, &key(), &clock, 5, None).await.unwrap();
        let after = {
            use ratelimit_backend::Backend;
            backend.get(&key()).await.unwrap()
        };
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn refund_decrements_within_same_window() {
        let strategy =
            FixedWindowStrategy::new(vec![QuotaSpec::new("requests", 5, Duration::from_secs(5))])
                .unwrap();
        let backend = MemoryBackend::new();
        let clock = TestClock::new(0);

        strategy.allow(&backend, &key(), &clock, 5, None).await.unwrap();
        strategy.refund(&backend, &key(), &clock, 5, None).await.unwrap();
        let after = strategy.peek(&backend, &key(), &clock, 5, None).await.unwrap();
        assert_eq!(after.quotas["requests"].used, 0);
    }

    #[tokio::test]
    async fn reset_deletes_key() {
        let strategy =
            FixedWindowStrategy::new(vec![QuotaSpec::new("requests", 5, Duration::from_secs(5))])
                .unwrap();
        let backend = MemoryBackend::new();
        let clock = TestClock::new(0);

        strategy.allow(&backend, &key(), &clock, 5, None).await.unwrap();
        strategy.reset(&backend, &key(), None).await.unwrap();
        strategy.reset(&backend, &key(), None).await.unwrap();

        use ratelimit_backend::Backend;
        assert_eq!(backend.get(&key()).await.unwrap(), None);
    }

    #[test]
    fn rejects_zero_limit() {
        assert!(FixedWindowStrategy::new(vec![QuotaSpec::new("r", 0, Duration::from_secs(1))]).is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        assert!(
            FixedWindowStrategy::new(vec![
                QuotaSpec::new("r", 1, Duration::from_secs(1)),
                QuotaSpec::new("r", 2, Duration::from_secs(1)),
            ])
            .is_err()
        );
    }
}
