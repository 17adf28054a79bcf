//! Dual-strategy orchestration: a hard-quota primary consulted on every
//! call, with an optional secondary smoothing strategy layered on top.

use std::time::Instant;

use ratelimit_backend::SyncBackend;
use ratelimit_core::{Capability, Clock, KeyBuilder};
use tracing::warn;

use crate::error::{RateLimitError, RateLimitResult};
use crate::metrics;
use crate::result::{merge_prefixed, AllowResult};
use crate::strategy::Strategy;

/// Runs a primary strategy, and optionally a secondary smoothing strategy,
/// against the same key.
///
/// The primary is always consulted first. If it denies, the secondary is
/// never invoked. If the primary allows but the secondary then denies, the
/// primary's admission is rolled back with a best-effort [`Strategy::refund`]
/// call before reporting the denial to the caller (§4.9).
pub struct DualLimiter {
    primary: Box<dyn Strategy>,
    secondary: Option<Box<dyn Strategy>>,
}

impl DualLimiter {
    /// Pair a primary strategy with an optional secondary.
    ///
    /// Fails with [`RateLimitError::UnsupportedSecondary`] if `secondary` is
    /// `Some` and its engine does not advertise [`Capability::Secondary`]
    /// (GCRA never does).
    pub fn new(primary: Box<dyn Strategy>, secondary: Option<Box<dyn Strategy>>) -> RateLimitResult<Self> {
        if let Some(secondary) = &secondary {
            let tag = secondary.engine_tag();
            if !tag.supports(Capability::Secondary) {
                return Err(RateLimitError::UnsupportedSecondary { tag });
            }
        }
        Ok(Self { primary, secondary })
    }

    pub(crate) async fn allow(
        &self,
        backend: &SyncBackend,
        base_key: &str,
        dynamic_key: Option<&str>,
        clock: &dyn Clock,
        max_retries: u32,
        deadline: Option<Instant>,
    ) -> RateLimitResult<AllowResult> {
        let primary_key = KeyBuilder::new(base_key)
            .engine(self.primary.engine_tag())
            .dynamic(dynamic_key)
            .build()?;
        let primary_outcome = self.primary.allow(backend, &primary_key, clock, max_retries, deadline).await?;

        let Some(secondary) = &self.secondary else {
            return Ok(AllowResult {
                allowed: primary_outcome.allowed,
                quotas: primary_outcome.quotas,
            });
        };

        let mut quotas = std::collections::BTreeMap::new();
        merge_prefixed("primary", &primary_outcome, &mut quotas);

        if !primary_outcome.allowed {
            return Ok(AllowResult {
                allowed: false,
                quotas,
            });
        }

        let secondary_key = KeyBuilder::new(base_key)
            .engine(secondary.engine_tag())
            .dynamic(dynamic_key)
            .build()?;
        let secondary_outcome = secondary.allow(backend, &secondary_key, clock, max_retries, deadline).await?;
        merge_prefixed("secondary", &secondary_outcome, &mut quotas);

        if !secondary_outcome.allowed {
            if let Err(error) = self.primary.refund(backend, &primary_key, clock, max_retries, deadline).await {
                warn!(%error, "primary refund failed after secondary denial");
                metrics::record_refund_failure(self.primary.engine_tag().as_str());
            }
        }

        Ok(AllowResult {
            allowed: secondary_outcome.allowed,
            quotas,
        })
    }

    pub(crate) async fn peek(
        &self,
        backend: &SyncBackend,
        base_key: &str,
        dynamic_key: Option<&str>,
        clock: &dyn Clock,
        max_retries: u32,
        deadline: Option<Instant>,
    ) -> RateLimitResult<AllowResult> {
        let primary_key = KeyBuilder::new(base_key)
            .engine(self.primary.engine_tag())
            .dynamic(dynamic_key)
            .build()?;
        let primary_outcome = self.primary.peek(backend, &primary_key, clock, max_retries, deadline).await?;

        let Some(secondary) = &self.secondary else {
            return Ok(AllowResult {
                allowed: primary_outcome.allowed,
                quotas: primary_outcome.quotas,
            });
        };

        let mut quotas = std::collections::BTreeMap::new();
        merge_prefixed("primary", &primary_outcome, &mut quotas);

        if !primary_outcome.allowed {
            return Ok(AllowResult {
                allowed: false,
                quotas,
            });
        }

        let secondary_key = KeyBuilder::new(base_key)
            .engine(secondary.engine_tag())
            .dynamic(dynamic_key)
            .build()?;
        let secondary_outcome = secondary.peek(backend, &secondary_key, clock, max_retries, deadline).await?;
        merge_prefixed("secondary", &secondary_outcome, &mut quotas);

        Ok(AllowResult {
            allowed: secondary_outcome.allowed,
            quotas,
        })
    }

    pub(crate) async fn reset(
        &self,
        backend: &SyncBackend,
        base_key: &str,
        dynamic_key: Option<&str>,
        deadline: Option<Instant>,
    ) -> RateLimitResult<()> {
        let primary_key = KeyBuilder::new(base_key)
            .engine(self.primary.engine_tag())
            .dynamic(dynamic_key)
            .build()?;
        self.primary.reset(backend, &primary_key, deadline).await?;
        if let Some(secondary) = &self.secondary {
            let secondary_key = KeyBuilder::new(base_key)
                .engine(secondary.engine_tag())
                .dynamic(dynamic_key)
                .build()?;
            secondary.reset(backend, &secondary_key, deadline).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::{FixedWindowStrategy, GcraStrategy, QuotaSpec, TokenBucketStrategy};
    use ratelimit_core::TestClock;
    use ratelimit_memory::MemoryBackend;
    use std::time::Duration;

    const BASE_KEY: &str = "api";
    const DYNAMIC_KEY: Option<&str> = Some("user-1");

    #[test]
    fn rejects_gcra_as_secondary() {
        let primary = Box::new(TokenBucketStrategy::new(10, 1.0).unwrap());
        let secondary = Box::new(GcraStrategy::new(5, 1.0).unwrap());
        assert!(DualLimiter::new(primary, Some(secondary)).is_err());
    }

    #[tokio::test]
    async fn secondary_denial_refunds_primary() {
        let primary = Box::new(
            FixedWindowStrategy::new(vec![QuotaSpec::new("hard", 100, Duration::from_secs(60))]).unwrap(),
        );
        let secondary = Box::new(TokenBucketStrategy::new(1, 0.001).unwrap());
        let limiter = DualLimiter::new(primary, Some(secondary)).unwrap();

        let backend = MemoryBackend::new();
        let clock = TestClock::new(0);

        let first = limiter.allow(&backend, BASE_KEY, DYNAMIC_KEY, &clock, 10, None).await.unwrap();
        assert!(first.allowed);

        let second = limiter.allow(&backend, BASE_KEY, DYNAMIC_KEY, &clock, 10, None).await.unwrap();
        assert!(!second.allowed);

        let primary_key = ratelimit_core::KeyBuilder::new(BASE_KEY)
            .engine(ratelimit_core::EngineTag::FixedWindow)
            .dynamic(DYNAMIC_KEY)
            .build()
            .unwrap();
        let primary_only = FixedWindowStrategy::new(vec![QuotaSpec::new("hard", 100, Duration::from_secs(60))])
            .unwrap();
        let peeked = primary_only.peek(&backend, &primary_key, &clock, 10, None).await.unwrap();
        let used = peeked.quotas.get("hard").unwrap().used;
        assert_eq!(used, 1, "primary refund should have rolled back the second admission");
    }
}
