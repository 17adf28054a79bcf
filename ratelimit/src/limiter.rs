//! The public rate-limiter façade.

use std::sync::Arc;
use std::time::Instant;

use ratelimit_backend::{BackendError, SyncBackend};
use ratelimit_core::Clock;
use tracing::{debug, instrument};

use crate::builder::{LimiterBuilder, NotSet};
use crate::dual::DualLimiter;
use crate::error::{RateLimitError, RateLimitResult};
use crate::metrics;
use crate::result::AllowResult;

struct Inner {
    backend: Arc<SyncBackend>,
    base_key: String,
    dual: DualLimiter,
    clock: Arc<dyn Clock + Send + Sync>,
    max_retries: u32,
}

/// A configured rate limiter for one logical resource.
///
/// Cheap to clone (internally `Arc`-wrapped) and safe for concurrent use
/// from many tasks sharing one backend.
#[derive(Clone)]
pub struct Limiter {
    inner: Arc<Inner>,
}

impl Limiter {
    /// Start building a [`Limiter`].
    pub fn builder() -> LimiterBuilder<NotSet, NotSet, NotSet> {
        LimiterBuilder::new()
    }

    pub(crate) fn new(
        backend: Arc<SyncBackend>,
        base_key: String,
        dual: DualLimiter,
        clock: Arc<dyn Clock + Send + Sync>,
        max_retries: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                base_key,
                dual,
                clock,
                max_retries,
            }),
        }
    }

    /// Evaluate and, if allowed, atomically consume one unit from every
    /// configured quota. `dynamic_key` is the optional per-call suffix
    /// (e.g. a user or tenant id) appended to the base key.
    ///
    /// `deadline`, if set, bounds how long this call may spend retrying
    /// under contention; once it elapses the call fails with
    /// [`RateLimitError::Backend`]`(`[`BackendError::Canceled`]`)` instead of
    /// issuing a further write.
    #[instrument(skip(self), fields(base_key = %self.inner.base_key))]
    pub async fn allow(&self, dynamic_key: Option<&str>, deadline: Option<Instant>) -> RateLimitResult<AllowResult> {
        let result = self
            .inner
            .dual
            .allow(
                &*self.inner.backend,
                &self.inner.base_key,
                dynamic_key,
                self.inner.clock.as_ref(),
                self.inner.max_retries,
                deadline,
            )
            .await;
        self.record(&result);
        result
    }

    /// Evaluate without consuming or writing anything.
    #[instrument(skip(self), fields(base_key = %self.inner.base_key))]
    pub async fn peek(&self, dynamic_key: Option<&str>, deadline: Option<Instant>) -> RateLimitResult<AllowResult> {
        let result = self
            .inner
            .dual
            .peek(
                &*self.inner.backend,
                &self.inner.base_key,
                dynamic_key,
                self.inner.clock.as_ref(),
                self.inner.max_retries,
                deadline,
            )
            .await;
        self.record(&result);
        result
    }

    /// Delete every quota's stored state for `dynamic_key`. Idempotent.
    #[instrument(skip(self), fields(base_key = %self.inner.base_key))]
    pub async fn reset(&self, dynamic_key: Option<&str>, deadline: Option<Instant>) -> RateLimitResult<()> {
        self.inner
            .dual
            .reset(&*self.inner.backend, &self.inner.base_key, dynamic_key, deadline)
            .await
    }

    /// No-op: the backend is externally owned and outlives this handle.
    pub async fn close(&self) -> RateLimitResult<()> {
        Ok(())
    }

    fn record(&self, result: &RateLimitResult<AllowResult>) {
        match result {
            Ok(outcome) => {
                for (quota, quota_result) in &outcome.quotas {
                    metrics::record_decision(&self.inner.base_key, quota, quota_result.allowed);
                }
            }
            Err(RateLimitError::Backend(BackendError::Contention { .. })) => {
                metrics::record_contention_exhausted(&self.inner.base_key);
            }
            Err(_) => {}
        }
        debug!("recorded admission decision");
    }
}
