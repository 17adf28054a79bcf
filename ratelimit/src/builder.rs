//! Typestate builder for [`crate::Limiter`].
//!
//! Mirrors the constructor-option pattern used elsewhere in this family:
//! each required field starts as [`NotSet`] and `build()` is only available
//! once every required field has been replaced by its real type.

use std::sync::Arc;

use ratelimit_backend::SyncBackend;
use ratelimit_core::{Clock, SystemClock};

use crate::dual::DualLimiter;
use crate::error::RateLimitResult;
use crate::limiter::Limiter;
use crate::strategy::Strategy;

/// Marker type for a builder field that has not been set yet.
///
/// Seeing `NotSet` in a compiler error means the corresponding `with_*`
/// method has not been called.
pub struct NotSet;

/// Builder for [`Limiter`]. Start with [`LimiterBuilder::new`].
pub struct LimiterBuilder<B = NotSet, K = NotSet, P = NotSet> {
    backend: B,
    base_key: K,
    primary: P,
    secondary: Option<Box<dyn Strategy>>,
    clock: Arc<dyn Clock + Send + Sync>,
    max_retries: Option<u32>,
}

impl LimiterBuilder<NotSet, NotSet, NotSet> {
    /// Start a new, empty builder.
    pub fn new() -> Self {
        Self {
            backend: NotSet,
            base_key: NotSet,
            primary: NotSet,
            secondary: None,
            clock: Arc::new(SystemClock),
            max_retries: None,
        }
    }
}

impl Default for LimiterBuilder<NotSet, NotSet, NotSet> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B, K, P> LimiterBuilder<B, K, P> {
    /// Attach the storage backend. Required.
    pub fn with_backend(self, backend: Arc<SyncBackend>) -> LimiterBuilder<Arc<SyncBackend>, K, P> {
        LimiterBuilder {
            backend,
            base_key: self.base_key,
            primary: self.primary,
            secondary: self.secondary,
            clock: self.clock,
            max_retries: self.max_retries,
        }
    }

    /// Set the static key prefix every call under this limiter shares.
    /// Required; validated at [`LimiterBuilder::build`] time.
    pub fn with_base_key(self, base_key: impl Into<String>) -> LimiterBuilder<B, String, P> {
        LimiterBuilder {
            backend: self.backend,
            base_key: base_key.into(),
            primary: self.primary,
            secondary: self.secondary,
            clock: self.clock,
            max_retries: self.max_retries,
        }
    }

    /// Set the hard-quota strategy every call consults. Required.
    pub fn with_primary_strategy(self, primary: Box<dyn Strategy>) -> LimiterBuilder<B, K, Box<dyn Strategy>> {
        LimiterBuilder {
            backend: self.backend,
            base_key: self.base_key,
            primary,
            secondary: self.secondary,
            clock: self.clock,
            max_retries: self.max_retries,
        }
    }

    /// Attach an optional smoothing strategy, consulted only after the
    /// primary allows. Rejected at [`LimiterBuilder::build`] time unless the
    /// engine advertises [`ratelimit_core::Capability::Secondary`].
    pub fn with_secondary_strategy(mut self, secondary: Box<dyn Strategy>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// Override the retry cap used for every engine call. Defaults to each
    /// strategy's own [`Strategy::default_max_retries`].
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Inject a clock, overriding the default [`SystemClock`]. Mainly useful
    /// for tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }
}

impl LimiterBuilder<Arc<SyncBackend>, String, Box<dyn Strategy>> {
    /// Validate every field and construct the [`Limiter`].
    ///
    /// Performs all construction-time validation (base key shape, secondary
    /// capability) before any backend I/O occurs.
    pub fn build(self) -> RateLimitResult<Limiter> {
        ratelimit_core::key::validate_segment(&self.base_key)?;

        let max_retries = self.max_retries.unwrap_or_else(|| {
            let primary_default = self.primary.default_max_retries();
            match &self.secondary {
                Some(secondary) => primary_default.max(secondary.default_max_retries()),
                None => primary_default,
            }
        });

        let dual = DualLimiter::new(self.primary, self.secondary)?;

        Ok(Limiter::new(self.backend, self.base_key, dual, self.clock, max_retries))
    }
}
