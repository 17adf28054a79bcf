#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Typestate builder for [`Limiter`].
pub mod builder;

/// Dual-strategy (primary + optional secondary) orchestration.
pub mod dual;

/// Rate-limiting engines, one module per algorithm.
pub mod engines;

/// Top-level error type returned by every [`Limiter`] operation.
pub mod error;

/// The rate limiter façade clients construct and call.
pub mod limiter;

/// Observability metrics for admission decisions.
pub mod metrics;

/// Per-quota and merged admission results.
pub mod result;

/// The uniform contract every engine implements.
pub mod strategy;

pub use builder::{LimiterBuilder, NotSet};
pub use dual::DualLimiter;
pub use engines::{FixedWindowStrategy, GcraStrategy, LeakyBucketStrategy, QuotaSpec, TokenBucketStrategy};
pub use error::{RateLimitError, RateLimitResult};
pub use limiter::Limiter;
pub use result::{AllowResult, QuotaOutcome, QuotaResult, DEFAULT_QUOTA};
pub use strategy::Strategy;

pub use ratelimit_backend::{Backend, BackendError, BackendResult, CasWitness, DeleteStatus, SyncBackend, UnsyncBackend};
pub use ratelimit_core::{Capability, Clock, CoreError, EngineTag, Key, KeyBuilder, SystemClock, TestClock};
