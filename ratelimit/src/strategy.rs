//! The uniform `allow` / `peek` / `reset` contract every engine implements.

use std::time::Instant;

use async_trait::async_trait;
use ratelimit_backend::SyncBackend;
use ratelimit_core::{Clock, EngineTag, Key};

use crate::error::RateLimitResult;
use crate::result::QuotaOutcome;

/// One rate-limiting algorithm, addressable over a [`ratelimit_backend::Backend`].
///
/// Implementations never talk to the backend directly; they route every
/// state transition through [`ratelimit_backend::cas_loop`].
#[async_trait]
pub trait Strategy: Send + Sync {
    /// The engine this strategy implements.
    fn engine_tag(&self) -> EngineTag;

    /// `max_retries` to use when the caller has not overridden it —
    /// algorithm-specific, at minimum `burst + 1` (§4.3).
    fn default_max_retries(&self) -> u32;

    /// Evaluate and, if allowed, atomically consume one unit from every
    /// quota this strategy manages. `deadline`, if set, aborts the call with
    /// [`ratelimit_backend::BackendError::Canceled`] once elapsed, checked
    /// before every backend round-trip.
    async fn allow(
        &self,
        backend: &SyncBackend,
        key: &Key,
        clock: &dyn Clock,
        max_retries: u32,
        deadline: Option<Instant>,
    ) -> RateLimitResult<QuotaOutcome>;

    /// Evaluate without consuming or writing anything.
    async fn peek(
        &self,
        backend: &SyncBackend,
        key: &Key,
        clock: &dyn Clock,
        max_retries: u32,
        deadline: Option<Instant>,
    ) -> RateLimitResult<QuotaOutcome>;

    /// Delete this strategy's stored state. Idempotent.
    async fn reset(&self, backend: &SyncBackend, key: &Key, deadline: Option<Instant>) -> RateLimitResult<()>;

    /// Best-effort compensating write undoing the effect of the most recent
    /// [`Strategy::allow`] call on this key. Used by the dual-strategy
    /// orchestrator when a secondary denies a request the primary already
    /// admitted.
    async fn refund(
        &self,
        backend: &SyncBackend,
        key: &Key,
        clock: &dyn Clock,
        max_retries: u32,
        deadline: Option<Instant>,
    ) -> RateLimitResult<()>;
}
