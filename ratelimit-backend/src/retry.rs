//! The read-modify-CAS retry loop every rate-limiting engine routes its
//! admission decisions through.
//!
//! Engines never talk to a [`Backend`] directly outside this module. They
//! hand [`cas_loop`] a *mutator* closure that, given the previous state (or
//! `None` if the key is absent/expired) and the current timestamp, decides
//! the new state, whether the request is allowed, and any per-call result
//! the caller wants back. `cas_loop` owns the get / decode / check_and_set /
//! retry mechanics; the mutator owns the algorithm.

use std::time::{Duration, Instant};

use rand::Rng;
use ratelimit_core::Key;
use tracing::{debug, trace, warn};

use crate::backend::{Backend, CasWitness};
use crate::error::BackendError;
use crate::metrics;

/// Whether a [`cas_loop`] call is allowed to write back a mutated state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Never write, regardless of what the mutator decides. Used by `peek`.
    ReadOnly,
    /// Attempt to commit the mutator's new state via compare-and-swap.
    TryUpdate,
}

/// What a mutator decided for one CAS attempt.
pub struct MutatorOutcome<R> {
    /// The new state to persist, or `None` if this attempt requires no
    /// write (e.g. the request is denied and nothing changes, or the call
    /// is read-only).
    pub new_state: Option<String>,
    /// Whether the request should be admitted.
    pub allowed: bool,
    /// The caller-facing result returned once this attempt's decision is
    /// durable.
    pub result: R,
}

/// Tuning knobs for [`cas_loop`]'s retry, deadline and backoff behavior.
#[derive(Debug, Clone, Copy)]
pub struct CasLoopConfig {
    /// Maximum number of CAS attempts before giving up with
    /// [`BackendError::Contention`].
    pub max_retries: u32,
    /// TTL applied to every write this loop performs.
    pub ttl: Option<Duration>,
    /// Upper bound on a single backoff sleep.
    pub max_backoff: Duration,
    /// Wall-clock deadline after which the loop gives up with
    /// [`BackendError::Canceled`] instead of attempting another round.
    pub deadline: Option<Instant>,
}

impl Default for CasLoopConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            ttl: None,
            max_backoff: Duration::from_millis(500),
            deadline: None,
        }
    }
}

/// Run the read-modify-CAS protocol for `key` against `backend`.
///
/// On each attempt: check the deadline, read the current value (`None` both
/// for a truly absent key and an expired one), hand it to `mutator` along
/// with `now_ns`, then either return immediately (`Mode::ReadOnly`, or the
/// mutator requested no write) or check the deadline again and attempt a
/// `check_and_set`. A lost race retries after a cancellation-aware backoff
/// wait that also wakes on the deadline; a corrupt stored blob or exhausted
/// retry budget is a hard error.
///
/// `now_ns` is read once per attempt by the caller (the engine), not by this
/// loop, since engines source time from their own [`ratelimit_core::Clock`].
pub async fn cas_loop<B, F, R>(
    backend: &B,
    key: &Key,
    engine: &str,
    mode: Mode,
    config: CasLoopConfig,
    mut now_ns: impl FnMut() -> i64,
    mut mutator: F,
) -> Result<R, BackendError>
where
    B: Backend + ?Sized,
    F: FnMut(Option<&str>, i64) -> Result<MutatorOutcome<R>, BackendError>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;

        if let Some(deadline) = config.deadline {
            if Instant::now() >= deadline {
                return Err(BackendError::Canceled {
                    key: key.to_string(),
                });
            }
        }

        metrics::record_cas_attempt(engine);

        let read_timer = metrics::Timer::new();
        let prev = backend.get(key).await?;
        metrics::record_read(engine, read_timer.elapsed());

        let now = now_ns();
        let mut outcome = mutator(prev.as_deref(), now)?;

        let Some(new_state) = outcome.new_state.take() else {
            metrics::record_attempts_per_call(engine, attempt);
            return Ok(outcome.result);
        };

        if mode == Mode::ReadOnly {
            metrics::record_attempts_per_call(engine, attempt);
            return Ok(outcome.result);
        }

        if let Some(deadline) = config.deadline {
            if Instant::now() >= deadline {
                return Err(BackendError::Canceled {
                    key: key.to_string(),
                });
            }
        }

        let witness = match &prev {
            Some(value) => CasWitness::Value(value.clone()),
            None => CasWitness::Absent,
        };

        let write_timer = metrics::Timer::new();
        let committed = backend
            .check_and_set(key, witness, new_state, config.ttl)
            .await?;
        let write_latency = write_timer.elapsed();
        metrics::record_write(engine, write_latency);

        if committed {
            trace!(key = %key, attempt, "cas committed");
            metrics::record_attempts_per_call(engine, attempt);
            return Ok(outcome.result);
        }

        metrics::record_cas_mismatch(engine);
        if attempt >= config.max_retries {
            warn!(key = %key, attempt, "cas contention exhausted");
            metrics::record_contention(engine);
            return Err(BackendError::Contention {
                key: key.to_string(),
                attempts: attempt,
            });
        }

        debug!(key = %key, attempt, "cas mismatch, retrying");
        wait_for_retry(backoff_delay(attempt, write_latency, config.max_backoff), config.deadline).await;
    }
}

/// Wait out a backoff delay, but wake early if `deadline` elapses first so a
/// cancelled call doesn't sleep past its budget before the next loop
/// iteration's deadline check can return [`BackendError::Canceled`].
async fn wait_for_retry(delay: Duration, deadline: Option<Instant>) {
    match deadline {
        None => tokio::time::sleep(delay).await,
        Some(deadline) => {
            let deadline = tokio::time::Instant::from_std(deadline);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }
}

/// Exponential backoff with full jitter, capped at `max_backoff`.
///
/// The measured CAS round-trip (`last_write_latency`) is subtracted from the
/// jittered delay so a fast backend does not impose an artificially long
/// wait on top of its own latency.
fn backoff_delay(attempt: u32, last_write_latency: Duration, max_backoff: Duration) -> Duration {
    let base_ms = 2u64.saturating_pow(attempt.min(16)).min(250);
    let capped_ms = base_ms.min(max_backoff.as_millis() as u64);
    let jittered_ms = if capped_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=capped_ms)
    };
    Duration::from_millis(jittered_ms).saturating_sub(last_write_latency)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_exceeds_cap() {
        let cap = Duration::from_millis(500);
        for attempt in 1..20 {
            let d = backoff_delay(attempt, Duration::ZERO, cap);
            assert!(d <= cap);
        }
    }

    #[test]
    fn backoff_absorbs_measured_latency() {
        let cap = Duration::from_millis(500);
        let d = backoff_delay(10, Duration::from_secs(10), cap);
        assert_eq!(d, Duration::ZERO);
    }
}
