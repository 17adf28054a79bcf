//! Error types for backend and CAS-loop operations.

use ratelimit_core::CoreError;
use thiserror::Error;

/// Error type for backend and CAS-loop operations.
///
/// Mirrors the taxonomy in §7 of the design document: configuration and
/// input errors are reported before any I/O (see [`CoreError`]); everything
/// below is raised during or after a backend round-trip.
#[derive(Debug, Error)]
pub enum BackendError {
    /// A key failed validation, or a strategy was misconfigured.
    #[error(transparent)]
    Config(#[from] CoreError),

    /// The backend driver reported a transport failure (e.g. a dropped
    /// connection). Wrapped with the operation that was attempted.
    #[error("backend transport error during {op}: {source}")]
    Transport {
        /// Operation tag, e.g. `"engine=fw op=get"`.
        op: &'static str,
        /// The underlying driver error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The decoded state blob violated the `v2|` wire-format invariants.
    ///
    /// Fatal for the call: the engine never attempts to repair a corrupt
    /// blob, and the call returns without overwriting the stored value.
    #[error("state blob for key {key:?} is corrupt: {reason}")]
    StateCorrupt {
        /// The key whose value failed to decode.
        key: String,
        /// Human-readable reason decoding failed.
        reason: String,
    },

    /// The CAS retry loop exhausted its configured `max_retries` without a
    /// successful compare-and-swap.
    #[error("CAS contention exhausted after {attempts} attempts for key {key:?}")]
    Contention {
        /// The key that could not be committed.
        key: String,
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// The call's deadline elapsed before a decision was reached.
    #[error("rate limit call for key {key:?} was canceled")]
    Canceled {
        /// The key the call was operating on.
        key: String,
    },
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
