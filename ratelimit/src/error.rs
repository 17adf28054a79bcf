//! Top-level error type returned by every [`crate::Limiter`] operation.

use ratelimit_backend::BackendError;
use ratelimit_core::{CoreError, EngineTag};
use thiserror::Error;

/// Errors produced while building or operating a [`crate::Limiter`].
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Key or quota configuration failed validation.
    #[error(transparent)]
    Config(#[from] CoreError),

    /// The backend or CAS retry loop failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A secondary strategy was configured with an engine that does not
    /// advertise [`ratelimit_core::Capability::Secondary`].
    #[error("engine {tag} cannot be used as a secondary strategy")]
    UnsupportedSecondary {
        /// The engine that was rejected.
        tag: EngineTag,
    },
}

/// Result type returned by [`crate::Limiter`] operations.
pub type RateLimitResult<T> = Result<T, RateLimitError>;
