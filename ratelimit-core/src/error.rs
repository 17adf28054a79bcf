//! Shared error kinds reused by the backend and façade crates.

use thiserror::Error;

/// Error kinds that do not depend on a particular backend implementation.
///
/// This is the bottom of the error taxonomy described in §7 of the design
/// document: configuration and input validation failures that are reported
/// before any backend I/O takes place.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A key (base key or dynamic per-call key) failed validation.
    ///
    /// Keys must be ASCII, non-empty, at most [`crate::key::MAX_KEY_LEN`]
    /// bytes, and built only from `[A-Za-z0-9_:-]`.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey {
        /// The offending key.
        key: String,
        /// Human-readable reason the key was rejected.
        reason: &'static str,
    },

    /// A strategy configuration was rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
