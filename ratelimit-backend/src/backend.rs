//! The four-method backend contract every storage driver implements.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ratelimit_core::Key;

use crate::error::BackendResult;

/// Status of a delete operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Record existed and was removed.
    Deleted,
    /// Record was not found in the backend.
    Missing,
}

/// The witness a [`Backend::check_and_set`] caller compares the stored value
/// against.
///
/// `Absent` is the sentinel described in §4.1 of the design document: it
/// matches both a truly-absent key and a key whose TTL has lapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasWitness {
    /// The caller believes the key does not currently exist (or has
    /// expired).
    Absent,
    /// The caller observed this exact value on its last read.
    Value(String),
}

/// Type alias for a dynamically dispatched [`Backend`] that is `Send` but
/// not `Sync`.
pub type UnsyncBackend = dyn Backend + Send;

/// Type alias for a dynamically dispatched [`Backend`] that is `Send + Sync`.
pub type SyncBackend = dyn Backend + Send + Sync;

/// The storage contract every rate-limiting engine depends on.
///
/// Four operations, all atomic with respect to a single key: `get`, `set`,
/// `check_and_set` (compare-and-swap), and `delete`. No cross-key atomicity
/// is assumed or required. Implementations are expected to be cheap to
/// clone (e.g. an `Arc`-wrapped connection pool).
///
/// # Dyn-compatibility
///
/// This trait is dyn-compatible; blanket implementations are provided for
/// `Box<dyn Backend>`, `Arc<dyn Backend + Send>` ([`UnsyncBackend`]) and
/// `Arc<dyn Backend + Send + Sync>` ([`SyncBackend`]) so a limiter can hold
/// a type-erased backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read the current value stored under `key`.
    ///
    /// Returns `Ok(None)` both when the key was never written and when it
    /// has expired — expired keys MUST report as not found.
    async fn get(&self, key: &Key) -> BackendResult<Option<String>>;

    /// Unconditionally write `value` under `key` with the given TTL.
    ///
    /// `ttl == None` means the key never expires.
    async fn set(&self, key: &Key, value: String, ttl: Option<Duration>) -> BackendResult<()>;

    /// Atomically replace the value under `key` with `new_value`, but only
    /// if the currently stored value matches `witness`.
    ///
    /// When `witness` is [`CasWitness::Absent`], the write succeeds iff the
    /// key is currently absent or expired. Otherwise it succeeds iff the
    /// stored value equals the witnessed value byte-for-byte.
    ///
    /// Returning `Ok(false)` (compare mismatch) is a normal outcome, not an
    /// error.
    async fn check_and_set(
        &self,
        key: &Key,
        witness: CasWitness,
        new_value: String,
        ttl: Option<Duration>,
    ) -> BackendResult<bool>;

    /// Idempotently remove `key`. Returns [`DeleteStatus::Missing`] if the
    /// key was already absent.
    async fn delete(&self, key: &Key) -> BackendResult<DeleteStatus>;

    /// A short label identifying this backend for metrics and tracing.
    fn label(&self) -> &str {
        "backend"
    }
}

#[async_trait]
impl Backend for Box<dyn Backend> {
    async fn get(&self, key: &Key) -> BackendResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &Key, value: String, ttl: Option<Duration>) -> BackendResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn check_and_set(
        &self,
        key: &Key,
        witness: CasWitness,
        new_value: String,
        ttl: Option<Duration>,
    ) -> BackendResult<bool> {
        (**self).check_and_set(key, witness, new_value, ttl).await
    }

    async fn delete(&self, key: &Key) -> BackendResult<DeleteStatus> {
        (**self).delete(key).await
    }

    fn label(&self) -> &str {
        (**self).label()
    }
}

#[async_trait]
impl Backend for Arc<UnsyncBackend> {
    async fn get(&self, key: &Key) -> BackendResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &Key, value: String, ttl: Option<Duration>) -> BackendResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn check_and_set(
        &self,
        key: &Key,
        witness: CasWitness,
        new_value: String,
        ttl: Option<Duration>,
    ) -> BackendResult<bool> {
        (**self).check_and_set(key, witness, new_value, ttl).await
    }

    async fn delete(&self, key: &Key) -> BackendResult<DeleteStatus> {
        (**self).delete(key).await
    }

    fn label(&self) -> &str {
        (**self).label()
    }
}

#[async_trait]
impl Backend for Arc<SyncBackend> {
    async fn get(&self, key: &Key) -> BackendResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &Key, value: String, ttl: Option<Duration>) -> BackendResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn check_and_set(
        &self,
        key: &Key,
        witness: CasWitness,
        new_value: String,
        ttl: Option<Duration>,
    ) -> BackendResult<bool> {
        (**self).check_and_set(key, witness, new_value, ttl).await
    }

    async fn delete(&self, key: &Key) -> BackendResult<DeleteStatus> {
        (**self).delete(key).await
    }

    fn label(&self) -> &str {
        (**self).label()
    }
}
