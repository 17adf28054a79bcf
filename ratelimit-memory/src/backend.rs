//! DashMap-backed in-memory reference [`Backend`](ratelimit_backend::Backend).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ratelimit_backend::{Backend, BackendResult, CasWitness, DeleteStatus};
use ratelimit_core::{Clock, Key, SystemClock};

struct Entry {
    value: String,
    expires_at_ns: Option<i64>,
}

/// Single-process rate limiter backend over a [`DashMap`].
///
/// Used as the reference [`Backend`] implementation for this workspace's
/// tests and examples, and as a drop-in choice for single-instance
/// deployments that don't need state shared across processes.
///
/// TTLs are enforced lazily: an expired entry is reported absent by `get`
/// and treated as absent by `check_and_set`, but is only actually removed
/// from the map when [`MemoryBackend::sweep_expired`] runs or a later write
/// overwrites it. Call `sweep_expired` periodically (e.g. from a background
/// task) to bound memory use under a workload with many short-lived keys
/// that are never read again.
pub struct MemoryBackend {
    store: DashMap<String, Entry>,
    clock: Arc<dyn Clock + Send + Sync>,
    label: String,
}

impl MemoryBackend {
    /// Create a backend using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a backend driven by a custom [`Clock`] (tests use this with a
    /// `TestClock` to exercise TTL expiry deterministically).
    pub fn with_clock(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            store: DashMap::new(),
            clock,
            label: "memory".to_owned(),
        }
    }

    /// Set the label reported by [`Backend::label`] and used in metrics.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Approximate number of entries currently held, including not-yet-swept
    /// expired ones.
    pub fn entry_count(&self) -> u64 {
        self.store.len() as u64
    }

    /// Remove every entry whose TTL has lapsed. Returns the number removed.
    ///
    /// Safe to call concurrently with reads and writes; each shard is swept
    /// independently under the `DashMap`'s own per-shard locking.
    pub fn sweep_expired(&self) -> u64 {
        let now = self.clock.now_ns();
        let before = self.store.len();
        self.store.retain(|_, entry| !is_expired(entry, now));
        let removed = (before - self.store.len()) as u64;
        crate::metrics::record_swept(&self.label, removed);
        crate::metrics::record_entry_count(&self.label, self.entry_count());
        removed
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = self.clock.now_ns();
        let entry = self.store.get(key)?;
        if is_expired(&entry, now) {
            None
        } else {
            Some(entry.value.clone())
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn is_expired(entry: &Entry, now_ns: i64) -> bool {
    matches!(entry.expires_at_ns, Some(deadline) if now_ns >= deadline)
}

fn expiry_from_ttl(clock: &dyn Clock, ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| clock.now_ns().saturating_add(ttl.as_nanos() as i64))
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &Key) -> BackendResult<Option<String>> {
        Ok(self.live_value(key.as_str()))
    }

    async fn set(&self, key: &Key, value: String, ttl: Option<Duration>) -> BackendResult<()> {
        let expires_at_ns = expiry_from_ttl(self.clock.as_ref(), ttl);
        self.store.insert(
            key.as_str().to_owned(),
            Entry {
                value,
                expires_at_ns,
            },
        );
        crate::metrics::record_entry_count(&self.label, self.entry_count());
        Ok(())
    }

    async fn check_and_set(
        &self,
        key: &Key,
        witness: CasWitness,
        new_value: String,
        ttl: Option<Duration>,
    ) -> BackendResult<bool> {
        use dashmap::mapref::entry::Entry as MapEntry;

        let now = self.clock.now_ns();
        let slot = self.store.entry(key.as_str().to_owned());
        let matches = match (&witness, &slot) {
            (CasWitness::Absent, MapEntry::Vacant(_)) => true,
            (CasWitness::Absent, MapEntry::Occupied(existing)) => is_expired(existing.get(), now),
            (CasWitness::Value(expected), MapEntry::Occupied(existing)) => {
                !is_expired(existing.get(), now) && &existing.get().value == expected
            }
            (CasWitness::Value(_), MapEntry::Vacant(_)) => false,
        };
        if !matches {
            return Ok(false);
        }
        slot.insert(Entry {
            value: new_value,
            expires_at_ns: expiry_from_ttl(self.clock.as_ref(), ttl),
        });
        crate::metrics::record_entry_count(&self.label, self.entry_count());
        Ok(true)
    }

    async fn delete(&self, key: &Key) -> BackendResult<DeleteStatus> {
        let removed = self.store.remove(key.as_str());
        crate::metrics::record_entry_count(&self.label, self.entry_count());
        match removed {
            Some(_) => Ok(DeleteStatus::Deleted),
            None => Ok(DeleteStatus::Missing),
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratelimit_core::{EngineTag, KeyBuilder, TestClock};

    fn key() -> Key {
        KeyBuilder::new("api")
            .engine(EngineTag::TokenBucket)
            .dynamic(Some("user-1"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let backend = MemoryBackend::new();
        backend.set(&key(), "v2|5".to_owned(), None).await.unwrap();
        assert_eq!(backend.get(&key()).await.unwrap().as_deref(), Some("v2|5"));
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get(&key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let clock = Arc::new(TestClock::new(0));
        let backend = MemoryBackend::with_clock(clock.clone());
        backend
            .set(&key(), "v2|5".to_owned(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(backend.get(&key()).await.unwrap().as_deref(), Some("v2|5"));

        clock.advance(Duration::from_secs(2));
        assert_eq!(backend.get(&key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn check_and_set_rejects_mismatch() {
        let backend = MemoryBackend::new();
        backend.set(&key(), "v2|1".to_owned(), None).await.unwrap();
        let ok = backend
            .check_and_set(
                &key(),
                CasWitness::Value("v2|999".to_owned()),
                "v2|2".to_owned(),
                None,
            )
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(backend.get(&key()).await.unwrap().as_deref(), Some("v2|1"));
    }

    #[tokio::test]
    async fn check_and_set_on_expired_entry_behaves_as_absent() {
        let clock = Arc::new(TestClock::new(0));
        let backend = MemoryBackend::with_clock(clock.clone());
        backend
            .set(&key(), "v2|1".to_owned(), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(1));

        let ok = backend
            .check_and_set(&key(), CasWitness::Absent, "v2|2".to_owned(), None)
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(backend.get(&key()).await.unwrap().as_deref(), Some("v2|2"));
    }

    #[tokio::test]
    async fn sweep_expired_removes_lapsed_entries() {
        let clock = Arc::new(TestClock::new(0));
        let backend = MemoryBackend::with_clock(clock.clone());
        backend
            .set(&key(), "v2|1".to_owned(), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(1));

        assert_eq!(backend.sweep_expired(), 1);
        assert_eq!(backend.entry_count(), 0);
    }

    #[tokio::test]
    async fn delete_reports_missing_after_removal() {
        let backend = MemoryBackend::new();
        backend.set(&key(), "v2|1".to_owned(), None).await.unwrap();
        assert_eq!(backend.delete(&key()).await.unwrap(), DeleteStatus::Deleted);
        assert_eq!(backend.delete(&key()).await.unwrap(), DeleteStatus::Missing);
    }
}
