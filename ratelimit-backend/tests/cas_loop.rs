//! Integration tests for the CAS retry loop against a minimal in-memory
//! backend, independent of the `ratelimit-memory` crate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use ratelimit_backend::{
    Backend, BackendError, BackendResult, CasLoopConfig, CasWitness, DeleteStatus, Mode, MutatorOutcome, cas_loop,
};
use ratelimit_core::{EngineTag, Key, KeyBuilder};

struct TestBackend {
    store: DashMap<String, String>,
}

impl TestBackend {
    fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }
}

#[async_trait]
impl Backend for TestBackend {
    async fn get(&self, key: &Key) -> BackendResult<Option<String>> {
        Ok(self.store.get(key.as_str()).map(|v| v.clone()))
    }

    async fn set(&self, key: &Key, value: String, _ttl: Option<Duration>) -> BackendResult<()> {
        self.store.insert(key.as_str().to_owned(), value);
        Ok(())
    }

    async fn check_and_set(
        &self,
        key: &Key,
        witness: CasWitness,
        new_value: String,
        _ttl: Option<Duration>,
    ) -> BackendResult<bool> {
        use dashmap::mapref::entry::Entry;

        let entry = self.store.entry(key.as_str().to_owned());
        let matches = match (&witness, &entry) {
            (CasWitness::Absent, Entry::Vacant(_)) => true,
            (CasWitness::Value(expected), Entry::Occupied(existing)) => existing.get() == expected,
            _ => false,
        };
        if !matches {
            return Ok(false);
        }
        entry.insert(new_value);
        Ok(true)
    }

    async fn delete(&self, key: &Key) -> BackendResult<DeleteStatus> {
        match self.store.remove(key.as_str()) {
            Some(_) => Ok(DeleteStatus::Deleted),
            None => Ok(DeleteStatus::Missing),
        }
    }
}

fn key() -> Key {
    KeyBuilder::new("test")
        .engine(EngineTag::FixedWindow)
        .dynamic(Some("user-1"))
        .build()
        .unwrap()
}

#[tokio::test]
async fn first_call_initializes_state_and_allows() {
    let backend = TestBackend::new();
    let result = cas_loop(
        &backend,
        &key(),
        "fw",
        Mode::TryUpdate,
        CasLoopConfig::default(),
        || 1_000,
        |prev, _now| {
            assert!(prev.is_none());
            Ok(MutatorOutcome {
                new_state: Some("v2|1".to_owned()),
                allowed: true,
                result: true,
            })
        },
    )
    .await
    .unwrap();
    assert!(result);
    assert_eq!(backend.get(&key()).await.unwrap().as_deref(), Some("v2|1"));
}

#[tokio::test]
async fn read_only_mode_never_writes() {
    let backend = TestBackend::new();
    backend
        .set(&key(), "v2|5".to_owned(), None)
        .await
        .unwrap();

    let _ = cas_loop(
        &backend,
        &key(),
        "fw",
        Mode::ReadOnly,
        CasLoopConfig::default(),
        || 1_000,
        |prev, _now| {
            Ok(MutatorOutcome {
                new_state: Some("v2|999".to_owned()),
                allowed: true,
                result: (),
            })
        },
    )
    .await
    .unwrap();

    assert_eq!(backend.get(&key()).await.unwrap().as_deref(), Some("v2|5"));
}

#[tokio::test]
async fn concurrent_cas_retries_until_committed() {
    let backend = Arc::new(TestBackend::new());
    backend
        .set(&key(), "v2|0".to_owned(), None)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move {
            cas_loop(
                backend.as_ref(),
                &key(),
                "fw",
                Mode::TryUpdate,
                CasLoopConfig {
                    max_retries: 50,
                    ..CasLoopConfig::default()
                },
                || 1_000,
                |prev, _now| {
                    let current: i64 = prev
                        .and_then(|s| s.strip_prefix("v2|"))
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0);
                    Ok(MutatorOutcome {
                        new_state: Some(format!("v2|{}", current + 1)),
                        allowed: true,
                        result: (),
                    })
                },
            )
            .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(backend.get(&key()).await.unwrap().as_deref(), Some("v2|8"));
}

#[tokio::test]
async fn expired_deadline_cancels_before_the_first_read() {
    let backend = TestBackend::new();
    let already_past = Instant::now() - Duration::from_secs(1);

    let result = cas_loop(
        &backend,
        &key(),
        "fw",
        Mode::TryUpdate,
        CasLoopConfig {
            deadline: Some(already_past),
            ..CasLoopConfig::default()
        },
        || 1_000,
        |_prev, _now| {
            panic!("mutator must not run once the deadline has already elapsed");
        },
    )
    .await;

    assert!(matches!(result, Err(BackendError::Canceled { .. })));
    assert!(backend.get(&key()).await.unwrap().is_none());
}

#[tokio::test]
async fn deadline_cancels_before_the_cas_write_even_if_the_read_already_ran() {
    let backend = TestBackend::new();

    // The deadline hasn't elapsed when the loop starts (so the pre-read
    // checkpoint passes), but does elapse before the mutator returns, so the
    // pre-write checkpoint must catch it and no check_and_set is issued.
    let deadline = Instant::now() + Duration::from_millis(10);

    let result = cas_loop(
        &backend,
        &key(),
        "fw",
        Mode::TryUpdate,
        CasLoopConfig {
            deadline: Some(deadline),
            ..CasLoopConfig::default()
        },
        || 1_000,
        |_prev, _now| {
            std::thread::sleep(Duration::from_millis(30));
            Ok(MutatorOutcome {
                new_state: Some("v2|1".to_owned()),
                allowed: true,
                result: (),
            })
        },
    )
    .await;

    assert!(matches!(result, Err(BackendError::Canceled { .. })));
    assert!(backend.get(&key()).await.unwrap().is_none(), "a canceled call must not have written anything");
}
