//! Cached view of the sandbox process list.
//!
//! Listing processes is slow and fails transiently, so every reader goes
//! through `ProcessDirectory::refresh`: a young snapshot is served from
//! memory, concurrent misses share a single backend call, and a listing
//! failure falls back to a snapshot that is stale but still inside the
//! configured bound.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use gatewarden_core::{Error, ProcessInfo, Result};
use gatewarden_sandbox::SandboxBackend;

use crate::metrics;
use crate::singleflight::SingleFlight;

/// One complete process listing. Replaced wholesale, never edited.
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    pub processes: Vec<ProcessInfo>,
    pub fetched_at: Instant,
    pub fetched_wall: DateTime<Utc>,
}

impl ProcessSnapshot {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Most recent listing failure, cleared by the next successful listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryHealth {
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct DirectoryState {
    snapshot: Option<Arc<ProcessSnapshot>>,
    health: DirectoryHealth,
    // bumped by invalidate() so an older in-flight listing cannot repopulate
    epoch: u64,
}

pub struct ProcessDirectory {
    backend: Arc<dyn SandboxBackend>,
    ttl: Duration,
    stale_bound: Duration,
    state: Arc<Mutex<DirectoryState>>,
    inflight: SingleFlight<Arc<ProcessSnapshot>>,
}

impl ProcessDirectory {
    pub fn new(backend: Arc<dyn SandboxBackend>, ttl: Duration, stale_bound: Duration) -> Self {
        Self {
            backend,
            ttl,
            stale_bound,
            state: Arc::new(Mutex::new(DirectoryState::default())),
            inflight: SingleFlight::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        lock_state(&self.state)
    }

    /// Current process list, from cache when fresh.
    pub async fn refresh(&self) -> Result<Arc<ProcessSnapshot>> {
        if let Some(snapshot) = self.cached(self.ttl) {
            return Ok(snapshot);
        }

        let backend = self.backend.clone();
        let state = self.state.clone();
        let stale_bound = self.stale_bound;
        self.inflight
            .run(move || list_into(backend, state, stale_bound).boxed())
            .await
    }

    /// Drop the snapshot so the next refresh lists again.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.snapshot = None;
        state.epoch += 1;
    }

    pub fn health(&self) -> DirectoryHealth {
        self.lock().health.clone()
    }

    /// The snapshot if it is younger than `max_age`.
    pub fn cached(&self, max_age: Duration) -> Option<Arc<ProcessSnapshot>> {
        self.lock()
            .snapshot
            .as_ref()
            .filter(|snapshot| snapshot.age() < max_age)
            .cloned()
    }
}

fn lock_state(state: &Mutex<DirectoryState>) -> MutexGuard<'_, DirectoryState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn list_into(
    backend: Arc<dyn SandboxBackend>,
    state: Arc<Mutex<DirectoryState>>,
    stale_bound: Duration,
) -> Result<Arc<ProcessSnapshot>> {
    let epoch = lock_state(&state).epoch;
    let listed = backend.list_processes().await;

    let mut state = lock_state(&state);
    match listed {
        Ok(processes) => {
            let snapshot = Arc::new(ProcessSnapshot {
                processes,
                fetched_at: Instant::now(),
                fetched_wall: Utc::now(),
            });
            if state.epoch == epoch {
                state.snapshot = Some(snapshot.clone());
            }
            state.health = DirectoryHealth::default();
            tracing::trace!(count = snapshot.processes.len(), "Process list refreshed");
            Ok(snapshot)
        }
        Err(e) => {
            metrics::record_listing_error();
            state.health = DirectoryHealth {
                last_error: Some(e.to_string()),
                last_error_at: Some(Utc::now()),
            };
            match state.snapshot.as_ref().filter(|s| s.age() < stale_bound) {
                Some(stale) => {
                    tracing::warn!(
                        error = %e,
                        age_ms = stale.age().as_millis() as u64,
                        listed_at = %stale.fetched_wall,
                        "Process listing failed, serving cached snapshot"
                    );
                    Ok(stale.clone())
                }
                None => {
                    tracing::error!(error = %e, "Process listing failed with no usable snapshot");
                    Err(Error::transient_list(e.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatewarden_core::ProcessStatus;
    use gatewarden_sandbox::MockSandbox;

    fn directory(backend: &Arc<MockSandbox>) -> ProcessDirectory {
        ProcessDirectory::new(
            backend.clone(),
            Duration::from_millis(5_000),
            Duration::from_millis(30_000),
        )
    }

    fn sandbox() -> Arc<MockSandbox> {
        Arc::new(MockSandbox::new().with_process(
            ProcessInfo::new("7", "/usr/local/bin/start-openclaw.sh", ProcessStatus::Running),
            true,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_serves_fresh_cache() {
        let backend = sandbox();
        let dir = directory(&backend);

        dir.refresh().await.unwrap();
        dir.refresh().await.unwrap();
        assert_eq!(backend.list_calls(), 1);

        tokio::time::advance(Duration::from_millis(5_001)).await;
        dir.refresh().await.unwrap();
        assert_eq!(backend.list_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_share_one_listing() {
        let backend = Arc::new(
            MockSandbox::new().with_list_delay(Duration::from_millis(200)),
        );
        let dir = Arc::new(directory(&backend));

        let calls = (0..5).map(|_| {
            let dir = dir.clone();
            tokio::spawn(async move { dir.refresh().await.map(|s| s.processes.len()) })
        });
        for result in futures::future::join_all(calls).await {
            assert_eq!(result.unwrap().unwrap(), 0);
        }
        assert_eq!(backend.list_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_falls_back_to_stale_snapshot() {
        let backend = sandbox();
        let dir = directory(&backend);
        dir.refresh().await.unwrap();

        tokio::time::advance(Duration::from_millis(10_000)).await;
        backend.fail_next_lists(1);
        let snapshot = dir.refresh().await.unwrap();

        assert_eq!(snapshot.processes.len(), 1);
        let health = dir.health();
        assert!(health.last_error.is_some());
        assert!(health.last_error_at.is_some());

        // a successful listing clears the recorded error
        dir.refresh().await.unwrap();
        assert_eq!(dir.health(), DirectoryHealth::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_past_stale_bound_is_transient_error() {
        let backend = sandbox();
        let dir = directory(&backend);
        dir.refresh().await.unwrap();

        tokio::time::advance(Duration::from_millis(30_001)).await;
        backend.fail_next_lists(1);
        let err = dir.refresh().await.unwrap_err();

        assert!(matches!(err.root(), Error::TransientList(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_listing() {
        let backend = sandbox();
        let dir = directory(&backend);

        dir.refresh().await.unwrap();
        dir.invalidate();
        assert!(dir.cached(Duration::from_secs(60)).is_none());
        dir.refresh().await.unwrap();
        assert_eq!(backend.list_calls(), 2);
    }
}
