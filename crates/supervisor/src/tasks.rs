//! Supervised background work.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

use gatewarden_core::Result;

/// Tasks that outlive the call that submitted them: deferred restores and
/// warm-up starts. Failures and panics are logged; `drain` waits for
/// everything still running.
#[derive(Default)]
pub struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn `task` onto the current runtime.
    pub fn submit<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let mut set = self.lock();
        while let Some(finished) = set.try_join_next() {
            log_join(finished);
        }
        set.spawn(async move {
            let started = Instant::now();
            match task.await {
                Ok(()) => {
                    tracing::debug!(task = name, elapsed_ms = started.elapsed().as_millis() as u64, "Background task finished")
                }
                Err(e) => tracing::error!(task = name, error = %e, "Background task failed"),
            }
        });
        tracing::debug!(task = name, pending = set.len(), "Background task submitted");
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Wait for every submitted task.
    pub async fn drain(&self) {
        loop {
            let mut set = std::mem::take(&mut *self.lock());
            if set.is_empty() {
                return;
            }
            while let Some(finished) = set.join_next().await {
                log_join(finished);
            }
        }
    }
}

fn log_join(result: std::result::Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            tracing::error!(error = %e, "Background task panicked");
        } else {
            tracing::warn!(error = %e, "Background task cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatewarden_core::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_tasks() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        for delay in [10u64, 50, 100] {
            let done = done.clone();
            tasks.submit("counter", async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        tasks.submit("failing", async { Err(Error::internal("expected")) });

        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_tasks_are_reaped_on_submit() {
        let tasks = BackgroundTasks::new();
        tasks.submit("quick", async { Ok(()) });
        tokio::time::sleep(Duration::from_millis(1)).await;

        tasks.submit("next", async { Ok(()) });
        assert_eq!(tasks.len(), 1);
        tasks.drain().await;
    }
}
