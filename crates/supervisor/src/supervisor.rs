//! The gateway supervisor.
//!
//! One `GatewaySupervisor` exists per sandbox. It owns the process directory,
//! the start single-flight, the throttle and failure bookkeeping, and the
//! background task set; request handlers share it through an `Arc`.
//!
//! `ensure_ready` is the entry point. The whole attempt (finding an existing
//! gateway, waiting on it, killing it, and starting a replacement) runs inside
//! the start single-flight, so concurrent callers never race each other into
//! duplicate kills or spawns.

use futures::FutureExt;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

use gatewarden_core::{
    config::SupervisorConfig, DeferredOutcome, Error, ProcessLogs, RestoreOutcome, Result,
    SyncOutcome,
};
use gatewarden_sandbox::{ProcessHandle, SandboxBackend};
use gatewarden_sync::SyncEngine;

use crate::classify::{reap, triage};
use crate::directory::{DirectoryHealth, ProcessDirectory};
use crate::metrics;
use crate::singleflight::SingleFlight;
use crate::tasks::BackgroundTasks;

/// Environment variable carrying the gateway auth token.
pub const GATEWAY_TOKEN_ENV: &str = "OPENCLAW_GATEWAY_TOKEN";

#[derive(Default)]
struct StartState {
    last_attempt: Option<Instant>,
    consecutive_failures: u32,
}

pub struct GatewaySupervisor {
    sandbox: Arc<dyn SandboxBackend>,
    config: SupervisorConfig,
    directory: ProcessDirectory,
    sync: SyncEngine,
    tasks: BackgroundTasks,
    start: SingleFlight<ProcessHandle>,
    state: Mutex<StartState>,
}

impl GatewaySupervisor {
    pub fn new(sandbox: Arc<dyn SandboxBackend>, sync: SyncEngine, config: SupervisorConfig) -> Self {
        let directory = ProcessDirectory::new(
            sandbox.clone(),
            config.process_cache_ttl(),
            config.process_stale_bound(),
        );
        Self {
            sandbox,
            config,
            directory,
            sync,
            tasks: BackgroundTasks::new(),
            start: SingleFlight::new(),
            state: Mutex::new(StartState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StartState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn directory(&self) -> &ProcessDirectory {
        &self.directory
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    pub fn sync_engine(&self) -> &SyncEngine {
        &self.sync
    }

    pub fn health(&self) -> DirectoryHealth {
        self.directory.health()
    }

    /// Whether an `ensure_ready` attempt is running.
    pub fn start_in_flight(&self) -> bool {
        self.start.in_flight()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Clear the failure count so starts are allowed again after the restart
    /// limit was reached.
    pub fn reset_failures(&self) {
        let mut state = self.lock();
        if state.consecutive_failures > 0 {
            tracing::info!(failures = state.consecutive_failures, "Resetting gateway start failures");
        }
        state.consecutive_failures = 0;
    }

    // =========================================================================
    // Supervision
    // =========================================================================

    /// Return a reachable gateway, starting one if needed.
    pub async fn ensure_ready(self: &Arc<Self>) -> Result<ProcessHandle> {
        let this = Arc::clone(self);
        self.start
            .run(move || async move { this.attempt().await }.boxed())
            .await
    }

    /// Start `ensure_ready` in the background.
    pub fn warm_up(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.tasks.submit("warm-up", async move {
            let handle = this.ensure_ready().await?;
            tracing::info!(process_id = %handle.id(), "Gateway warmed up");
            Ok(())
        });
    }

    /// The canonical gateway, if one is listed. Zombies found along the way
    /// are reaped.
    pub async fn find_existing(&self) -> Result<Option<ProcessHandle>> {
        let snapshot = self.directory.refresh().await?;
        let triage = triage(&snapshot.processes, &self.config.patterns);

        if !triage.zombies.is_empty() {
            tracing::info!(count = triage.zombies.len(), "Reaping zombie processes");
            reap(self.sandbox.as_ref(), &self.directory, &triage.zombies).await;
        }

        Ok(triage
            .canonical
            .map(|info| ProcessHandle::new(info, self.sandbox.clone())))
    }

    async fn attempt(self: Arc<Self>) -> Result<ProcessHandle> {
        if let Some(mut existing) = self.find_existing().await? {
            tracing::debug!(process_id = %existing.id(), status = ?existing.status(), "Found existing gateway");
            match existing
                .wait_for_port(
                    self.config.gateway_port,
                    &self.config.port_check,
                    self.config.startup_timeout(),
                )
                .await
            {
                Ok(()) => {
                    existing.mark_running();
                    return Ok(existing);
                }
                Err(e) => {
                    tracing::warn!(
                        process_id = %existing.id(),
                        error = %e,
                        "Existing gateway never became reachable, replacing it"
                    );
                    if let Err(kill_err) = existing.kill().await {
                        tracing::debug!(process_id = %existing.id(), error = %kill_err, "Kill failed");
                    }
                    self.directory.invalidate();
                }
            }
        }

        self.start_new().await
    }

    /// Check the throttle window and restart limit, and record the attempt.
    fn claim_start(&self) -> Result<()> {
        let mut state = self.lock();
        let window = self.config.start_throttle();

        if let Some(last) = state.last_attempt {
            let elapsed = last.elapsed();
            if elapsed < window {
                metrics::record_start("throttled");
                return Err(Error::ThrottledStart {
                    elapsed_ms: elapsed.as_millis() as u64,
                    window_ms: window.as_millis() as u64,
                });
            }
        }

        let limit = self.config.max_consecutive_start_failures;
        if limit > 0 && state.consecutive_failures >= limit {
            metrics::record_start("limit_reached");
            return Err(Error::RestartLimitReached(state.consecutive_failures));
        }

        state.last_attempt = Some(Instant::now());
        Ok(())
    }

    fn record_failure(&self) -> u32 {
        let mut state = self.lock();
        state.consecutive_failures += 1;
        state.consecutive_failures
    }

    async fn start_new(self: Arc<Self>) -> Result<ProcessHandle> {
        self.claim_start()?;

        let deferred = self.restore_if_empty().await;

        let env = self.gateway_env();
        tracing::info!(command = %self.config.start_command, port = self.config.gateway_port, "Starting gateway");
        let started = Instant::now();
        let info = match self.sandbox.start_process(&self.config.start_command, &env).await {
            Ok(info) => info,
            Err(e) => {
                let failures = self.record_failure();
                metrics::record_start("spawn_failed");
                tracing::error!(error = %e, failures, "Gateway spawn failed");
                return Err(e);
            }
        };

        let mut handle = ProcessHandle::new(info, self.sandbox.clone());
        let waited = handle
            .wait_for_port(
                self.config.gateway_port,
                &self.config.port_check,
                self.config.startup_timeout(),
            )
            .await;

        if let Err(e) = waited {
            let failures = self.record_failure();
            metrics::record_start("timeout");
            tracing::error!(process_id = %handle.id(), error = %e, failures, "Gateway failed to start");
            if let Err(kill_err) = handle.kill().await {
                tracing::debug!(process_id = %handle.id(), error = %kill_err, "Kill failed");
            }
            self.directory.invalidate();
            return Err(self.startup_failure(&handle, e).await);
        }

        handle.mark_running();
        self.directory.invalidate();
        self.reset_failures();
        metrics::record_start("ready");
        metrics::record_startup_duration(started.elapsed());
        tracing::info!(
            process_id = %handle.id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Gateway ready"
        );

        if !deferred.is_empty() {
            self.submit_deferred_restore(deferred);
        }
        Ok(handle)
    }

    /// Restore from backup when the sandbox has no config. Returns the keys
    /// left for the deferred restore.
    async fn restore_if_empty(&self) -> Vec<String> {
        match self.sync.has_local_state().await {
            Ok(true) => Vec::new(),
            Ok(false) => {
                tracing::info!("No local gateway config, restoring from backup");
                let outcome = self.restore().await;
                if !outcome.success {
                    tracing::warn!(error = ?outcome.error, "Restore before start failed, starting anyway");
                }
                outcome.deferred_keys
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not probe local config, skipping restore");
                Vec::new()
            }
        }
    }

    fn submit_deferred_restore(self: &Arc<Self>, keys: Vec<String>) {
        let this = Arc::clone(self);
        self.tasks.submit("deferred-restore", async move {
            let outcome = this.restore_deferred(&keys).await;
            if outcome.failed > 0 {
                return Err(Error::internal(format!(
                    "{} of {} deferred files failed to restore",
                    outcome.failed,
                    keys.len()
                )));
            }
            Ok(())
        });
    }

    async fn startup_failure(&self, handle: &ProcessHandle, cause: Error) -> Error {
        match handle.logs().await {
            Ok(logs) => Error::StartupTimeout {
                message: cause.to_string(),
                stderr: self.stderr_excerpt(&logs),
            },
            Err(log_err) => {
                tracing::debug!(error = %log_err, "Could not fetch gateway logs");
                cause
            }
        }
    }

    fn stderr_excerpt(&self, logs: &ProcessLogs) -> Option<String> {
        let stderr = logs.stderr.trim_end();
        if stderr.is_empty() {
            return None;
        }
        let count = stderr.chars().count();
        let skip = count.saturating_sub(self.config.stderr_excerpt_chars);
        Some(stderr.chars().skip(skip).collect())
    }

    /// Environment for the gateway: static entries, host passthrough, token.
    pub fn gateway_env(&self) -> HashMap<String, String> {
        let mut env = self.config.env.clone();
        for name in &self.config.env_passthrough {
            if let Ok(value) = std::env::var(name) {
                env.entry(name.clone()).or_insert(value);
            }
        }
        if let Some(token) = &self.config.gateway_token {
            env.insert(GATEWAY_TOKEN_ENV.to_string(), token.expose_secret().clone());
        }
        env
    }

    // =========================================================================
    // State sync
    // =========================================================================

    pub async fn sync(&self) -> SyncOutcome {
        let outcome = self.sync.sync().await;
        metrics::record_sync("sync", outcome.success);
        outcome
    }

    pub async fn restore(&self) -> RestoreOutcome {
        let outcome = self.sync.restore().await;
        metrics::record_sync("restore", outcome.success);
        outcome
    }

    pub async fn restore_deferred(&self, keys: &[String]) -> DeferredOutcome {
        let outcome = self.sync.restore_deferred(keys).await;
        metrics::record_sync("restore_deferred", outcome.failed == 0);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatewarden_core::config::SyncConfig;
    use gatewarden_sandbox::MockSandbox;
    use secrecy::Secret;

    fn supervisor(config: SupervisorConfig) -> GatewaySupervisor {
        let sandbox: Arc<dyn SandboxBackend> = Arc::new(MockSandbox::new());
        let sync = SyncEngine::new(sandbox.clone(), None, SyncConfig::default());
        GatewaySupervisor::new(sandbox, sync, config)
    }

    #[test]
    fn test_gateway_env_merges_sources() {
        let config = SupervisorConfig {
            env: HashMap::from([("OPENCLAW_DEV_MODE".to_string(), "true".to_string())]),
            env_passthrough: vec!["GATEWARDEN_TEST_PASSTHROUGH".to_string()],
            gateway_token: Some(Secret::new("s3cret".to_string())),
            ..Default::default()
        };
        std::env::set_var("GATEWARDEN_TEST_PASSTHROUGH", "from-host");

        let env = supervisor(config).gateway_env();

        assert_eq!(env.get("OPENCLAW_DEV_MODE").map(String::as_str), Some("true"));
        assert_eq!(env.get("GATEWARDEN_TEST_PASSTHROUGH").map(String::as_str), Some("from-host"));
        assert_eq!(env.get(GATEWAY_TOKEN_ENV).map(String::as_str), Some("s3cret"));
    }

    #[test]
    fn test_stderr_excerpt_keeps_tail() {
        let config = SupervisorConfig {
            stderr_excerpt_chars: 5,
            ..Default::default()
        };
        let sup = supervisor(config);

        let logs = ProcessLogs {
            stdout: String::new(),
            stderr: "abcdefghij\n".into(),
        };
        assert_eq!(sup.stderr_excerpt(&logs).as_deref(), Some("fghij"));
        assert_eq!(sup.stderr_excerpt(&ProcessLogs::default()), None);
    }

    #[test]
    fn test_reset_failures() {
        let sup = supervisor(SupervisorConfig::default());
        sup.record_failure();
        sup.record_failure();
        assert_eq!(sup.consecutive_failures(), 2);
        sup.reset_failures();
        assert_eq!(sup.consecutive_failures(), 0);
    }
}
