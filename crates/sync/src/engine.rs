//! Bidirectional sync between the sandbox filesystem and the object store.

use bytes::Bytes;
use futures::future::join_all;
use std::sync::Arc;

use gatewarden_core::{
    config::SyncConfig,
    traits::{ListRequest, ObjectStore},
    DeferredOutcome, Error, RestoreOutcome, Result, SyncOutcome,
};
use gatewarden_sandbox::{ListFilesOptions, SandboxBackend};

use crate::policy::ExclusionPolicy;
use crate::steps::{parent_path, restore_steps, step_for_key, sync_steps, SyncStep};

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// Copies gateway state between the sandbox and durable storage.
pub struct SyncEngine {
    sandbox: Arc<dyn SandboxBackend>,
    store: Option<Arc<dyn ObjectStore>>,
    config: SyncConfig,
    policy: ExclusionPolicy,
}

impl SyncEngine {
    /// Create a sync engine. A `None` store makes every transfer report
    /// `StorageUnavailable`.
    pub fn new(
        sandbox: Arc<dyn SandboxBackend>,
        store: Option<Arc<dyn ObjectStore>>,
        config: SyncConfig,
    ) -> Self {
        Self {
            sandbox,
            store,
            config,
            policy: ExclusionPolicy::default(),
        }
    }

    /// Whether the sandbox already holds gateway config (current or legacy).
    pub async fn has_local_state(&self) -> Result<bool> {
        Ok(self.config_source().await?.is_some())
    }

    /// Directory the config step reads from, preferring the current layout.
    async fn config_source(&self) -> Result<Option<String>> {
        if self.sandbox.exists(&self.config.config_marker()).await? {
            return Ok(Some(self.config.config_dir.clone()));
        }
        if self.sandbox.exists(&self.config.legacy_config_marker()).await? {
            tracing::debug!(dir = %self.config.legacy_config_dir, "Using legacy config directory");
            return Ok(Some(self.config.legacy_config_dir.clone()));
        }
        Ok(None)
    }

    /// Timestamp of the last successful sync, if a backup exists.
    pub async fn last_backup(&self) -> Result<Option<String>> {
        let store = self.store.as_ref().ok_or(Error::StorageUnavailable)?;
        Ok(store
            .get(&self.config.marker_key)
            .await?
            .map(|marker| marker.text().trim().to_string()))
    }

    // =========================================================================
    // Sandbox → Store
    // =========================================================================

    /// Upload the sandbox state and stamp the backup marker.
    pub async fn sync(&self) -> SyncOutcome {
        let Some(store) = self.store.as_ref() else {
            return SyncOutcome::failure(Error::StorageUnavailable.to_string());
        };

        let source = match self.config_source().await {
            Ok(Some(dir)) => dir,
            Ok(None) => {
                let err = Error::ConfigurationMissing(format!(
                    "neither {} nor {} exists",
                    self.config.config_marker(),
                    self.config.legacy_config_marker()
                ));
                tracing::warn!(error = %err, "Sync aborted to protect the existing backup");
                return SyncOutcome::failure(err.to_string());
            }
            Err(e) => {
                tracing::error!(error = %e, "Sync aborted: config probe failed");
                return SyncOutcome::failure(format!("config probe failed: {}", e));
            }
        };

        let mut outcome = SyncOutcome::default();
        let mut step_errors = Vec::new();
        for step in sync_steps(&self.config, &source) {
            if let Err(e) = self.sync_step(store.as_ref(), &step, &mut outcome).await {
                tracing::warn!(step = step.name, error = %e, "Sync step failed");
                outcome.failed += 1;
                step_errors.push(format!("{} step: {}", step.name, e));
            }
        }

        // an incomplete sync must not advance the marker
        if !step_errors.is_empty() {
            outcome.error = Some(step_errors.join("; "));
            outcome.details = Some(format!(
                "uploaded {} files, skipped {}, failed {}; backup marker not updated",
                outcome.uploaded, outcome.skipped, outcome.failed
            ));
            tracing::error!(error = ?outcome.error, "Sync incomplete");
            return outcome;
        }

        let now = chrono::Utc::now().to_rfc3339();
        if let Err(e) = store
            .put(&self.config.marker_key, Bytes::from(now.clone()), TEXT_CONTENT_TYPE)
            .await
        {
            tracing::error!(error = %e, "Failed to write backup marker");
            outcome.error = Some(format!("marker write failed: {}", e));
            return outcome;
        }

        outcome.success = true;
        outcome.last_sync = Some(now);
        outcome.details = Some(format!(
            "uploaded {} files, skipped {}, failed {}",
            outcome.uploaded, outcome.skipped, outcome.failed
        ));
        tracing::info!(
            uploaded = outcome.uploaded,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "Sync completed"
        );
        outcome
    }

    /// Upload one step. Per-file failures are counted in `outcome`; an error
    /// means the step's source could not be probed or listed at all.
    async fn sync_step(
        &self,
        store: &dyn ObjectStore,
        step: &SyncStep,
        outcome: &mut SyncOutcome,
    ) -> Result<()> {
        if !self.sandbox.exists(&step.source_path).await? {
            tracing::debug!(step = step.name, path = %step.source_path, "Sync step source missing, skipping");
            return Ok(());
        }

        let files = self
            .sandbox
            .list_files(&step.source_path, ListFilesOptions::default())
            .await?;

        for file in files {
            if let Some(reason) = self.policy.check(&file.relative, &step.excluded_subdirs) {
                tracing::trace!(path = %file.path, reason = ?reason, "Excluded from sync");
                outcome.skipped += 1;
                continue;
            }
            let key = step.store_key(&file.relative);
            match self.upload(store, &file.path, &key).await {
                Ok(()) => {
                    outcome.uploaded += 1;
                    metrics::counter!("state_sync_files_total", "direction" => "upload", "outcome" => "ok").increment(1);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping file");
                    outcome.failed += 1;
                    metrics::counter!("state_sync_files_total", "direction" => "upload", "outcome" => "error").increment(1);
                }
            }
        }
        Ok(())
    }

    async fn upload(&self, store: &dyn ObjectStore, path: &str, key: &str) -> Result<()> {
        let content = self
            .sandbox
            .read_file(path)
            .await
            .map_err(|e| Error::partial_file(path, e))?;
        let content_type = if std::str::from_utf8(&content).is_ok() {
            TEXT_CONTENT_TYPE
        } else {
            BINARY_CONTENT_TYPE
        };
        store
            .put(key, Bytes::from(content), content_type)
            .await
            .map_err(|e| Error::partial_file(path, e))
    }

    // =========================================================================
    // Store → Sandbox
    // =========================================================================

    /// Restore the last backup. Session transcripts are left in
    /// `deferred_keys` for `restore_deferred`.
    pub async fn restore(&self) -> RestoreOutcome {
        let Some(store) = self.store.as_ref() else {
            return RestoreOutcome::failure(Error::StorageUnavailable.to_string());
        };

        let last_sync = match store.get(&self.config.marker_key).await {
            Ok(Some(marker)) => marker.text().trim().to_string(),
            Ok(None) => {
                tracing::info!("No backup found, nothing to restore");
                return RestoreOutcome {
                    success: true,
                    details: Some("no backup found".into()),
                    ..Default::default()
                };
            }
            Err(e) => {
                tracing::error!(error = %e, "Restore aborted: marker lookup failed");
                return RestoreOutcome::failure(e.to_string());
            }
        };

        let mut outcome = RestoreOutcome {
            last_sync: Some(last_sync),
            ..Default::default()
        };
        for step in restore_steps(&self.config) {
            if let Err(e) = self.restore_step(store.as_ref(), &step, &mut outcome).await {
                tracing::error!(step = step.name, error = %e, "Restore step listing failed");
                outcome.error = Some(e.to_string());
            }
        }

        outcome.success = outcome.error.is_none();
        outcome.details = Some(format!(
            "restored {} files, failed {}, deferred {}",
            outcome.restored,
            outcome.failed,
            outcome.deferred_keys.len()
        ));
        tracing::info!(
            restored = outcome.restored,
            failed = outcome.failed,
            deferred = outcome.deferred_keys.len(),
            last_sync = ?outcome.last_sync,
            "Restore completed"
        );
        outcome
    }

    async fn restore_step(
        &self,
        store: &dyn ObjectStore,
        step: &SyncStep,
        outcome: &mut RestoreOutcome,
    ) -> Result<()> {
        let mut cursor = None;
        loop {
            let page = store
                .list(ListRequest::prefix(step.store_prefix.clone()).with_cursor(cursor.take()))
                .await?;

            let mut immediate = Vec::new();
            for object in &page.objects {
                let Some(relative) = step.relative_key(&object.key) else {
                    continue;
                };
                if relative.is_empty()
                    || relative.ends_with('/')
                    || self.policy.is_excluded(relative, &step.excluded_subdirs)
                {
                    continue;
                }
                if self.policy.is_deferred(relative) {
                    outcome.deferred_keys.push(object.key.clone());
                } else {
                    immediate.push((object.key.clone(), step.local_path(relative)));
                }
            }

            let (restored, failed) = self
                .restore_batched(store, &immediate, self.config.restore_batch_size)
                .await;
            outcome.restored += restored;
            outcome.failed += failed;

            if !page.truncated {
                return Ok(());
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(()),
            }
        }
    }

    /// Restore keys previously returned in `RestoreOutcome::deferred_keys`.
    pub async fn restore_deferred(&self, keys: &[String]) -> DeferredOutcome {
        let mut outcome = DeferredOutcome::default();
        let Some(store) = self.store.as_ref() else {
            tracing::warn!(keys = keys.len(), "Deferred restore skipped: storage unavailable");
            outcome.failed = keys.len();
            return outcome;
        };

        let steps = restore_steps(&self.config);
        let mut jobs = Vec::with_capacity(keys.len());
        for key in keys {
            match step_for_key(&steps, key) {
                Some((step, relative)) => jobs.push((key.clone(), step.local_path(relative))),
                None => {
                    tracing::warn!(key = %key, "Deferred key matches no sync prefix");
                    outcome.unmapped += 1;
                }
            }
        }

        let (restored, failed) = self
            .restore_batched(store.as_ref(), &jobs, self.config.deferred_batch_size)
            .await;
        outcome.restored = restored;
        outcome.failed = failed;
        tracing::info!(restored, failed, unmapped = outcome.unmapped, "Deferred restore completed");
        outcome
    }

    /// Restore `(key, path)` pairs, `batch_size` at a time. Returns (ok, failed).
    async fn restore_batched(
        &self,
        store: &dyn ObjectStore,
        jobs: &[(String, String)],
        batch_size: usize,
    ) -> (usize, usize) {
        let mut restored = 0;
        let mut failed = 0;
        for batch in jobs.chunks(batch_size.max(1)) {
            let results = join_all(
                batch
                    .iter()
                    .map(|(key, path)| self.restore_object(store, key, path)),
            )
            .await;
            for result in results {
                match result {
                    Ok(()) => {
                        restored += 1;
                        metrics::counter!("state_sync_files_total", "direction" => "restore", "outcome" => "ok").increment(1);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping file");
                        failed += 1;
                        metrics::counter!("state_sync_files_total", "direction" => "restore", "outcome" => "error").increment(1);
                    }
                }
            }
        }
        (restored, failed)
    }

    async fn restore_object(&self, store: &dyn ObjectStore, key: &str, path: &str) -> Result<()> {
        if let Some(parent) = parent_path(path) {
            self.sandbox
                .mkdir(parent, true)
                .await
                .map_err(|e| Error::partial_file(path, e))?;
        }
        let object = store
            .get(key)
            .await
            .map_err(|e| Error::partial_file(path, e))?
            .ok_or_else(|| Error::partial_file(path, format!("object {} disappeared", key)))?;
        self.sandbox
            .write_file(path, &object.body)
            .await
            .map_err(|e| Error::partial_file(path, e))
    }
}
