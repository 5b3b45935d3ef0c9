//! Sandbox backend contract.
//!
//! This module provides the `SandboxBackend` trait that the supervisor and the
//! sync engine talk to, plus `ProcessHandle`, a transient reference to one
//! listed process that carries its backend along with it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gatewarden_core::{PortCheck, ProcessId, ProcessInfo, ProcessLogs, ProcessStatus, Result};

// =============================================================================
// Filesystem Types
// =============================================================================

/// Options for `SandboxBackend::list_files`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ListFilesOptions {
    pub recursive: bool,
    pub include_hidden: bool,
}

impl Default for ListFilesOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            include_hidden: true,
        }
    }
}

/// A regular file found under a listing root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Absolute path inside the sandbox.
    pub path: String,
    /// Path relative to the listing root, `/`-separated.
    pub relative: String,
}

impl FileEntry {
    /// Build an entry from a listing root and an absolute path below it.
    pub fn under(root: &str, path: &str) -> Self {
        let root = root.trim_end_matches('/');
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .trim_start_matches('/')
            .to_string();
        Self {
            path: path.to_string(),
            relative,
        }
    }
}

// =============================================================================
// Sandbox Backend Trait
// =============================================================================

/// Operations the supervisor needs from the environment hosting the gateway.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Launch a long-lived background process.
    async fn start_process(
        &self,
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<ProcessInfo>;

    /// List every process the sandbox knows about.
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>>;

    /// Terminate a process.
    async fn kill_process(&self, id: &ProcessId) -> Result<()>;

    /// Wait until `port` answers, or fail with `Error::Timeout`.
    async fn wait_for_port(
        &self,
        id: &ProcessId,
        port: u16,
        check: &PortCheck,
        timeout: Duration,
    ) -> Result<()>;

    /// Fetch captured stdout/stderr of a process.
    async fn process_logs(&self, id: &ProcessId) -> Result<ProcessLogs>;

    async fn exists(&self, path: &str) -> Result<bool>;

    async fn list_files(&self, path: &str, options: ListFilesOptions) -> Result<Vec<FileEntry>>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()>;

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<()>;

    /// Check if the sandbox backend is reachable.
    async fn is_available(&self) -> bool;
}

// =============================================================================
// Process Handle
// =============================================================================

/// A listed process plus the backend that owns it.
///
/// The handle is only a reference: the backend remains the source of truth and
/// the recorded status may be stale by the time it is read.
#[derive(Clone)]
pub struct ProcessHandle {
    info: ProcessInfo,
    backend: Arc<dyn SandboxBackend>,
}

impl ProcessHandle {
    pub fn new(info: ProcessInfo, backend: Arc<dyn SandboxBackend>) -> Self {
        Self { info, backend }
    }

    pub fn id(&self) -> &ProcessId {
        &self.info.id
    }

    pub fn command(&self) -> &str {
        &self.info.command
    }

    pub fn status(&self) -> ProcessStatus {
        self.info.status
    }

    pub fn info(&self) -> &ProcessInfo {
        &self.info
    }

    /// Record that the process answered on its port.
    pub fn mark_running(&mut self) {
        self.info.status = ProcessStatus::Running;
    }

    pub async fn kill(&self) -> Result<()> {
        self.backend.kill_process(&self.info.id).await
    }

    pub async fn wait_for_port(&self, port: u16, check: &PortCheck, timeout: Duration) -> Result<()> {
        self.backend
            .wait_for_port(&self.info.id, port, check, timeout)
            .await
    }

    pub async fn logs(&self) -> Result<ProcessLogs> {
        self.backend.process_logs(&self.info.id).await
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}
