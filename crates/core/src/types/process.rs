//! Process descriptors reported by the sandbox backend.

use serde::{Deserialize, Serialize};

/// Backend-assigned process identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProcessId(pub String);

impl ProcessId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a listed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Stopped,
    Dead,
}

impl ProcessStatus {
    /// Starting or running.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// One entry of a process listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: ProcessId,
    pub command: String,
    pub status: ProcessStatus,
}

impl ProcessInfo {
    pub fn new(id: impl Into<String>, command: impl Into<String>, status: ProcessStatus) -> Self {
        Self {
            id: ProcessId::new(id),
            command: command.into(),
            status,
        }
    }
}

/// How port readiness is probed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PortCheck {
    /// The port accepts a TCP connection.
    #[default]
    Tcp,
    /// An HTTP GET on `path` answers.
    Http { path: String },
}

/// Captured output of a process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLogs {
    pub stdout: String,
    pub stderr: String,
}
