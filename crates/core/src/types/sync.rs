//! Outcomes of state sync operations.
//!
//! Structural failures are reported in these values rather than raised, so a
//! scheduled job or status check can log them without unwinding.

use serde::{Deserialize, Serialize};

/// Result of a sandbox → store sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Timestamp written to the backup marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SyncOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Result of a store → sandbox restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Timestamp read from the backup marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
    pub restored: usize,
    pub failed: usize,
    /// Store keys left for `restore_deferred`.
    pub deferred_keys: Vec<String>,
}

impl RestoreOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Result of restoring previously deferred keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredOutcome {
    pub restored: usize,
    pub failed: usize,
    /// Keys that matched no known prefix.
    pub unmapped: usize,
}
