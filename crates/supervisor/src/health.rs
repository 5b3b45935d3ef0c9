//! Gateway status for a status endpoint or CLI.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use gatewarden_core::{Error, ProcessId, ProcessStatus};

use crate::classify::triage;
use crate::directory::DirectoryHealth;
use crate::supervisor::GatewaySupervisor;

/// Observable state of the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GatewayStatus {
    Running { process_id: ProcessId },
    /// A start attempt is in flight, or the canonical process has not answered yet.
    Starting,
    NotStarted,
    ListingFailed { error: String, at: DateTime<Utc> },
}

/// User-facing reason a request could not reach the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DegradedReason {
    ServiceStarting,
    ServiceFailedToStart { hint: String },
    ListingUnavailable,
    Unavailable { message: String },
}

impl DegradedReason {
    pub fn from_error(error: &Error) -> Self {
        match error.root() {
            Error::ThrottledStart { .. } | Error::Timeout(_) => Self::ServiceStarting,
            Error::StartupTimeout { stderr, .. } => Self::ServiceFailedToStart {
                hint: match stderr {
                    Some(stderr) => last_line(stderr),
                    None => "check the gateway logs for details".to_string(),
                },
            },
            Error::RestartLimitReached(n) => Self::ServiceFailedToStart {
                hint: format!("{} consecutive starts failed; restarts are paused", n),
            },
            Error::TransientList(_) => Self::ListingUnavailable,
            other => Self::Unavailable {
                message: other.to_string(),
            },
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::ServiceStarting => "service starting",
            Self::ServiceFailedToStart { .. } => "service failed to start",
            Self::ListingUnavailable => "sandbox listing unavailable",
            Self::Unavailable { .. } => "service unavailable",
        }
    }

    /// Whether a client retrying later may succeed without intervention.
    pub fn retryable(&self) -> bool {
        !matches!(self, Self::Unavailable { .. })
    }
}

fn last_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}

pub struct HealthReporter {
    supervisor: Arc<GatewaySupervisor>,
}

impl HealthReporter {
    pub fn new(supervisor: Arc<GatewaySupervisor>) -> Self {
        Self { supervisor }
    }

    pub async fn status(&self) -> GatewayStatus {
        if self.supervisor.start_in_flight() {
            return GatewayStatus::Starting;
        }

        let snapshot = match self.supervisor.directory().refresh().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return GatewayStatus::ListingFailed {
                    error: e.root().to_string(),
                    at: self.health().last_error_at.unwrap_or_else(Utc::now),
                }
            }
        };

        match triage(&snapshot.processes, &self.supervisor.config().patterns).canonical {
            Some(info) if info.status == ProcessStatus::Running => GatewayStatus::Running {
                process_id: info.id,
            },
            Some(_) => GatewayStatus::Starting,
            None => GatewayStatus::NotStarted,
        }
    }

    pub fn health(&self) -> DirectoryHealth {
        self.supervisor.health()
    }
}
