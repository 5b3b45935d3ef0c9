//! Error types for Gatewarden.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using Gatewarden's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Gatewarden.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Supervision Errors
    // =========================================================================
    #[error("Process listing failed: {0}")]
    TransientList(String),

    #[error("Gateway start throttled: last attempt {elapsed_ms}ms ago (window {window_ms}ms)")]
    ThrottledStart { elapsed_ms: u64, window_ms: u64 },

    #[error("Gateway failed to start: {message}")]
    StartupTimeout {
        message: String,
        stderr: Option<String>,
    },

    #[error("Gateway restart limit reached after {0} consecutive failed starts")]
    RestartLimitReached(u32),

    // =========================================================================
    // Sync Errors
    // =========================================================================
    #[error("No config found: {0}")]
    ConfigurationMissing(String),

    #[error("Object storage is not configured")]
    StorageUnavailable,

    #[error("File transfer failed for {path}: {reason}")]
    PartialFile { path: String, reason: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// An error observed by several callers of one shared attempt.
    #[error(transparent)]
    Shared(Arc<Error>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a transient process listing error.
    pub fn transient_list(msg: impl Into<String>) -> Self {
        Self::TransientList(msg.into())
    }

    /// Create a sandbox backend error.
    pub fn sandbox(msg: impl Into<String>) -> Self {
        Self::Sandbox(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a per-file transfer error.
    pub fn partial_file(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::PartialFile {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// The underlying error, looking through any `Shared` wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Self::Shared(inner) => inner.root(),
            other => other,
        }
    }

    /// Whether this is a start-throttle rejection.
    pub fn is_throttled(&self) -> bool {
        matches!(self.root(), Self::ThrottledStart { .. })
    }

    /// Whether the gateway was started but never became reachable.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self.root(),
            Self::StartupTimeout { .. } | Self::RestartLimitReached(_)
        )
    }

    /// Whether a caller can reasonably retry the same operation shortly.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            Self::TransientList(_)
                | Self::ThrottledStart { .. }
                | Self::StartupTimeout { .. }
                | Self::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unwraps_shared() {
        let inner = Arc::new(Error::ThrottledStart {
            elapsed_ms: 1_000,
            window_ms: 30_000,
        });
        let outer = Error::Shared(Arc::new(Error::Shared(inner)));

        assert!(outer.is_throttled());
        assert!(outer.is_retryable());
        assert!(!outer.is_startup_failure());
        assert_eq!(
            outer.to_string(),
            "Gateway start throttled: last attempt 1000ms ago (window 30000ms)"
        );
    }

    #[test]
    fn test_restart_limit_not_retryable() {
        let err = Error::RestartLimitReached(3);
        assert!(err.is_startup_failure());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_partial_file_message() {
        let err = Error::partial_file("/root/clawd/a.md", "permission denied");
        assert_eq!(
            err.to_string(),
            "File transfer failed for /root/clawd/a.md: permission denied"
        );
    }
}
