//! Error types for the sync engine.

use driftdb_core::CoreError;
use driftdb_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Protocol error (unexpected or missing message).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The pending-change or snapshot store failed.
    #[error("sync storage error: {0}")]
    Storage(#[from] StorageError),

    /// Applying remote changes to a collection failed.
    #[error("failed to apply remote changes: {0}")]
    Apply(#[from] CoreError),

    /// The manager's background worker is gone.
    #[error("sync manager is shut down")]
    ShutDown,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::NotConnected | SyncError::Timeout => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::NotConnected.is_retryable());
        assert!(!SyncError::Protocol("bad".into()).is_retryable());
        assert!(!SyncError::from(StorageError::Unavailable("down".into())).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::NotConnected;
        assert_eq!(err.to_string(), "not connected to server");

        let err = SyncError::transport_fatal("boom");
        assert_eq!(err.to_string(), "transport error: boom");
    }
}
