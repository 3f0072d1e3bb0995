//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// An `added` record collided with an existing id.
    #[error("duplicate key '{id}' in store '{store}'")]
    DuplicateKey {
        /// Store the batch was written to.
        store: String,
        /// The colliding record id.
        id: String,
    },

    /// A unique secondary index would hold the same key twice.
    #[error("unique index '{index}' violated in store '{store}' for key {key}")]
    UniqueViolation {
        /// Store the batch was written to.
        store: String,
        /// Name of the violated index.
        index: String,
        /// The duplicated key, rendered as JSON.
        key: String,
    },

    /// A lookup referenced an index that was never declared.
    #[error("unknown index '{index}' on store '{store}'")]
    UnknownIndex {
        /// Store that was queried.
        store: String,
        /// The requested index name.
        index: String,
    },

    /// Another process holds the store's lock file.
    #[error("store locked: another process has exclusive access to {}", path.display())]
    Locked {
        /// Path of the lock file.
        path: PathBuf,
    },

    /// The store cannot serve requests right now.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Creates a codec error from any displayable cause.
    pub fn codec(cause: impl std::fmt::Display) -> Self {
        Self::Codec(cause.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::codec(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StorageError::DuplicateKey {
            store: "widgets".into(),
            id: "w-1".into(),
        };
        assert_eq!(err.to_string(), "duplicate key 'w-1' in store 'widgets'");

        let err = StorageError::UnknownIndex {
            store: "widgets".into(),
            index: "color".into(),
        };
        assert!(err.to_string().contains("color"));
    }

    #[test]
    fn json_errors_become_codec_errors() {
        let err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        assert!(matches!(StorageError::from(err), StorageError::Codec(_)));
    }
}
