//! Error types for DriftDB core.

use crate::query::QueryError;
use driftdb_storage::StorageError;
use std::sync::Arc;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in DriftDB core operations.
///
/// Collection operations never return these to the caller directly; they are
/// delivered through the `persistence.error` event instead, so the type is
/// cheap to clone.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Persistence adapter error.
    #[error("storage error: {0}")]
    Storage(#[source] Arc<StorageError>),

    /// The input does not form a valid record of the collection's type.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the problem.
        message: String,
    },

    /// No record with the given id exists.
    #[error("record {id} not found in collection {entity}")]
    NotFound {
        /// Collection that was searched.
        entity: String,
        /// The missing record id.
        id: String,
    },

    /// A query could not be parsed or evaluated.
    #[error("query error: {0}")]
    Query(#[from] QueryError),
}

impl CoreError {
    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        Self::Storage(Arc::new(err))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_record(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::not_found("widgets", "w-1");
        assert_eq!(err.to_string(), "record w-1 not found in collection widgets");

        let err = CoreError::invalid_record("expected an object");
        assert_eq!(err.to_string(), "invalid record: expected an object");
    }

    #[test]
    fn storage_errors_convert() {
        let err: CoreError = StorageError::Unavailable("down".into()).into();
        assert!(matches!(err, CoreError::Storage(_)));
        assert_eq!(err.clone().to_string(), "storage error: storage unavailable: down");
    }
}
