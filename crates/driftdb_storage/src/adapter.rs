//! Persistence adapter trait definition.

use crate::changeset::{Changeset, StoredRecord};
use crate::error::StorageResult;
use crate::index::IndexDescriptor;
use async_trait::async_trait;
use serde_json::Value;

/// A durable key-value store of typed records.
///
/// Each adapter serves one named store. Records are keyed by
/// [`StoredRecord::record_id`] and may carry secondary indexes.
///
/// # Invariants
///
/// - `save` applies the whole changeset or nothing
/// - `get_all` is ordered by the first declared index, then insertion order
/// - Adapters must be `Send + Sync` for sharing across tasks
///
/// # Implementors
///
/// - [`super::InMemoryAdapter`] - For tests and ephemeral stores
/// - [`super::FileAdapter`] - For persistent stores on local disk
#[async_trait]
pub trait PersistenceAdapter<T: StoredRecord>: Send + Sync {
    /// Returns the name of the store this adapter serves.
    fn store_name(&self) -> &str;

    /// Returns the declared secondary indexes.
    fn indexes(&self) -> &[IndexDescriptor];

    /// Returns every record in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn get_all(&self) -> StorageResult<Vec<T>>;

    /// Returns the record with the given id, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn get_one(&self, id: &str) -> StorageResult<Option<T>>;

    /// Returns the records whose indexed field equals `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::UnknownIndex`] if no index has that name.
    async fn get_by_index(&self, index: &str, key: &Value) -> StorageResult<Vec<T>>;

    /// Applies a changeset as a single atomic batch.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the store unchanged, if an added id already
    /// exists, a unique index would be violated, or the write fails.
    async fn save(&self, changeset: &Changeset<T>) -> StorageResult<()>;

    /// Removes every record from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn clear(&self) -> StorageResult<()>;
}
