//! In-memory persistence adapter for testing.

use crate::adapter::PersistenceAdapter;
use crate::changeset::{Changeset, StoredRecord};
use crate::error::{StorageError, StorageResult};
use crate::index::IndexDescriptor;
use crate::table::Table;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory persistence adapter.
///
/// This adapter keeps all records in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral collections that don't need persistence
///
/// Fault injection via [`set_failing`](Self::set_failing) makes every
/// operation return [`StorageError::Unavailable`].
///
/// # Thread Safety
///
/// This adapter is thread-safe and can be shared across tasks.
///
/// # Example
///
/// ```rust,ignore
/// use driftdb_storage::{Changeset, InMemoryAdapter, PersistenceAdapter};
///
/// let store = InMemoryAdapter::new("widgets");
/// store.save(&Changeset::added(widget)).await?;
/// assert_eq!(store.get_all().await?.len(), 1);
/// ```
#[derive(Debug)]
pub struct InMemoryAdapter<T> {
    name: String,
    indexes: Vec<IndexDescriptor>,
    table: RwLock<Table<T>>,
    failing: AtomicBool,
}

impl<T: StoredRecord> InMemoryAdapter<T> {
    /// Creates an empty store without secondary indexes.
    #[must_use]
    pub fn new(store_name: impl Into<String>) -> Self {
        Self::with_indexes(store_name, Vec::new())
    }

    /// Creates an empty store with the given secondary indexes.
    #[must_use]
    pub fn with_indexes(store_name: impl Into<String>, indexes: Vec<IndexDescriptor>) -> Self {
        let name = store_name.into();
        Self {
            table: RwLock::new(Table::new(&name, indexes.clone())),
            indexes,
            name,
            failing: AtomicBool::new(false),
        }
    }

    /// Toggles fault injection.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns the number of stored records, ignoring fault injection.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Returns true if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!(
                "store '{}' is failing",
                self.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<T: StoredRecord> PersistenceAdapter<T> for InMemoryAdapter<T> {
    fn store_name(&self) -> &str {
        &self.name
    }

    fn indexes(&self) -> &[IndexDescriptor] {
        &self.indexes
    }

    async fn get_all(&self) -> StorageResult<Vec<T>> {
        self.check()?;
        Ok(self.table.read().all())
    }

    async fn get_one(&self, id: &str) -> StorageResult<Option<T>> {
        self.check()?;
        Ok(self.table.read().get(id))
    }

    async fn get_by_index(&self, index: &str, key: &Value) -> StorageResult<Vec<T>> {
        self.check()?;
        self.table.read().by_index(index, key)
    }

    async fn save(&self, changeset: &Changeset<T>) -> StorageResult<()> {
        self.check()?;
        let mut table = self.table.write();
        let mut next = table.clone();
        next.apply(changeset)?;
        *table = next;
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        self.check()?;
        self.table.write().clear();
        Ok(())
    }
}
