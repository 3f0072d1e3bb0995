//! The shared pending-change and snapshot stores.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use driftdb_storage::{FileAdapter, InMemoryAdapter, IndexDescriptor, PersistenceAdapter};
use driftdb_sync_protocol::{PendingChange, Snapshot};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Index of both stores on the owning collection's name.
pub const NAME_INDEX: &str = "name";

/// Index of the pending-change store on the changed record's id.
pub const RECORD_ID_INDEX: &str = "data.id";

/// Durable state of the sync manager.
///
/// Both stores are shared by every registered collection and partitioned
/// by the `name` field of their entries.
#[derive(Clone)]
pub struct SyncStores {
    /// Pending-change log (`<prefix>-changes`).
    pub changes: Arc<dyn PersistenceAdapter<PendingChange>>,
    /// Sync cursors (`<prefix>-snapshots`), one per collection.
    pub snapshots: Arc<dyn PersistenceAdapter<Snapshot>>,
}

impl SyncStores {
    /// Wraps two existing adapters.
    pub fn new(
        changes: Arc<dyn PersistenceAdapter<PendingChange>>,
        snapshots: Arc<dyn PersistenceAdapter<Snapshot>>,
    ) -> Self {
        Self { changes, snapshots }
    }

    /// Indexes the pending-change store needs.
    pub fn change_indexes() -> Vec<IndexDescriptor> {
        vec![
            IndexDescriptor::new(NAME_INDEX),
            IndexDescriptor::new(RECORD_ID_INDEX),
        ]
    }

    /// Indexes the snapshot store needs.
    pub fn snapshot_indexes() -> Vec<IndexDescriptor> {
        vec![IndexDescriptor::unique(NAME_INDEX)]
    }

    /// Creates both stores in memory.
    pub fn in_memory(config: &SyncConfig) -> Self {
        Self::new(
            Arc::new(InMemoryAdapter::with_indexes(
                config.changes_store(),
                Self::change_indexes(),
            )),
            Arc::new(InMemoryAdapter::with_indexes(
                config.snapshots_store(),
                Self::snapshot_indexes(),
            )),
        )
    }

    /// Opens both stores as files under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if either store cannot be opened or is locked by
    /// another process.
    pub fn open_dir(dir: impl AsRef<Path>, config: &SyncConfig) -> SyncResult<Self> {
        let dir = dir.as_ref();
        let changes = FileAdapter::open(dir, config.changes_store(), Self::change_indexes())?;
        let snapshots =
            FileAdapter::open(dir, config.snapshots_store(), Self::snapshot_indexes())?;
        Ok(Self::new(Arc::new(changes), Arc::new(snapshots)))
    }

    /// Every pending change of one collection.
    pub(crate) async fn pending_for(&self, name: &str) -> SyncResult<Vec<PendingChange>> {
        let key = Value::String(name.to_string());
        Ok(self.changes.get_by_index(NAME_INDEX, &key).await?)
    }

    /// The pending change of one record, if any.
    pub(crate) async fn pending_entry(
        &self,
        name: &str,
        record_id: &str,
    ) -> SyncResult<Option<PendingChange>> {
        let key = Value::String(record_id.to_string());
        let entries = self.changes.get_by_index(RECORD_ID_INDEX, &key).await?;
        Ok(entries.into_iter().find(|change| change.name == name))
    }

    /// The snapshot of one collection, if any.
    pub(crate) async fn snapshot_for(&self, name: &str) -> SyncResult<Option<Snapshot>> {
        let key = Value::String(name.to_string());
        let found = self.snapshots.get_by_index(NAME_INDEX, &key).await?;
        Ok(found.into_iter().next())
    }
}

impl fmt::Debug for SyncStores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncStores")
            .field("changes", &self.changes.store_name())
            .field("snapshots", &self.snapshots.store_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftdb_core::Record;
    use driftdb_storage::Changeset;
    use driftdb_sync_protocol::PendingChangeType;
    use tempfile::TempDir;

    fn change(name: &str, id: &str) -> PendingChange {
        PendingChange::new(name, PendingChangeType::Updated, Record::new(id), 1)
    }

    #[tokio::test]
    async fn lookups_are_partitioned_by_collection() {
        let stores = SyncStores::in_memory(&SyncConfig::default());
        stores
            .changes
            .save(&Changeset {
                added: vec![change("widgets", "a"), change("widgets", "b"), change("gadgets", "a")],
                modified: vec![],
                removed: vec![],
            })
            .await
            .unwrap();

        assert_eq!(stores.pending_for("widgets").await.unwrap().len(), 2);
        assert_eq!(stores.pending_for("gadgets").await.unwrap().len(), 1);

        let entry = stores.pending_entry("gadgets", "a").await.unwrap().unwrap();
        assert_eq!(entry.name, "gadgets");
        assert!(stores.pending_entry("gadgets", "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn one_snapshot_per_collection() {
        let stores = SyncStores::in_memory(&SyncConfig::default());
        stores
            .snapshots
            .save(&Changeset::added(Snapshot::new("widgets", 5)))
            .await
            .unwrap();
        assert_eq!(stores.snapshot_for("widgets").await.unwrap().unwrap().last_sync, 5);
        assert!(stores.snapshot_for("gadgets").await.unwrap().is_none());

        let duplicate = stores
            .snapshots
            .save(&Changeset::added(Snapshot::new("widgets", 9)))
            .await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn file_stores_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let config = SyncConfig::default();
        {
            let stores = SyncStores::open_dir(dir.path(), &config).unwrap();
            stores
                .changes
                .save(&Changeset::added(change("widgets", "a")))
                .await
                .unwrap();
        }
        let stores = SyncStores::open_dir(dir.path(), &config).unwrap();
        assert_eq!(stores.pending_for("widgets").await.unwrap().len(), 1);
        assert_eq!(stores.changes.store_name(), "sync-manager-changes");
    }
}
