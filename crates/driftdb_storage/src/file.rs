//! File-based persistence adapter.

use crate::adapter::PersistenceAdapter;
use crate::changeset::{Changeset, StoredRecord};
use crate::error::{StorageError, StorageResult};
use crate::index::IndexDescriptor;
use crate::table::Table;
use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const FORMAT_VERSION: u32 = 1;

/// On-disk layout of one store.
#[derive(Serialize, Deserialize)]
struct StoreFile<T> {
    version: u32,
    /// Records in insertion order.
    records: Vec<T>,
}

/// A file-backed persistence adapter.
///
/// Each store lives in `<dir>/<store>.cbor`, encoded with CBOR. Every
/// successful `save` rewrites the file through a temporary sibling and an
/// atomic rename, so a batch is all-or-nothing on disk.
///
/// # Locking
///
/// The adapter holds an exclusive lock on `<dir>/<store>.lock` for its whole
/// lifetime. A second open of the same store fails with
/// [`StorageError::Locked`] until the first adapter is dropped.
///
/// # Example
///
/// ```rust,ignore
/// use driftdb_storage::{FileAdapter, IndexDescriptor};
///
/// let store = FileAdapter::open("./data", "widgets", vec![IndexDescriptor::new("createdAt")])?;
/// store.save(&Changeset::added(widget)).await?;
/// ```
#[derive(Debug)]
pub struct FileAdapter<T> {
    name: String,
    path: PathBuf,
    indexes: Vec<IndexDescriptor>,
    table: RwLock<Table<T>>,
    /// Serializes writers so the file always matches the in-memory table.
    write_gate: tokio::sync::Mutex<()>,
    _lock_file: File,
}

impl<T: StoredRecord> FileAdapter<T> {
    /// Opens or creates a store inside `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory or lock file cannot be created
    /// - Another adapter holds the store lock
    /// - The existing store file cannot be decoded
    pub fn open(
        dir: impl AsRef<Path>,
        store_name: impl Into<String>,
        indexes: Vec<IndexDescriptor>,
    ) -> StorageResult<Self> {
        let dir = dir.as_ref();
        let name = store_name.into();
        std::fs::create_dir_all(dir)?;

        let lock_path = dir.join(format!("{name}.lock"));
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked { path: lock_path });
        }

        let path = dir.join(format!("{name}.cbor"));
        let table = if path.exists() {
            let file = File::open(&path)?;
            let stored: StoreFile<T> =
                ciborium::from_reader(std::io::BufReader::new(file)).map_err(StorageError::codec)?;
            if stored.version != FORMAT_VERSION {
                return Err(StorageError::Codec(format!(
                    "unsupported store format version {}",
                    stored.version
                )));
            }
            tracing::debug!(store = %name, records = stored.records.len(), "loaded store");
            Table::from_records(&name, indexes.clone(), stored.records)?
        } else {
            Table::new(&name, indexes.clone())
        };

        Ok(Self {
            name,
            path,
            indexes,
            table: RwLock::new(table),
            write_gate: tokio::sync::Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the path of the store file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn commit(&self, next: Table<T>) -> StorageResult<()> {
        let contents = StoreFile {
            version: FORMAT_VERSION,
            records: next.in_insertion_order(),
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&contents, &mut bytes).map_err(StorageError::codec)?;

        let tmp = self.path.with_extension("cbor.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;

        *self.table.write() = next;
        Ok(())
    }
}

#[async_trait]
impl<T: StoredRecord> PersistenceAdapter<T> for FileAdapter<T> {
    fn store_name(&self) -> &str {
        &self.name
    }

    fn indexes(&self) -> &[IndexDescriptor] {
        &self.indexes
    }

    async fn get_all(&self) -> StorageResult<Vec<T>> {
        Ok(self.table.read().all())
    }

    async fn get_one(&self, id: &str) -> StorageResult<Option<T>> {
        Ok(self.table.read().get(id))
    }

    async fn get_by_index(&self, index: &str, key: &Value) -> StorageResult<Vec<T>> {
        self.table.read().by_index(index, key)
    }

    async fn save(&self, changeset: &Changeset<T>) -> StorageResult<()> {
        let _gate = self.write_gate.lock().await;
        let next = {
            let mut next = self.table.read().clone();
            next.apply(changeset)?;
            next
        };
        self.commit(next).await
    }

    async fn clear(&self) -> StorageResult<()> {
        let _gate = self.write_gate.lock().await;
        let mut next = self.table.read().clone();
        next.clear();
        self.commit(next).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    impl StoredRecord for Note {
        fn record_id(&self) -> &str {
            &self.id
        }
    }

    fn note(id: &str, body: &str) -> Note {
        Note {
            id: id.into(),
            body: body.into(),
        }
    }

    #[tokio::test]
    async fn file_create_new() {
        let dir = tempdir().unwrap();
        let store: FileAdapter<Note> = FileAdapter::open(dir.path(), "notes", Vec::new()).unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
        assert!(dir.path().join("notes.lock").exists());
    }

    #[tokio::test]
    async fn file_persistence() {
        let dir = tempdir().unwrap();

        {
            let store = FileAdapter::open(dir.path(), "notes", Vec::new()).unwrap();
            store
                .save(&Changeset {
                    added: vec![note("b", "second"), note("a", "first")],
                    ..Changeset::new()
                })
                .await
                .unwrap();
            store.save(&Changeset::modified(note("b", "edited"))).await.unwrap();
        }

        {
            let store: FileAdapter<Note> =
                FileAdapter::open(dir.path(), "notes", Vec::new()).unwrap();
            let all = store.get_all().await.unwrap();
            assert_eq!(all, vec![note("b", "edited"), note("a", "first")]);
        }
    }

    #[tokio::test]
    async fn failed_batch_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let store = FileAdapter::open(dir.path(), "notes", Vec::new()).unwrap();
        store.save(&Changeset::added(note("a", "first"))).await.unwrap();
        let before = std::fs::read(store.path()).unwrap();

        let batch = Changeset {
            added: vec![note("a", "dup")],
            removed: vec![note("zzz", "")],
            ..Changeset::new()
        };
        assert!(matches!(
            store.save(&batch).await,
            Err(StorageError::DuplicateKey { .. })
        ));
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
        assert_eq!(store.get_one("a").await.unwrap().unwrap().body, "first");
    }

    #[tokio::test]
    async fn lock_prevents_second_open() {
        let dir = tempdir().unwrap();
        let _first: FileAdapter<Note> = FileAdapter::open(dir.path(), "notes", Vec::new()).unwrap();
        let second = FileAdapter::<Note>::open(dir.path(), "notes", Vec::new());
        assert!(matches!(second, Err(StorageError::Locked { .. })));
    }

    #[tokio::test]
    async fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        drop(FileAdapter::<Note>::open(dir.path(), "notes", Vec::new()).unwrap());
        assert!(FileAdapter::<Note>::open(dir.path(), "notes", Vec::new()).is_ok());
    }

    #[tokio::test]
    async fn clear_persists() {
        let dir = tempdir().unwrap();
        {
            let store = FileAdapter::open(dir.path(), "notes", Vec::new()).unwrap();
            store.save(&Changeset::added(note("a", "first"))).await.unwrap();
            store.clear().await.unwrap();
        }
        let store: FileAdapter<Note> = FileAdapter::open(dir.path(), "notes", Vec::new()).unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn creates_missing_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("stores");
        let store: FileAdapter<Note> = FileAdapter::open(&nested, "notes", Vec::new()).unwrap();
        store.save(&Changeset::added(note("a", "x"))).await.unwrap();
        assert!(nested.join("notes.cbor").exists());
    }
}
