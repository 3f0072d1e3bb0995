//! Atomic batches of record changes.

use serde::{Deserialize, Serialize};

/// A record that can live in a persistence adapter.
///
/// Records are keyed by a string id that never changes once assigned.
pub trait StoredRecord: Serialize + serde::de::DeserializeOwned + Clone + Send + Sync + 'static {
    /// Returns the primary key of this record.
    fn record_id(&self) -> &str;
}

/// A unit of change applied atomically to storage.
///
/// # Invariants
///
/// - An id appears in at most one of the three lists
/// - `added` records must not already exist in the target store
/// - `modified` records are upserted by id
/// - `removed` records are deleted by id (absent ids are ignored)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Changeset<T> {
    /// Newly created records.
    #[serde(default)]
    pub added: Vec<T>,
    /// Records that replace an existing version.
    #[serde(default)]
    pub modified: Vec<T>,
    /// Records (pre-removal values) to delete.
    #[serde(default)]
    pub removed: Vec<T>,
}

impl<T> Changeset<T> {
    /// Creates an empty changeset.
    pub fn new() -> Self {
        Self {
            added: Vec::new(),
            modified: Vec::new(),
            removed: Vec::new(),
        }
    }

    /// Creates a changeset holding a single added record.
    pub fn added(record: T) -> Self {
        Self {
            added: vec![record],
            ..Self::new()
        }
    }

    /// Creates a changeset holding a single modified record.
    pub fn modified(record: T) -> Self {
        Self {
            modified: vec![record],
            ..Self::new()
        }
    }

    /// Creates a changeset holding a single removed record.
    pub fn removed(record: T) -> Self {
        Self {
            removed: vec![record],
            ..Self::new()
        }
    }

    /// Returns true if all three lists are empty.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Returns the total number of records across all lists.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// Converts every record with a fallible mapping, preserving list placement.
    pub fn try_map<U, E>(self, mut f: impl FnMut(T) -> Result<U, E>) -> Result<Changeset<U>, E> {
        Ok(Changeset {
            added: self.added.into_iter().map(&mut f).collect::<Result<_, _>>()?,
            modified: self.modified.into_iter().map(&mut f).collect::<Result<_, _>>()?,
            removed: self.removed.into_iter().map(&mut f).collect::<Result<_, _>>()?,
        })
    }
}

impl<T: StoredRecord> Changeset<T> {
    /// Returns true if the record id occurs anywhere in this changeset.
    pub fn contains_id(&self, id: &str) -> bool {
        self.added
            .iter()
            .chain(&self.modified)
            .chain(&self.removed)
            .any(|r| r.record_id() == id)
    }
}

impl<T> Default for Changeset<T> {
    fn default() -> Self {
        Self::new()
    }
}
