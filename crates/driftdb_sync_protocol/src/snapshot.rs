//! Sync cursor.

use driftdb_core::generate_id;
use driftdb_storage::StoredRecord;
use serde::{Deserialize, Serialize};

/// Per-collection bookmark of the last completed sync pass.
///
/// The remote is asked for everything that changed since `last_sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Identifier of this entry.
    pub id: String,
    /// Owning collection.
    pub name: String,
    /// Epoch milliseconds the last completed pass started at.
    pub last_sync: i64,
}

impl Snapshot {
    /// Creates a snapshot with a fresh id.
    pub fn new(name: impl Into<String>, last_sync: i64) -> Self {
        Self {
            id: generate_id(),
            name: name.into(),
            last_sync,
        }
    }

    /// Moves the cursor, keeping the entry id.
    #[must_use]
    pub fn advanced_to(mut self, last_sync: i64) -> Self {
        self.last_sync = last_sync;
        self
    }
}

impl StoredRecord for Snapshot {
    fn record_id(&self) -> &str {
        &self.id
    }
}
