//! Pending changes: the offline mutation log.

use driftdb_core::{generate_id, Record};
use driftdb_storage::StoredRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingChangeType {
    /// The record was created locally.
    Inserted,
    /// The record was modified locally.
    Updated,
    /// The record was deleted locally.
    Removed,
    /// The local changes cancelled out.
    Noop,
}

impl PendingChangeType {
    /// Returns the wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Removed => "removed",
            Self::Noop => "noop",
        }
    }
}

impl fmt::Display for PendingChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local mutation waiting to be pushed.
///
/// At most one pending change exists per record id and collection; later
/// mutations are folded into it with [`crate::coalesce`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Identifier of this log entry (not the record id).
    pub id: String,
    /// Owning collection.
    pub name: String,
    /// Kind of change.
    #[serde(rename = "type")]
    pub change_type: PendingChangeType,
    /// Latest record value.
    pub data: Record,
    /// Epoch milliseconds of the latest mutation.
    pub time: i64,
}

impl PendingChange {
    /// Creates a pending change with a fresh entry id.
    pub fn new(
        name: impl Into<String>,
        change_type: PendingChangeType,
        data: Record,
        time: i64,
    ) -> Self {
        Self {
            id: generate_id(),
            name: name.into(),
            change_type,
            data,
            time,
        }
    }

    /// Id of the record this change is about.
    pub fn target_id(&self) -> &str {
        &self.data.id
    }

    /// Returns true if this change has cancelled out.
    pub fn is_noop(&self) -> bool {
        self.change_type == PendingChangeType::Noop
    }

    /// Writes a coalesced result back onto this entry.
    ///
    /// Keeps the entry id and takes the later of the two times.
    pub fn apply_coalesced(&mut self, coalesced: Coalesced, time: i64) {
        self.change_type = coalesced.change_type;
        self.data = coalesced.data;
        self.time = self.time.max(time);
    }
}

impl StoredRecord for PendingChange {
    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Result of folding two pending changes together.
#[derive(Debug, Clone, PartialEq)]
pub struct Coalesced {
    /// Resulting kind.
    pub change_type: PendingChangeType,
    /// Resulting record value.
    pub data: Record,
}

impl Coalesced {
    /// Returns true if the changes cancelled out.
    pub fn is_noop(&self) -> bool {
        self.change_type == PendingChangeType::Noop
    }
}
