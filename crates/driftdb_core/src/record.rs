//! Record model.

use crate::timestamp;
use driftdb_storage::StoredRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Wire name of the record id field.
pub const ID_FIELD: &str = "id";
/// Wire name of the creation timestamp field.
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Wire name of the last-update timestamp field.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Generates a new record id (UUID v4).
///
/// Ids are:
/// - Globally unique
/// - Immutable once assigned
/// - Never reused
#[must_use]
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// A record type a [`crate::Collection`] can hold.
///
/// Implementors serialize with camelCase base fields (`id`, `name`,
/// `createdAt`, `updatedAt`) so partial updates and sync can address them by
/// wire name.
pub trait Document: StoredRecord + fmt::Debug {
    /// Creation timestamp, if set.
    fn created_at(&self) -> Option<&str>;

    /// Last-update timestamp, if set.
    fn updated_at(&self) -> Option<&str>;

    /// Last-update time as epoch milliseconds (`0` when unknown).
    fn updated_at_millis(&self) -> i64 {
        timestamp::parse_millis(self.updated_at())
    }
}

/// A dynamic record: base fields plus an open set of entity fields.
///
/// # Example
///
/// ```rust
/// use driftdb_core::Record;
/// use serde_json::json;
///
/// let record = Record::new("w-1").with_name("Widget").with_field("color", json!("red"));
/// assert_eq!(record.field("color"), Some(&json!("red")));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique id, assigned on insert.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Creation timestamp (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Last-update timestamp (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Entity fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Creates a record with the given id and no other fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets an entity field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Sets the last-update timestamp from epoch milliseconds.
    #[must_use]
    pub fn with_updated_at_millis(mut self, millis: i64) -> Self {
        self.updated_at = Some(timestamp::format_millis(millis));
        self
    }

    /// Returns an entity field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Converts any serializable record into a `Record`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not serialize to an object with an
    /// `id`.
    pub fn from_document<T: Serialize>(doc: &T) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::to_value(doc)?)
    }

    /// Converts this record into another record type.
    ///
    /// # Errors
    ///
    /// Returns an error if the fields do not form a valid `T`.
    pub fn into_document<T: serde::de::DeserializeOwned>(self) -> serde_json::Result<T> {
        serde_json::from_value(serde_json::to_value(self)?)
    }
}

impl StoredRecord for Record {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Document for Record {
    fn created_at(&self) -> Option<&str> {
        self.created_at.as_deref()
    }

    fn updated_at(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }
}

/// Shallow merge: every top-level field of `patch` overwrites `base`.
pub fn merge_fields(base: &mut Map<String, Value>, patch: Map<String, Value>) {
    base.extend(patch);
}
