//! Collection configuration.

use crate::record::CREATED_AT_FIELD;
use driftdb_storage::IndexDescriptor;
use std::fmt;
use std::sync::Arc;

/// A read-side mapping applied to records handed to public consumers.
pub type Transform<T> = Arc<dyn Fn(T) -> T + Send + Sync>;

/// Configuration for a [`super::Collection`].
///
/// # Example
///
/// ```rust
/// use driftdb_core::{CollectionOptions, Record};
/// use driftdb_storage::IndexDescriptor;
///
/// let options: CollectionOptions<Record> = CollectionOptions::new("widgets")
///     .with_index(IndexDescriptor::new("color"));
/// assert_eq!(options.indexes().len(), 2);
/// ```
pub struct CollectionOptions<T> {
    entity: String,
    indexes: Vec<IndexDescriptor>,
    transform: Option<Transform<T>>,
}

impl<T> CollectionOptions<T> {
    /// Creates options for `entity`, ordered by `createdAt`.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            indexes: vec![IndexDescriptor::new(CREATED_AT_FIELD)],
            transform: None,
        }
    }

    /// Adds a secondary index.
    #[must_use]
    pub fn with_index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    /// Replaces the index list. The first index orders `get_all`.
    #[must_use]
    pub fn with_indexes(mut self, indexes: Vec<IndexDescriptor>) -> Self {
        self.indexes = indexes;
        self
    }

    /// Maps records before they reach `get`, `get_all`, `find` and public
    /// events. Storage and `_debug.*` events see the raw record.
    #[must_use]
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Entity (store) name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Declared indexes.
    pub fn indexes(&self) -> &[IndexDescriptor] {
        &self.indexes
    }

    pub(crate) fn transform(&self) -> Option<&Transform<T>> {
        self.transform.as_ref()
    }
}

impl<T> Clone for CollectionOptions<T> {
    fn clone(&self) -> Self {
        Self {
            entity: self.entity.clone(),
            indexes: self.indexes.clone(),
            transform: self.transform.clone(),
        }
    }
}

impl<T> fmt::Debug for CollectionOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionOptions")
            .field("entity", &self.entity)
            .field("indexes", &self.indexes)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}
