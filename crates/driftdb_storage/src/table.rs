//! Indexed record table shared by the adapter implementations.

use crate::changeset::{Changeset, StoredRecord};
use crate::error::{StorageError, StorageResult};
use crate::index::{compare_values, value_at_path, values_equal, IndexDescriptor};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Row<T> {
    seq: u64,
    record: T,
    /// One key per declared index, `None` when the record lacks the field.
    keys: Vec<Option<Value>>,
}

/// Records keyed by id, with insertion sequence and precomputed index keys.
///
/// Batches are applied to a clone and swapped in by the caller, which keeps
/// `save` all-or-nothing.
#[derive(Debug, Clone)]
pub(crate) struct Table<T> {
    store: Arc<str>,
    indexes: Arc<[IndexDescriptor]>,
    rows: HashMap<String, Row<T>>,
    next_seq: u64,
}

impl<T: StoredRecord> Table<T> {
    pub(crate) fn new(store: &str, indexes: Vec<IndexDescriptor>) -> Self {
        Self {
            store: Arc::from(store),
            indexes: Arc::from(indexes),
            rows: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Rebuilds a table from records listed in insertion order.
    pub(crate) fn from_records(
        store: &str,
        indexes: Vec<IndexDescriptor>,
        records: Vec<T>,
    ) -> StorageResult<Self> {
        let mut table = Self::new(store, indexes);
        for record in records {
            table.upsert(record)?;
        }
        table.check_unique()?;
        Ok(table)
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn get(&self, id: &str) -> Option<T> {
        self.rows.get(id).map(|row| row.record.clone())
    }

    /// All records, ordered by the first index then insertion sequence.
    pub(crate) fn all(&self) -> Vec<T> {
        self.ordered_rows().map(|row| row.record.clone()).collect()
    }

    /// Records in insertion order, used when persisting.
    pub(crate) fn in_insertion_order(&self) -> Vec<T> {
        let mut rows: Vec<&Row<T>> = self.rows.values().collect();
        rows.sort_by_key(|row| row.seq);
        rows.into_iter().map(|row| row.record.clone()).collect()
    }

    pub(crate) fn by_index(&self, index: &str, key: &Value) -> StorageResult<Vec<T>> {
        let slot = self
            .indexes
            .iter()
            .position(|idx| idx.name == index)
            .ok_or_else(|| StorageError::UnknownIndex {
                store: self.store.to_string(),
                index: index.to_string(),
            })?;

        Ok(self
            .ordered_rows()
            .filter(|row| row.keys[slot].as_ref().is_some_and(|k| values_equal(k, key)))
            .map(|row| row.record.clone())
            .collect())
    }

    /// Applies a changeset in place. Callers apply to a clone and discard it
    /// on error.
    pub(crate) fn apply(&mut self, changeset: &Changeset<T>) -> StorageResult<()> {
        for record in &changeset.added {
            if self.rows.contains_key(record.record_id()) {
                return Err(StorageError::DuplicateKey {
                    store: self.store.to_string(),
                    id: record.record_id().to_string(),
                });
            }
            self.upsert(record.clone())?;
        }
        for record in &changeset.modified {
            self.upsert(record.clone())?;
        }
        for record in &changeset.removed {
            self.rows.remove(record.record_id());
        }
        self.check_unique()
    }

    pub(crate) fn clear(&mut self) {
        self.rows.clear();
    }

    fn upsert(&mut self, record: T) -> StorageResult<()> {
        let keys = self.index_keys(&record)?;
        let id = record.record_id().to_string();
        let seq = match self.rows.get(&id) {
            Some(existing) => existing.seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.rows.insert(id, Row { seq, record, keys });
        Ok(())
    }

    fn index_keys(&self, record: &T) -> StorageResult<Vec<Option<Value>>> {
        if self.indexes.is_empty() {
            return Ok(Vec::new());
        }
        let value = serde_json::to_value(record)?;
        Ok(self
            .indexes
            .iter()
            .map(|idx| value_at_path(&value, &idx.path).filter(|v| !v.is_null()).cloned())
            .collect())
    }

    fn check_unique(&self) -> StorageResult<()> {
        for (slot, idx) in self.indexes.iter().enumerate() {
            if !idx.unique {
                continue;
            }
            let mut keys: Vec<&Value> = self
                .rows
                .values()
                .filter_map(|row| row.keys[slot].as_ref())
                .collect();
            keys.sort_by(|a, b| compare_values(a, b));
            if let Some(dup) = keys.windows(2).find(|w| values_equal(w[0], w[1])) {
                return Err(StorageError::UniqueViolation {
                    store: self.store.to_string(),
                    index: idx.name.clone(),
                    key: dup[0].to_string(),
                });
            }
        }
        Ok(())
    }

    fn ordered_rows(&self) -> impl Iterator<Item = &Row<T>> {
        let mut rows: Vec<&Row<T>> = self.rows.values().collect();
        if self.indexes.is_empty() {
            rows.sort_by_key(|row| row.seq);
        } else {
            rows.sort_by(|a, b| {
                let by_key = match (&a.keys[0], &b.keys[0]) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                by_key.then(a.seq.cmp(&b.seq))
            });
        }
        rows.into_iter()
    }
}
