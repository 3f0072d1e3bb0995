//! Folding repeated local mutations of one record into a single change.

use crate::pending::{Coalesced, PendingChange, PendingChangeType};
use driftdb_core::Record;

/// Shallow merge of two versions of a record; `next` wins per field.
pub fn merge_records(prev: &Record, next: &Record) -> Record {
    let mut fields = prev.fields.clone();
    fields.extend(next.fields.clone());
    Record {
        id: next.id.clone(),
        name: next.name.clone(),
        created_at: next.created_at.clone().or_else(|| prev.created_at.clone()),
        updated_at: next.updated_at.clone().or_else(|| prev.updated_at.clone()),
        fields,
    }
}

/// Folds a newly detected change into an existing pending change.
///
/// | prev \ next | inserted          | updated           | removed          |
/// |-------------|-------------------|-------------------|------------------|
/// | inserted    | inserted, merged  | inserted, merged  | noop             |
/// | updated     | inserted, merged  | updated, merged   | removed, prev    |
/// | removed     | inserted, next    | inserted, next    | removed, prev    |
///
/// A `noop` next yields `noop`; a `noop` prev yields `next` unchanged.
pub fn coalesce(prev: &PendingChange, next: &PendingChange) -> Coalesced {
    use PendingChangeType::{Inserted, Noop, Removed, Updated};

    let merged = || merge_records(&prev.data, &next.data);
    let (change_type, data) = match (prev.change_type, next.change_type) {
        (_, Noop) => (Noop, next.data.clone()),
        (Noop, kind) => (kind, next.data.clone()),
        (Inserted, Inserted | Updated) => (Inserted, merged()),
        (Inserted, Removed) => (Noop, next.data.clone()),
        (Updated, Inserted) => (Inserted, merged()),
        (Updated, Updated) => (Updated, merged()),
        (Updated | Removed, Removed) => (Removed, prev.data.clone()),
        (Removed, Inserted | Updated) => (Inserted, next.data.clone()),
    };
    Coalesced { change_type, data }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn change(kind: PendingChangeType, data: Record) -> PendingChange {
        PendingChange::new("widgets", kind, data, 0)
    }

    fn rec(fields: Value) -> Record {
        let mut record = Record::new("w1");
        if let Value::Object(map) = fields {
            record.fields = map;
        }
        record
    }

    #[test]
    fn table() {
        use PendingChangeType::*;
        let prev = rec(json!({"a": 1, "b": 1}));
        let next = rec(json!({"b": 2, "c": 2}));
        let merged = rec(json!({"a": 1, "b": 2, "c": 2}));

        let cases = [
            (Inserted, Inserted, Inserted, &merged),
            (Inserted, Updated, Inserted, &merged),
            (Updated, Inserted, Inserted, &merged),
            (Updated, Updated, Updated, &merged),
            (Updated, Removed, Removed, &prev),
            (Removed, Inserted, Inserted, &next),
            (Removed, Updated, Inserted, &next),
            (Removed, Removed, Removed, &prev),
        ];
        for (p, n, expected_type, expected_data) in cases {
            let out = coalesce(&change(p, prev.clone()), &change(n, next.clone()));
            assert_eq!(out.change_type, expected_type, "{p} x {n}");
            assert_eq!(&out.data, expected_data, "{p} x {n}");
        }

        let out = coalesce(&change(Inserted, prev.clone()), &change(Removed, next.clone()));
        assert!(out.is_noop());
    }

    #[test]
    fn noop_rows_and_columns() {
        use PendingChangeType::*;
        let a = rec(json!({"a": 1}));
        let b = rec(json!({"b": 1}));
        for kind in [Inserted, Updated, Removed, Noop] {
            let out = coalesce(&change(kind, a.clone()), &change(Noop, b.clone()));
            assert!(out.is_noop());
        }
        for kind in [Inserted, Updated, Removed] {
            let out = coalesce(&change(Noop, a.clone()), &change(kind, b.clone()));
            assert_eq!(out.change_type, kind);
            assert_eq!(out.data, b);
        }
    }

    #[test]
    fn merge_keeps_prev_timestamps_when_next_lacks_them() {
        let mut prev = Record::new("w1");
        prev.created_at = Some("2024-01-01T00:00:00.000Z".into());
        let next = Record::new("w1").with_updated_at_millis(5);
        let merged = merge_records(&prev, &next);
        assert_eq!(merged.created_at, prev.created_at);
        assert_eq!(merged.updated_at, next.updated_at);
    }

    fn arb_fields() -> impl Strategy<Value = serde_json::Map<String, Value>> {
        prop::collection::btree_map("[a-d]", any::<i32>(), 0..4)
            .prop_map(|m| m.into_iter().map(|(k, v)| (k, json!(v))).collect())
    }

    proptest! {
        #[test]
        fn insert_then_remove_is_noop(a in arb_fields(), b in arb_fields()) {
            let mut prev = Record::new("w1");
            prev.fields = a;
            let mut next = Record::new("w1");
            next.fields = b;
            let out = coalesce(
                &change(PendingChangeType::Inserted, prev),
                &change(PendingChangeType::Removed, next),
            );
            prop_assert!(out.is_noop());
        }

        #[test]
        fn update_update_is_fieldwise_overwrite(a in arb_fields(), b in arb_fields()) {
            let mut prev = Record::new("w1");
            prev.fields = a.clone();
            let mut next = Record::new("w1");
            next.fields = b.clone();
            let out = coalesce(
                &change(PendingChangeType::Updated, prev),
                &change(PendingChangeType::Updated, next),
            );
            prop_assert_eq!(out.change_type, PendingChangeType::Updated);
            for (key, value) in &b {
                prop_assert_eq!(out.data.fields.get(key), Some(value));
            }
            for (key, value) in &a {
                if !b.contains_key(key) {
                    prop_assert_eq!(out.data.fields.get(key), Some(value));
                }
            }
            prop_assert_eq!(out.data.fields.len(), a.keys().chain(b.keys()).collect::<std::collections::BTreeSet<_>>().len());
        }
    }
}
