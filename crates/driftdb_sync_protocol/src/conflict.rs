//! Conflict detection and resolution.
//!
//! Conflicts are settled last-write-wins: a local pending change carries the
//! time of its latest mutation, a remote record carries its `updatedAt`.

use crate::pending::{PendingChange, PendingChangeType};
use driftdb_core::{Document, Record};
use driftdb_storage::Changeset;
use std::collections::HashMap;

/// How a remote changeset refers to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePresence {
    /// The remote changeset does not mention the record.
    Absent,
    /// The remote added or modified the record.
    Upserted,
    /// The remote removed the record.
    Removed,
}

/// Resolution for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Keep local version.
    KeepLocal,
    /// Accept remote version.
    AcceptRemote,
    /// Nothing to push.
    Skip,
}

/// The outcome for one local pending change.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Record the decision is about.
    pub record_id: String,
    /// Kind of the local change.
    pub local: PendingChangeType,
    /// How the remote changeset refers to the record.
    pub remote: RemotePresence,
    /// Which side won.
    pub resolution: ConflictResolution,
}

impl Decision {
    /// Returns true if both sides touched the record.
    pub fn is_conflict(&self) -> bool {
        self.remote != RemotePresence::Absent
    }
}

/// Result of [`resolve_detailed`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Resolution {
    /// Changes to push to the remote.
    pub outgoing: Changeset<Record>,
    /// One decision per considered pending change, in processing order.
    pub decisions: Vec<Decision>,
}

impl Resolution {
    /// Number of records both sides touched.
    pub fn conflicts(&self) -> usize {
        self.decisions.iter().filter(|d| d.is_conflict()).count()
    }

    /// Changes that put local winners back after the remote changeset was
    /// applied over them.
    pub fn local_restore(&self) -> Changeset<Record> {
        let mut restore = Changeset::new();
        for decision in &self.decisions {
            if decision.resolution != ConflictResolution::KeepLocal || !decision.is_conflict() {
                continue;
            }
            let id = decision.record_id.as_str();
            if let Some(record) = self.outgoing.modified.iter().find(|r| r.id == id) {
                restore.modified.push(record.clone());
            } else if let Some(record) = self.outgoing.removed.iter().find(|r| r.id == id) {
                restore.removed.push(record.clone());
            }
        }
        restore
    }
}

/// Returns true if the changeset has nothing in it.
pub fn is_changeset_empty<T>(changeset: &Changeset<T>) -> bool {
    changeset.is_empty()
}

/// Computes the changeset to push, given the local pending log and the
/// changeset just pulled from the remote.
pub fn resolve(local: &[PendingChange], remote: &Changeset<Record>) -> Changeset<Record> {
    resolve_detailed(local, remote).outgoing
}

/// Like [`resolve`], also explaining each decision.
///
/// Entries are processed in `(time, id)` order. If several entries name the
/// same record, only the newest is considered, so every record id appears in
/// at most one outgoing list.
pub fn resolve_detailed(local: &[PendingChange], remote: &Changeset<Record>) -> Resolution {
    let mut remote_index: HashMap<&str, (RemotePresence, &Record)> = HashMap::new();
    for record in remote.added.iter().chain(&remote.modified) {
        remote_index.insert(&record.id, (RemotePresence::Upserted, record));
    }
    for record in &remote.removed {
        remote_index.insert(&record.id, (RemotePresence::Removed, record));
    }

    let mut ordered: Vec<&PendingChange> = local.iter().filter(|c| !c.is_noop()).collect();
    ordered.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
    let newest: HashMap<&str, usize> = ordered
        .iter()
        .enumerate()
        .map(|(i, change)| (change.target_id(), i))
        .collect();

    let mut resolution = Resolution::default();
    for (i, change) in ordered.iter().enumerate() {
        if newest.get(change.target_id()) != Some(&i) {
            continue;
        }
        let remote_entry = remote_index.get(change.target_id()).copied();
        let decision = decide(change, remote_entry, &mut resolution.outgoing);
        resolution.decisions.push(decision);
    }
    resolution
}

fn decide(
    change: &PendingChange,
    remote: Option<(RemotePresence, &Record)>,
    out: &mut Changeset<Record>,
) -> Decision {
    use ConflictResolution::{AcceptRemote, KeepLocal, Skip};

    let presence = remote.map_or(RemotePresence::Absent, |(p, _)| p);
    let remote_time = remote.map_or(0, |(_, r)| r.updated_at_millis());
    let local_newer = change.time > remote_time;

    let resolution = match (change.change_type, remote) {
        (PendingChangeType::Inserted, None) => {
            out.added.push(change.data.clone());
            KeepLocal
        }
        (PendingChangeType::Inserted, Some(_)) => AcceptRemote,

        (PendingChangeType::Updated, None) => {
            out.modified.push(change.data.clone());
            KeepLocal
        }
        (PendingChangeType::Updated, Some((RemotePresence::Upserted, theirs))) => {
            if local_newer {
                out.modified.push(change.data.clone());
                KeepLocal
            } else {
                out.modified.push(theirs.clone());
                AcceptRemote
            }
        }
        (PendingChangeType::Updated, Some((_, _))) => {
            if local_newer {
                out.modified.push(change.data.clone());
                KeepLocal
            } else {
                AcceptRemote
            }
        }

        (PendingChangeType::Removed, Some((RemotePresence::Removed, _))) => Skip,
        (PendingChangeType::Removed, remote) => {
            if local_newer {
                out.removed.push(change.data.clone());
                KeepLocal
            } else if let Some((_, theirs)) = remote {
                out.modified.push(theirs.clone());
                AcceptRemote
            } else {
                Skip
            }
        }

        (PendingChangeType::Noop, _) => Skip,
    };

    Decision {
        record_id: change.target_id().to_string(),
        local: change.change_type,
        remote: presence,
        resolution,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pending(kind: PendingChangeType, id: &str, time: i64) -> PendingChange {
        PendingChange::new("widgets", kind, Record::new(id).with_name("local"), time)
    }

    fn remote(id: &str, updated_at: i64) -> Record {
        Record::new(id).with_name("remote").with_updated_at_millis(updated_at)
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn local_insert_without_remote_is_added() {
        let out = resolve(&[pending(PendingChangeType::Inserted, "a", 5)], &Changeset::new());
        assert_eq!(ids(&out.added), vec!["a"]);
        assert!(out.modified.is_empty() && out.removed.is_empty());
    }

    #[test]
    fn local_insert_yields_to_remote() {
        let local = [pending(PendingChangeType::Inserted, "a", 500)];
        for remote_cs in [
            Changeset::added(remote("a", 1)),
            Changeset::modified(remote("a", 1)),
            Changeset::removed(remote("a", 1)),
        ] {
            assert!(resolve(&local, &remote_cs).is_empty());
        }
    }

    #[test]
    fn newer_local_update_wins() {
        let out = resolve(
            &[pending(PendingChangeType::Updated, "a", 100)],
            &Changeset::modified(remote("a", 50)),
        );
        assert_eq!(out.modified.len(), 1);
        assert_eq!(out.modified[0].name, "local");
    }

    #[test]
    fn newer_remote_update_wins() {
        let out = resolve(
            &[pending(PendingChangeType::Updated, "a", 50)],
            &Changeset::modified(remote("a", 100)),
        );
        assert_eq!(out.modified[0].name, "remote");
    }

    #[test]
    fn ties_go_to_remote() {
        let out = resolve(
            &[pending(PendingChangeType::Updated, "a", 100)],
            &Changeset::added(remote("a", 100)),
        );
        assert_eq!(out.modified[0].name, "remote");
    }

    #[test]
    fn local_update_without_remote_is_pushed() {
        let out = resolve(&[pending(PendingChangeType::Updated, "a", 1)], &Changeset::new());
        assert_eq!(out.modified[0].name, "local");
    }

    #[test]
    fn local_update_against_remote_removal() {
        let newer = resolve(
            &[pending(PendingChangeType::Updated, "a", 100)],
            &Changeset::removed(remote("a", 50)),
        );
        assert_eq!(newer.modified[0].name, "local");

        let older = resolve(
            &[pending(PendingChangeType::Updated, "a", 50)],
            &Changeset::removed(remote("a", 100)),
        );
        assert!(older.is_empty());
    }

    #[test]
    fn local_removal() {
        let plain = resolve(&[pending(PendingChangeType::Removed, "a", 10)], &Changeset::new());
        assert_eq!(ids(&plain.removed), vec!["a"]);

        let newer = resolve(
            &[pending(PendingChangeType::Removed, "a", 100)],
            &Changeset::modified(remote("a", 50)),
        );
        assert_eq!(ids(&newer.removed), vec!["a"]);

        let resurrect = resolve(
            &[pending(PendingChangeType::Removed, "a", 50)],
            &Changeset::modified(remote("a", 100)),
        );
        assert!(resurrect.removed.is_empty());
        assert_eq!(resurrect.modified[0].name, "remote");

        let both = resolve(
            &[pending(PendingChangeType::Removed, "a", 100)],
            &Changeset::removed(remote("a", 50)),
        );
        assert!(both.is_empty());
    }

    #[test]
    fn noop_is_excluded() {
        let detailed = resolve_detailed(&[pending(PendingChangeType::Noop, "a", 10)], &Changeset::new());
        assert!(detailed.outgoing.is_empty());
        assert!(detailed.decisions.is_empty());
    }

    #[test]
    fn duplicate_record_keeps_newest_entry() {
        let local = [
            pending(PendingChangeType::Removed, "a", 30),
            pending(PendingChangeType::Updated, "a", 10),
        ];
        let out = resolve(&local, &Changeset::new());
        assert_eq!(ids(&out.removed), vec!["a"]);
        assert!(out.modified.is_empty());
    }

    #[test]
    fn output_follows_time_order() {
        let local = [
            pending(PendingChangeType::Updated, "late", 30),
            pending(PendingChangeType::Updated, "early", 10),
            pending(PendingChangeType::Updated, "mid", 20),
        ];
        let out = resolve(&local, &Changeset::new());
        assert_eq!(ids(&out.modified), vec!["early", "mid", "late"]);
    }

    #[test]
    fn decisions_and_local_restore() {
        let local = [
            pending(PendingChangeType::Updated, "kept", 100),
            pending(PendingChangeType::Updated, "lost", 10),
            pending(PendingChangeType::Removed, "gone", 100),
            pending(PendingChangeType::Updated, "quiet", 5),
        ];
        let remote_cs = Changeset {
            added: vec![],
            modified: vec![remote("kept", 50), remote("lost", 50), remote("gone", 50)],
            removed: vec![],
        };
        let res = resolve_detailed(&local, &remote_cs);

        assert_eq!(res.decisions.len(), 4);
        assert_eq!(res.conflicts(), 3);
        let quiet = res.decisions.iter().find(|d| d.record_id == "quiet").unwrap();
        assert_eq!(quiet.remote, RemotePresence::Absent);
        assert_eq!(quiet.resolution, ConflictResolution::KeepLocal);

        let restore = res.local_restore();
        assert_eq!(ids(&restore.modified), vec!["kept"]);
        assert_eq!(restore.modified[0].name, "local");
        assert_eq!(ids(&restore.removed), vec!["gone"]);
    }

    #[test]
    fn emptiness_helper() {
        assert!(is_changeset_empty(&Changeset::<Record>::new()));
        assert!(!is_changeset_empty(&Changeset::added(Record::new("a"))));
    }

    fn arb_kind() -> impl Strategy<Value = PendingChangeType> {
        prop_oneof![
            Just(PendingChangeType::Inserted),
            Just(PendingChangeType::Updated),
            Just(PendingChangeType::Removed),
            Just(PendingChangeType::Noop),
        ]
    }

    fn arb_local() -> impl Strategy<Value = Vec<PendingChange>> {
        prop::collection::vec((arb_kind(), "[a-e]", 0i64..200), 0..12).prop_map(|entries| {
            entries
                .into_iter()
                .map(|(kind, id, time)| pending(kind, &id, time))
                .collect()
        })
    }

    fn arb_remote() -> impl Strategy<Value = Changeset<Record>> {
        prop::collection::btree_map("[a-e]", (0u8..3, 0i64..200), 0..5).prop_map(|entries| {
            let mut cs = Changeset::new();
            for (id, (list, time)) in entries {
                let record = remote(&id, time);
                match list {
                    0 => cs.added.push(record),
                    1 => cs.modified.push(record),
                    _ => cs.removed.push(record),
                }
            }
            cs
        })
    }

    proptest! {
        #[test]
        fn every_id_in_at_most_one_list(local in arb_local(), remote_cs in arb_remote()) {
            let out = resolve(&local, &remote_cs);
            let mut seen = std::collections::HashSet::new();
            for record in out.added.iter().chain(&out.modified).chain(&out.removed) {
                prop_assert!(seen.insert(record.id.clone()), "duplicate {}", record.id);
            }
        }

        #[test]
        fn resolve_is_order_independent(local in arb_local(), remote_cs in arb_remote()) {
            let mut reversed = local.clone();
            reversed.reverse();
            prop_assert_eq!(resolve(&local, &remote_cs), resolve(&reversed, &remote_cs));
        }

        #[test]
        fn only_local_ids_are_pushed(local in arb_local(), remote_cs in arb_remote()) {
            let out = resolve(&local, &remote_cs);
            for record in out.added.iter().chain(&out.modified).chain(&out.removed) {
                prop_assert!(local.iter().any(|c| c.target_id() == record.id));
            }
        }
    }
}
