//! Pull and push message shapes exchanged with the remote.

use driftdb_core::Record;
use driftdb_storage::Changeset;
use serde::{Deserialize, Serialize};

/// Names the remote collection a request is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRef {
    /// Collection name.
    pub name: String,
}

impl CollectionRef {
    /// Creates a reference to the named collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Parameters of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullParams {
    /// Only changes after this epoch-millisecond cursor are wanted.
    pub last_sync: i64,
}

impl PullParams {
    /// Creates pull parameters for the given cursor.
    pub fn since(last_sync: i64) -> Self {
        Self { last_sync }
    }
}

/// Changes the remote reported since the requested cursor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PullResponse {
    /// Remote changes.
    #[serde(default)]
    pub changes: Changeset<Record>,
}

impl PullResponse {
    /// Wraps a changeset.
    pub fn new(changes: Changeset<Record>) -> Self {
        Self { changes }
    }

    /// A response with no changes.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Local changes sent to the remote.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PushRequest {
    /// Resolved outgoing changes.
    pub changes: Changeset<Record>,
}

impl PushRequest {
    /// Wraps a changeset.
    pub fn new(changes: Changeset<Record>) -> Self {
        Self { changes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pull_params_wire_name() {
        assert_eq!(
            serde_json::to_value(PullParams::since(12)).unwrap(),
            json!({"lastSync": 12})
        );
    }

    #[test]
    fn pull_response_tolerates_missing_lists() {
        let resp: PullResponse =
            serde_json::from_value(json!({"changes": {"added": [{"id": "a", "name": "x"}]}}))
                .unwrap();
        assert_eq!(resp.changes.added.len(), 1);
        assert!(resp.changes.modified.is_empty());

        let empty: PullResponse = serde_json::from_value(json!({})).unwrap();
        assert!(empty.changes.is_empty());
    }

    #[test]
    fn push_request_shape() {
        let req = PushRequest::new(Changeset::removed(Record::new("a")));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["changes"]["removed"][0]["id"], json!("a"));
        assert_eq!(value["changes"]["added"], json!([]));
    }
}
