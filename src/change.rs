//! Changes raised from native bookmark events and the records the queue keeps
//! about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::native::NativeNode;

/// One native-side mutation waiting to be applied to the canonical tree.
///
/// Ids are native ids; the queue task maps them to canonical ids when the
/// change is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "changeData", rename_all_fields = "camelCase")]
pub enum Change {
    /// A node was created. `description` and `tags` come from the active
    /// page when it matched the new bookmark.
    Add {
        node: NativeNode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tags: Option<Vec<String>>,
    },
    /// A node was edited; `node` is its state fetched after the edit.
    Modify { node: NativeNode },
    Move {
        id: String,
        #[serde(rename = "toParentId")]
        parent_id: String,
        #[serde(rename = "fromParentId")]
        old_parent_id: String,
        #[serde(rename = "toIndex")]
        index: usize,
        #[serde(rename = "fromIndex")]
        old_index: usize,
    },
    Remove {
        id: String,
        parent_id: String,
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<NativeNode>,
    },
    Reorder {
        parent_id: String,
        #[serde(rename = "orderedChildIds")]
        child_ids: Vec<String>,
    },
}

impl Change {
    pub fn kind(&self) -> &'static str {
        match self {
            Change::Add { .. } => "add",
            Change::Modify { .. } => "modify",
            Change::Move { .. } => "move",
            Change::Remove { .. } => "remove",
            Change::Reorder { .. } => "reorder",
        }
    }

    /// The native id the change is about.
    pub fn native_id(&self) -> &str {
        match self {
            Change::Add { node, .. } | Change::Modify { node } => &node.id,
            Change::Move { id, .. } | Change::Remove { id, .. } => id,
            Change::Reorder { parent_id, .. } => parent_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Pending,
    Applying,
    Applied,
    Failed,
}

impl ChangeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChangeStatus::Applied | ChangeStatus::Failed)
    }
}

/// What the queue remembers about a submitted job. Full-tree jobs carry no
/// `change`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub seq: u64,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<Change>,
    pub status: ChangeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retryable: bool,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ChangeRecord {
    pub(crate) fn pending(seq: u64, kind: &str, change: Option<Change>) -> Self {
        Self {
            seq,
            kind: kind.to_string(),
            change,
            status: ChangeStatus::Pending,
            error: None,
            retryable: false,
            submitted_at: Utc::now(),
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let change = Change::Move {
            id: "10".into(),
            parent_id: "2".into(),
            old_parent_id: "1".into(),
            index: 0,
            old_index: 4,
        };
        assert_eq!(
            serde_json::to_value(&change).unwrap(),
            json!({
                "type": "Move",
                "changeData": {
                    "id": "10", "toParentId": "2", "fromParentId": "1", "toIndex": 0, "fromIndex": 4
                }
            })
        );
        assert_eq!(change.kind(), "move");
        assert_eq!(change.native_id(), "10");
    }

    #[test]
    fn test_parse_replayed_changes() {
        let changes: Vec<Change> = serde_json::from_value(json!([
            { "type": "Add", "changeData": { "node": { "id": "5", "parentId": "2", "title": "Docs", "url": "https://docs.rs" } } },
            { "type": "Reorder", "changeData": { "parentId": "2", "orderedChildIds": ["6", "5"] } }
        ]))
        .unwrap();

        match &changes[0] {
            Change::Add { node, description, .. } => {
                assert_eq!(node.url.as_deref(), Some("https://docs.rs"));
                assert!(description.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(changes[1].kind(), "reorder");
        assert!(matches!(&changes[1], Change::Reorder { child_ids, .. } if child_ids == &["6", "5"]));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ChangeStatus::Pending.is_terminal());
        assert!(!ChangeStatus::Applying.is_terminal());
        assert!(ChangeStatus::Applied.is_terminal());
        assert!(ChangeStatus::Failed.is_terminal());
    }
}
