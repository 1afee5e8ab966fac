//! The browser's own bookmark store.
//!
//! [`NativeBookmarkHost`] is the minimal surface the engine needs from a
//! browser. [`NativeAdapter`] converts between native nodes and the
//! canonical tree and keeps every vendor quirk in one place.

pub mod adapter;
pub mod chromium;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use adapter::{ConvertedTree, NativeAdapter};
pub use chromium::ChromiumProfileHost;
pub use memory::MemoryBookmarkHost;

use crate::bookmark::TreeNode;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NativeNodeType {
    Bookmark,
    Folder,
    Separator,
}

/// A node as reported by the host. Indices are whatever the host reported
/// and are recomputed from array position wherever they matter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<NativeNode>>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<NativeNodeType>,
    #[serde(default)]
    pub index: usize,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub date_added: i64,
}

impl NativeNode {
    pub fn is_folder(&self) -> bool {
        match self.node_type {
            Some(NativeNodeType::Folder) => true,
            Some(_) => false,
            None => self.url.is_none(),
        }
    }
}

impl TreeNode for NativeNode {
    type Id = str;

    fn node_id(&self) -> &str {
        &self.id
    }

    fn node_title(&self) -> &str {
        &self.title
    }

    fn node_url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    fn node_children(&self) -> Option<&[NativeNode]> {
        self.children.as_deref()
    }

    fn is_explicit_separator(&self) -> bool {
        self.node_type == Some(NativeNodeType::Separator)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateDetails {
    pub parent_id: String,
    pub index: Option<usize>,
    pub title: String,
    pub url: Option<String>,
    pub node_type: Option<NativeNodeType>,
}

#[async_trait]
pub trait NativeBookmarkHost: Send + Sync {
    /// The whole tree: a single unnamed root whose children are the
    /// platform's root containers.
    async fn get_tree(&self) -> Result<Vec<NativeNode>>;
    async fn get_subtree(&self, id: &str) -> Result<NativeNode>;
    async fn get_children(&self, id: &str) -> Result<Vec<NativeNode>>;
    async fn create(&self, details: CreateDetails) -> Result<NativeNode>;
    async fn remove_tree(&self, id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::{find_by_id, is_separator};

    #[test]
    fn test_native_node_shape() {
        let node: NativeNode = serde_json::from_str(
            r#"{"id":"10","parentId":"1","title":"Docs","url":"https://docs.rs","index":3,"dateAdded":1700000000000}"#,
        )
        .unwrap();
        assert!(!node.is_folder());
        assert_eq!(node.parent_id.as_deref(), Some("1"));
        assert_eq!(node.date_added, 1_700_000_000_000);

        let separator = NativeNode {
            id: "11".into(),
            node_type: Some(NativeNodeType::Separator),
            ..NativeNode::default()
        };
        assert!(!separator.is_folder());
        assert!(is_separator(&separator, None));
    }

    #[test]
    fn test_find_recomputes_index() {
        let root = NativeNode {
            id: "0".into(),
            children: Some(vec![
                NativeNode { id: "a".into(), index: 7, ..NativeNode::default() },
                NativeNode { id: "b".into(), index: 7, ..NativeNode::default() },
            ]),
            ..NativeNode::default()
        };
        let tree = vec![root];
        assert_eq!(find_by_id(&tree, "b").unwrap().index, 1);
    }
}
