use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{CreateDetails, NativeBookmarkHost, NativeNode, NativeNodeType};
use crate::error::{Result, SyncError};
use crate::platform::Platform;

const FIRST_NODE_ID: u64 = 100;

struct HostState {
    root: NativeNode,
    next_id: u64,
    clock: i64,
}

impl HostState {
    fn allocate(&mut self) -> (String, i64) {
        let id = self.next_id;
        self.next_id += 1;
        self.clock += 1;
        (id.to_string(), self.clock)
    }
}

/// A native store kept entirely in memory, laid out with a platform's root
/// containers. Ids are numeric strings; `date_added` increases with every
/// created node.
pub struct MemoryBookmarkHost {
    state: Mutex<HostState>,
}

fn node_mut<'a>(node: &'a mut NativeNode, id: &str) -> Option<&'a mut NativeNode> {
    if node.id == id {
        return Some(node);
    }
    node.children
        .as_mut()?
        .iter_mut()
        .find_map(|child| node_mut(child, id))
}

fn node_ref<'a>(node: &'a NativeNode, id: &str) -> Option<&'a NativeNode> {
    if node.id == id {
        return Some(node);
    }
    node.children
        .as_ref()?
        .iter()
        .find_map(|child| node_ref(child, id))
}

fn detach(node: &mut NativeNode, id: &str) -> Option<NativeNode> {
    let children = node.children.as_mut()?;
    if let Some(position) = children.iter().position(|c| c.id == id) {
        let removed = children.remove(position);
        reindex(node);
        return Some(removed);
    }
    children.iter_mut().find_map(|child| detach(child, id))
}

fn reindex(parent: &mut NativeNode) {
    let parent_id = parent.id.clone();
    if let Some(children) = parent.children.as_mut() {
        for (index, child) in children.iter_mut().enumerate() {
            child.index = index;
            child.parent_id = Some(parent_id.clone());
        }
    }
}

fn highest_numeric_id(node: &NativeNode) -> u64 {
    let own = node.id.parse::<u64>().unwrap_or(0);
    node.children
        .iter()
        .flatten()
        .map(highest_numeric_id)
        .fold(own, u64::max)
}

impl MemoryBookmarkHost {
    pub fn new(platform: Platform) -> Self {
        let root_id = match platform {
            Platform::Firefox => "root________",
            Platform::Chromium | Platform::Opera => "0",
        };
        let now = Utc::now().timestamp_millis();

        let roots = platform
            .root_specs()
            .iter()
            .enumerate()
            .map(|(index, spec)| NativeNode {
                id: spec.ids[0].to_string(),
                parent_id: Some(root_id.to_string()),
                title: spec.titles[0].to_string(),
                url: None,
                children: Some(Vec::new()),
                node_type: Some(NativeNodeType::Folder),
                index,
                date_added: now,
            })
            .collect();

        Self::from_root(NativeNode {
            id: root_id.to_string(),
            children: Some(roots),
            node_type: Some(NativeNodeType::Folder),
            date_added: now,
            ..NativeNode::default()
        })
    }

    /// Wraps an existing tree. `root` is the unnamed node holding the root
    /// containers.
    pub fn from_root(mut root: NativeNode) -> Self {
        let next_id = (highest_numeric_id(&root) + 1).max(FIRST_NODE_ID);
        let clock = highest_date(&root).max(Utc::now().timestamp_millis());
        reindex_all(&mut root);

        Self {
            state: Mutex::new(HostState { root, next_id, clock }),
        }
    }

    /// A copy of the whole tree, root included.
    pub fn snapshot(&self) -> NativeNode {
        self.state.lock().root.clone()
    }

    /// Edits a node the way a user would in the browser's bookmark manager.
    pub fn update(&self, id: &str, title: &str, url: Option<&str>) -> Result<NativeNode> {
        let mut state = self.state.lock();
        let node = node_mut(&mut state.root, id)
            .ok_or_else(|| SyncError::NativeHost(format!("no node {}", id)))?;
        node.title = title.to_string();
        if node.node_type == Some(NativeNodeType::Bookmark) {
            node.url = url.map(str::to_string);
        }
        Ok(node.clone())
    }

    /// Moves a node, returning it as it sits afterwards.
    pub fn move_node(&self, id: &str, parent_id: &str, index: Option<usize>) -> Result<NativeNode> {
        let mut state = self.state.lock();
        if node_ref(&state.root, id).is_some_and(|n| node_ref(n, parent_id).is_some()) {
            return Err(SyncError::NativeHost(format!("cannot move {} into itself", id)));
        }
        if node_ref(&state.root, parent_id).map_or(true, |p| p.children.is_none()) {
            return Err(SyncError::NativeHost(format!("no folder {}", parent_id)));
        }

        let node = detach(&mut state.root, id)
            .ok_or_else(|| SyncError::NativeHost(format!("no node {}", id)))?;
        insert_child(&mut state.root, parent_id, index, node)
    }

    /// Reorders a folder's children; ids not listed keep their relative order
    /// at the end.
    pub fn reorder(&self, parent_id: &str, ordered_ids: &[&str]) -> Result<()> {
        let mut state = self.state.lock();
        let parent = node_mut(&mut state.root, parent_id)
            .ok_or_else(|| SyncError::NativeHost(format!("no node {}", parent_id)))?;
        let children = parent
            .children
            .as_mut()
            .ok_or_else(|| SyncError::NativeHost(format!("{} is not a folder", parent_id)))?;

        children.sort_by_key(|c| {
            ordered_ids
                .iter()
                .position(|id| *id == c.id)
                .unwrap_or(usize::MAX)
        });
        reindex(parent);
        Ok(())
    }
}

fn highest_date(node: &NativeNode) -> i64 {
    node.children
        .iter()
        .flatten()
        .map(highest_date)
        .fold(node.date_added, i64::max)
}

fn reindex_all(node: &mut NativeNode) {
    reindex(node);
    for child in node.children.iter_mut().flatten() {
        reindex_all(child);
    }
}

fn insert_child(
    root: &mut NativeNode,
    parent_id: &str,
    index: Option<usize>,
    node: NativeNode,
) -> Result<NativeNode> {
    let parent = node_mut(root, parent_id)
        .ok_or_else(|| SyncError::NativeHost(format!("no node {}", parent_id)))?;
    let children = parent
        .children
        .as_mut()
        .ok_or_else(|| SyncError::NativeHost(format!("{} is not a folder", parent_id)))?;

    let index = index.unwrap_or(children.len()).min(children.len());
    children.insert(index, node);
    reindex(parent);

    parent
        .children
        .as_ref()
        .and_then(|c| c.get(index))
        .cloned()
        .ok_or_else(|| SyncError::NativeHost(format!("insert into {} failed", parent_id)))
}

#[async_trait]
impl NativeBookmarkHost for MemoryBookmarkHost {
    async fn get_tree(&self) -> Result<Vec<NativeNode>> {
        Ok(vec![self.snapshot()])
    }

    async fn get_subtree(&self, id: &str) -> Result<NativeNode> {
        let state = self.state.lock();
        node_ref(&state.root, id)
            .cloned()
            .ok_or_else(|| SyncError::NativeHost(format!("no node {}", id)))
    }

    async fn get_children(&self, id: &str) -> Result<Vec<NativeNode>> {
        let state = self.state.lock();
        let node = node_ref(&state.root, id)
            .ok_or_else(|| SyncError::NativeHost(format!("no node {}", id)))?;
        Ok(node
            .children
            .iter()
            .flatten()
            .map(|child| NativeNode { children: None, ..child.clone() })
            .collect())
    }

    async fn create(&self, details: CreateDetails) -> Result<NativeNode> {
        let mut state = self.state.lock();
        if details.parent_id == state.root.id {
            return Err(SyncError::NativeHost("cannot create nodes at the root".into()));
        }

        let node_type = details.node_type.unwrap_or(if details.url.is_some() {
            NativeNodeType::Bookmark
        } else {
            NativeNodeType::Folder
        });
        let (id, date_added) = state.allocate();

        let node = NativeNode {
            id,
            parent_id: Some(details.parent_id.clone()),
            title: details.title,
            url: details.url,
            children: (node_type == NativeNodeType::Folder).then(Vec::new),
            node_type: Some(node_type),
            index: 0,
            date_added,
        };
        insert_child(&mut state.root, &details.parent_id, details.index, node)
    }

    async fn remove_tree(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let is_root_container = state.root.id == id
            || state
                .root
                .children
                .iter()
                .flatten()
                .any(|c| c.id == id);
        if is_root_container {
            return Err(SyncError::NativeHost(format!("cannot remove root container {}", id)));
        }

        detach(&mut state.root, id)
            .map(|_| ())
            .ok_or_else(|| SyncError::NativeHost(format!("no node {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bookmark(parent: &str, title: &str, url: &str) -> CreateDetails {
        CreateDetails {
            parent_id: parent.into(),
            title: title.into(),
            url: Some(url.into()),
            ..CreateDetails::default()
        }
    }

    #[tokio::test]
    async fn test_platform_roots() {
        let host = MemoryBookmarkHost::new(Platform::Firefox);
        let tree = host.get_tree().await.unwrap();
        let roots: Vec<&str> = tree[0]
            .children
            .iter()
            .flatten()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(roots, vec!["menu________", "toolbar_____", "unfiled_____", "mobile______"]);
    }

    #[tokio::test]
    async fn test_create_orders_and_dates() {
        let host = MemoryBookmarkHost::new(Platform::Chromium);
        let first = host.create(bookmark("1", "a", "https://a.io")).await.unwrap();
        let second = host
            .create(CreateDetails { index: Some(0), ..bookmark("1", "b", "https://b.io") })
            .await
            .unwrap();

        assert!(second.date_added > first.date_added);
        assert_eq!(second.index, 0);

        let children = host.get_children("1").await.unwrap();
        assert_eq!(children.iter().map(|c| c.title.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(children[1].index, 1);
    }

    #[tokio::test]
    async fn test_roots_cannot_be_removed() {
        let host = MemoryBookmarkHost::new(Platform::Chromium);
        assert!(host.remove_tree("1").await.is_err());
        assert!(host.create(bookmark("0", "x", "https://x.io")).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_and_move() {
        let host = MemoryBookmarkHost::new(Platform::Chromium);
        let folder = host
            .create(CreateDetails { parent_id: "2".into(), title: "f".into(), ..CreateDetails::default() })
            .await
            .unwrap();
        let leaf = host.create(bookmark(&folder.id, "a", "https://a.io")).await.unwrap();

        assert!(host.move_node(&folder.id, &folder.id, None).is_err());
        let moved = host.move_node(&leaf.id, "1", None).unwrap();
        assert_eq!(moved.parent_id.as_deref(), Some("1"));

        host.remove_tree(&folder.id).await.unwrap();
        assert!(host.get_subtree(&folder.id).await.is_err());
        assert!(host.get_subtree(&leaf.id).await.is_ok());
    }
}
