//! Chromium profile `Bookmarks` file as a native host.
//!
//! The file is loaded into a [`MemoryBookmarkHost`] and written back after
//! every mutation through a temp file and rename, so the browser never sees
//! a half-written file. No checksum is written; Chromium recomputes it.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::memory::MemoryBookmarkHost;
use super::{CreateDetails, NativeBookmarkHost, NativeNode, NativeNodeType};
use crate::error::{Result, SyncError};
use crate::platform::Platform;
use crate::store::write_atomically;

/// Microseconds between 1601-01-01 and 1970-01-01.
const WINDOWS_EPOCH_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

/// Root keys in the order the browser lists them, with their node ids.
const ROOT_KEYS: [(&str, &str); 3] = [("bookmark_bar", "1"), ("other", "2"), ("synced", "3")];

fn chromium_time_to_millis(value: Option<&Value>) -> i64 {
    value
        .and_then(|v| match v {
            Value::String(s) => s.parse::<i64>().ok(),
            other => other.as_i64(),
        })
        .map(|micros| (micros - WINDOWS_EPOCH_OFFSET_MICROS) / 1000)
        .unwrap_or(0)
}

fn millis_to_chromium_time(millis: i64) -> String {
    (millis * 1000 + WINDOWS_EPOCH_OFFSET_MICROS).to_string()
}

fn parse_node(value: &Value, guids: &mut HashMap<String, String>) -> Result<NativeNode> {
    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| SyncError::NativeHost("bookmark node without id".into()))?
        .to_string();

    if let Some(guid) = value.get("guid").and_then(|v| v.as_str()) {
        guids.insert(id.clone(), guid.to_string());
    }

    let is_folder = value.get("type").and_then(|v| v.as_str()) == Some("folder");
    let children = if is_folder {
        let children = value
            .get("children")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|child| parse_node(child, guids))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();
        Some(children)
    } else {
        None
    };

    Ok(NativeNode {
        id,
        parent_id: None,
        title: value.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        url: value.get("url").and_then(|v| v.as_str()).map(str::to_string),
        children,
        node_type: Some(if is_folder { NativeNodeType::Folder } else { NativeNodeType::Bookmark }),
        index: 0,
        date_added: chromium_time_to_millis(value.get("date_added")),
    })
}

/// Reads a `Bookmarks` document into a root node holding the root folders.
pub fn parse_chromium_bookmarks(
    document: &Value,
    guids: &mut HashMap<String, String>,
) -> Result<NativeNode> {
    let roots = document
        .get("roots")
        .and_then(|v| v.as_object())
        .ok_or_else(|| SyncError::NativeHost("Bookmarks file has no roots".into()))?;

    let mut children = Vec::new();
    for (key, _) in ROOT_KEYS {
        if let Some(root) = roots.get(key) {
            children.push(parse_node(root, guids)?);
        }
    }

    Ok(NativeNode {
        id: "0".into(),
        children: Some(children),
        node_type: Some(NativeNodeType::Folder),
        ..NativeNode::default()
    })
}

fn node_to_value(node: &NativeNode, guids: &mut HashMap<String, String>) -> Value {
    let guid = guids
        .entry(node.id.clone())
        .or_insert_with(|| uuid::Uuid::new_v4().to_string())
        .clone();

    let mut object = Map::new();
    object.insert("date_added".into(), json!(millis_to_chromium_time(node.date_added)));
    object.insert("guid".into(), json!(guid));
    object.insert("id".into(), json!(node.id));
    object.insert("name".into(), json!(node.title));

    if node.is_folder() {
        let children: Vec<Value> = node
            .children
            .iter()
            .flatten()
            .map(|child| node_to_value(child, guids))
            .collect();
        object.insert("children".into(), Value::Array(children));
        object.insert("date_modified".into(), json!("0"));
        object.insert("type".into(), json!("folder"));
    } else {
        object.insert("type".into(), json!("url"));
        object.insert("url".into(), json!(node.url.clone().unwrap_or_default()));
    }

    Value::Object(object)
}

/// Renders a root node back into a `Bookmarks` document.
pub fn to_chromium_bookmarks(root: &NativeNode, guids: &mut HashMap<String, String>) -> Value {
    let mut roots = Map::new();
    for child in root.children.iter().flatten() {
        if let Some((key, _)) = ROOT_KEYS.iter().find(|(_, id)| *id == child.id) {
            roots.insert((*key).to_string(), node_to_value(child, guids));
        }
    }
    json!({ "roots": Value::Object(roots), "version": 1 })
}

pub struct ChromiumProfileHost {
    path: PathBuf,
    inner: MemoryBookmarkHost,
    guids: Mutex<HashMap<String, String>>,
}

impl ChromiumProfileHost {
    /// Opens a profile's `Bookmarks` file. A missing file starts an empty
    /// profile that is written on the first change.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut guids = HashMap::new();

        let inner = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let document: Value = serde_json::from_str(&content)?;
            let root = parse_chromium_bookmarks(&document, &mut guids)?;
            info!("📖 Loaded Chromium bookmarks from {:?}", path);
            MemoryBookmarkHost::from_root(root)
        } else {
            debug!("No Bookmarks file at {:?}, starting empty", path);
            MemoryBookmarkHost::new(Platform::Chromium)
        };

        Ok(Self { path, inner, guids: Mutex::new(guids) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copies the current file aside before a destructive operation.
    pub fn backup(&self) -> Result<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let backup_path = self.path.with_extension("backup");
        std::fs::copy(&self.path, &backup_path)?;
        info!("💾 Backed up Chromium bookmarks to {:?}", backup_path);
        Ok(Some(backup_path))
    }

    async fn persist(&self) -> Result<()> {
        let document = {
            let mut guids = self.guids.lock();
            to_chromium_bookmarks(&self.inner.snapshot(), &mut guids)
        };
        let content = serde_json::to_string_pretty(&document)?;
        write_atomically(&self.path, content.as_bytes()).await
    }
}

#[async_trait]
impl NativeBookmarkHost for ChromiumProfileHost {
    async fn get_tree(&self) -> Result<Vec<NativeNode>> {
        self.inner.get_tree().await
    }

    async fn get_subtree(&self, id: &str) -> Result<NativeNode> {
        self.inner.get_subtree(id).await
    }

    async fn get_children(&self, id: &str) -> Result<Vec<NativeNode>> {
        self.inner.get_children(id).await
    }

    async fn create(&self, details: CreateDetails) -> Result<NativeNode> {
        let node = self.inner.create(details).await?;
        self.persist().await?;
        Ok(node)
    }

    async fn remove_tree(&self, id: &str) -> Result<()> {
        self.inner.remove_tree(id).await?;
        self.guids.lock().remove(id);
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
        "checksum": "ignored",
        "roots": {
            "bookmark_bar": {
                "children": [
                    { "date_added": "13300000000000000", "guid": "g-5", "id": "5",
                      "name": "Rust", "type": "url", "url": "https://rust-lang.org" }
                ],
                "date_added": "13200000000000000", "guid": "g-1", "id": "1",
                "name": "Bookmarks bar", "type": "folder"
            },
            "other": { "children": [], "date_added": "0", "id": "2",
                       "name": "Other bookmarks", "type": "folder" },
            "synced": { "children": [], "date_added": "0", "id": "3",
                        "name": "Mobile bookmarks", "type": "folder" }
        },
        "version": 1
    }"#;

    #[test]
    fn test_time_conversion() {
        assert_eq!(chromium_time_to_millis(Some(&json!("11644473600000000"))), 0);
        assert_eq!(millis_to_chromium_time(1_000), "11644473601000000");
    }

    #[test]
    fn test_parse_roots_in_browser_order() {
        let document: Value = serde_json::from_str(SAMPLE).unwrap();
        let mut guids = HashMap::new();
        let root = parse_chromium_bookmarks(&document, &mut guids).unwrap();

        let roots = root.children.as_ref().unwrap();
        assert_eq!(roots.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["1", "2", "3"]);
        let rust = &roots[0].children.as_ref().unwrap()[0];
        assert_eq!(rust.url.as_deref(), Some("https://rust-lang.org"));
        assert_eq!(guids.get("5").map(String::as_str), Some("g-5"));
    }

    #[tokio::test]
    async fn test_profile_host_persists_changes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Bookmarks");
        std::fs::write(&path, SAMPLE).unwrap();

        let host = ChromiumProfileHost::open(&path).unwrap();
        let backup = host.backup().unwrap().unwrap();
        assert!(backup.exists());

        let created = host
            .create(CreateDetails {
                parent_id: "2".into(),
                title: "Tokio".into(),
                url: Some("https://tokio.rs".into()),
                ..CreateDetails::default()
            })
            .await
            .unwrap();
        host.remove_tree("5").await.unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["roots"]["bookmark_bar"]["guid"], json!("g-1"));
        assert_eq!(written["roots"]["bookmark_bar"]["children"], json!([]));
        assert_eq!(written["roots"]["other"]["children"][0]["id"], json!(created.id));
        assert_eq!(written["roots"]["other"]["children"][0]["type"], json!("url"));

        let reopened = ChromiumProfileHost::open(&path).unwrap();
        let children = reopened.get_children("2").await.unwrap();
        assert_eq!(children[0].title, "Tokio");
    }
}
