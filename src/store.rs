//! Persistent key-value storage for the engine's local state.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// The encrypted bookmark blob last committed by the engine.
    Bookmarks,
    SyncBookmarksToolbar,
    SyncEnabled,
    BookmarkIdMappings,
}

impl StoreKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Bookmarks => "bookmarks",
            StoreKey::SyncBookmarksToolbar => "syncBookmarksToolbar",
            StoreKey::SyncEnabled => "syncEnabled",
            StoreKey::BookmarkIdMappings => "bookmarkIdMappings",
        }
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: StoreKey) -> Result<Option<Value>>;
    async fn set(&self, key: StoreKey, value: Value) -> Result<()>;
    async fn remove(&self, key: StoreKey) -> Result<()>;

    async fn get_string(&self, key: StoreKey) -> Result<Option<String>> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    async fn get_bool(&self, key: StoreKey, default: bool) -> Result<bool> {
        Ok(self.get(key).await?.and_then(|v| v.as_bool()).unwrap_or(default))
    }
}

/// Everything kept in memory; used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<StoreKey, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: StoreKey) -> Result<Option<Value>> {
        Ok(self.values.lock().get(&key).cloned())
    }

    async fn set(&self, key: StoreKey, value: Value) -> Result<()> {
        self.values.lock().insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: StoreKey) -> Result<()> {
        self.values.lock().remove(&key);
        Ok(())
    }
}

/// A single JSON object on disk, rewritten through a temp file on every
/// change.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<Value>(&content)? {
                Value::Object(map) => map,
                _ => {
                    return Err(SyncError::Storage(format!(
                        "{} does not hold a JSON object",
                        path.display()
                    )))
                }
            }
        } else {
            Map::new()
        };

        debug!("Opened state store at {:?} ({} keys)", path, values.len());
        Ok(Self { path, values: Mutex::new(values) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, snapshot: Map<String, Value>) -> Result<()> {
        let content = serde_json::to_string_pretty(&Value::Object(snapshot))?;
        write_atomically(&self.path, content.as_bytes()).await
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: StoreKey) -> Result<Option<Value>> {
        Ok(self.values.lock().get(key.as_str()).cloned())
    }

    async fn set(&self, key: StoreKey, value: Value) -> Result<()> {
        let snapshot = {
            let mut values = self.values.lock();
            values.insert(key.as_str().to_string(), value);
            values.clone()
        };
        self.persist(snapshot).await
    }

    async fn remove(&self, key: StoreKey) -> Result<()> {
        let snapshot = {
            let mut values = self.values.lock();
            values.remove(key.as_str());
            values.clone()
        };
        self.persist(snapshot).await
    }
}

/// Writes `content` next to `path` and renames it into place.
pub(crate) async fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SyncError::Storage(format!("invalid path {}", path.display())))?;
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    tokio::fs::write(&temp_path, content).await?;
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(SyncError::Storage(format!(
            "failed to replace {}: {}",
            path.display(),
            e
        )));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store_defaults() {
        let store = MemoryStore::new();
        assert!(store.get_bool(StoreKey::SyncBookmarksToolbar, true).await.unwrap());
        store.set(StoreKey::SyncBookmarksToolbar, json!(false)).await.unwrap();
        assert!(!store.get_bool(StoreKey::SyncBookmarksToolbar, true).await.unwrap());
        assert_eq!(store.get_string(StoreKey::Bookmarks).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_file_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("store.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.set(StoreKey::Bookmarks, json!("blob")).await.unwrap();
        store.set(StoreKey::SyncEnabled, json!(true)).await.unwrap();
        store.remove(StoreKey::SyncEnabled).await.unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get_string(StoreKey::Bookmarks).await.unwrap().as_deref(),
            Some("blob")
        );
        assert_eq!(reopened.get(StoreKey::SyncEnabled).await.unwrap(), None);

        let on_disk: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, json!({ "bookmarks": "blob" }));
    }

    #[test]
    fn test_json_file_store_rejects_non_objects() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(JsonFileStore::open(&path), Err(SyncError::Storage(_))));
    }
}
