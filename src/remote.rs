//! Remote store holding the encrypted bookmark blob.
//!
//! The blob is opaque here: the remote only stores and returns it. Every
//! failure maps to `SyncError::RemoteSync`, which callers may retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::store::write_atomically;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBookmarks {
    #[serde(default)]
    pub bookmarks: Option<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAck {
    pub last_updated: DateTime<Utc>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_bookmarks(&self) -> Result<RemoteBookmarks>;
    async fn push_bookmarks(&self, encrypted: &str) -> Result<PushAck>;
}

/// Talks to a bookmark service over HTTP:
/// `GET` / `PUT {service_url}/bookmarks/{sync_id}`.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRemoteStore {
    pub fn new(service_url: &str, sync_id: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bookmark-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/bookmarks/{}", service_url.trim_end_matches('/'), sync_id),
        })
    }
}

fn remote_error(e: reqwest::Error) -> SyncError {
    SyncError::RemoteSync(e.to_string())
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get_bookmarks(&self) -> Result<RemoteBookmarks> {
        debug!("GET {}", self.endpoint);
        let response = self.client.get(&self.endpoint).send().await.map_err(remote_error)?;

        if !response.status().is_success() {
            return Err(SyncError::RemoteSync(format!(
                "GET {} returned {}",
                self.endpoint,
                response.status()
            )));
        }
        response.json::<RemoteBookmarks>().await.map_err(remote_error)
    }

    async fn push_bookmarks(&self, encrypted: &str) -> Result<PushAck> {
        debug!("PUT {} ({} bytes)", self.endpoint, encrypted.len());
        let response = self
            .client
            .put(&self.endpoint)
            .json(&serde_json::json!({ "bookmarks": encrypted }))
            .send()
            .await
            .map_err(remote_error)?;

        if !response.status().is_success() {
            return Err(SyncError::RemoteSync(format!(
                "PUT {} returned {}",
                self.endpoint,
                response.status()
            )));
        }
        response.json::<PushAck>().await.map_err(remote_error)
    }
}

/// A JSON file standing in for the service, e.g. on a shared drive.
pub struct FileRemoteStore {
    path: PathBuf,
}

impl FileRemoteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RemoteStore for FileRemoteStore {
    async fn get_bookmarks(&self) -> Result<RemoteBookmarks> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| SyncError::RemoteSync(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RemoteBookmarks::default()),
            Err(e) => Err(SyncError::RemoteSync(format!("{}: {}", self.path.display(), e))),
        }
    }

    async fn push_bookmarks(&self, encrypted: &str) -> Result<PushAck> {
        let last_updated = Utc::now();
        let payload = RemoteBookmarks {
            bookmarks: Some(encrypted.to_string()),
            last_updated: Some(last_updated),
        };
        let content = serde_json::to_string_pretty(&payload)?;
        write_atomically(&self.path, content.as_bytes())
            .await
            .map_err(|e| SyncError::RemoteSync(e.to_string()))?;
        Ok(PushAck { last_updated })
    }
}

#[derive(Default)]
struct MemoryRemoteState {
    bookmarks: Option<String>,
    last_updated: Option<DateTime<Utc>>,
    failing: bool,
    delay: Option<Duration>,
    pushes: Vec<String>,
}

/// In-process remote with switchable failures and latency.
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<MemoryRemoteState>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bookmarks(encrypted: impl Into<String>) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock();
            state.bookmarks = Some(encrypted.into());
            state.last_updated = Some(Utc::now());
        }
        store
    }

    /// While set, every call fails with a retryable error.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Latency added before each push.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    /// Every blob acknowledged so far, oldest first.
    pub fn pushes(&self) -> Vec<String> {
        self.state.lock().pushes.clone()
    }

    pub fn current(&self) -> Option<String> {
        self.state.lock().bookmarks.clone()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get_bookmarks(&self) -> Result<RemoteBookmarks> {
        let state = self.state.lock();
        if state.failing {
            return Err(SyncError::RemoteSync("remote unavailable".into()));
        }
        Ok(RemoteBookmarks {
            bookmarks: state.bookmarks.clone(),
            last_updated: state.last_updated,
        })
    }

    async fn push_bookmarks(&self, encrypted: &str) -> Result<PushAck> {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.failing {
            return Err(SyncError::RemoteSync("remote unavailable".into()));
        }
        let last_updated = Utc::now();
        state.bookmarks = Some(encrypted.to_string());
        state.last_updated = Some(last_updated);
        state.pushes.push(encrypted.to_string());
        Ok(PushAck { last_updated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_remote_failures_are_retryable() {
        let remote = MemoryRemoteStore::new();
        remote.set_failing(true);
        let err = remote.push_bookmarks("blob").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(remote.pushes().is_empty());

        remote.set_failing(false);
        remote.push_bookmarks("blob").await.unwrap();
        assert_eq!(remote.current().as_deref(), Some("blob"));
    }

    #[tokio::test]
    async fn test_file_remote() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FileRemoteStore::new(temp_dir.path().join("remote.json"));

        assert_eq!(remote.get_bookmarks().await.unwrap(), RemoteBookmarks::default());

        let ack = remote.push_bookmarks("cipher").await.unwrap();
        let fetched = remote.get_bookmarks().await.unwrap();
        assert_eq!(fetched.bookmarks.as_deref(), Some("cipher"));
        assert_eq!(fetched.last_updated, Some(ack.last_updated));
    }

    #[test]
    fn test_http_endpoint() {
        let remote =
            HttpRemoteStore::new("https://api.example.com/", "abc123", Duration::from_secs(5))
                .unwrap();
        assert_eq!(remote.endpoint, "https://api.example.com/bookmarks/abc123");
    }
}
