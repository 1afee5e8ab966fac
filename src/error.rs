//! Error types shared by every part of the sync engine.
//!
//! The core only classifies errors as fatal or retryable. Scheduling a retry
//! (or telling the user) is left to whoever submitted the work.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// An id lookup in the canonical tree missed.
    #[error("Bookmark not found: {0}")]
    NotFound(String),

    /// A native root container could not be located; sync cannot start.
    #[error("Native container not found: {0}")]
    ContainerNotFound(String),

    /// A move would place a folder inside itself.
    #[error("Invalid move: {0}")]
    InvalidMove(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// A native id has no canonical counterpart.
    #[error("No canonical id mapped for native bookmark {0}")]
    IdMapping(String),

    /// Network or API failure while talking to the remote store.
    #[error("Remote sync failed: {0}")]
    RemoteSync(String),

    /// The caller cancelled an in-flight push.
    #[error("Push cancelled before the remote store acknowledged it")]
    Cancelled,

    #[error("Native bookmark host error: {0}")]
    NativeHost(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Import failed: {0}")]
    Import(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Sync queue is closed")]
    QueueClosed,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether the caller may reasonably try the same work again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::RemoteSync(_) | SyncError::Cancelled)
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
