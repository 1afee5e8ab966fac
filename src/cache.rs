//! The engine's view of the last committed `(encrypted blob, tree)` pair.
//!
//! Readers get an `Arc` to an immutable snapshot. The queue task is the only
//! committer and replaces the snapshot wholesale, so a reader sees either the
//! tree before a change or the tree after it. A refresh from storage only
//! replaces the snapshot it started from, never a newer commit.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bookmark::Bookmark;
use crate::crypto::CryptoService;
use crate::error::{Result, SyncError};
use crate::remote::RemoteStore;
use crate::store::{KeyValueStore, StoreKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub encrypted: String,
    pub bookmarks: Vec<Bookmark>,
}

#[derive(Default)]
struct CacheState {
    snapshot: Option<Arc<CacheSnapshot>>,
    /// Set while `snapshot` is newer than the persisted blob.
    unpersisted: bool,
}

pub struct CacheManager {
    store: Arc<dyn KeyValueStore>,
    crypto: Arc<dyn CryptoService>,
    remote: Arc<dyn RemoteStore>,
    state: RwLock<CacheState>,
    /// Held around every write of the persisted blob.
    persist_lock: Mutex<()>,
}

fn same_snapshot(a: &Option<Arc<CacheSnapshot>>, b: &Option<Arc<CacheSnapshot>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl CacheManager {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        crypto: Arc<dyn CryptoService>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        Self {
            store,
            crypto,
            remote,
            state: RwLock::new(CacheState::default()),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn encrypt_tree(&self, bookmarks: &[Bookmark]) -> Result<String> {
        let json = serde_json::to_string(bookmarks)?;
        self.crypto.encrypt_data(&json)
    }

    /// Decrypts a blob into a tree. Plaintext that is not a bookmark list is
    /// treated like a bad key.
    pub fn decrypt_tree(&self, encrypted: &str) -> Result<Vec<Bookmark>> {
        let json = self.crypto.decrypt_data(encrypted)?;
        serde_json::from_str(&json)
            .map_err(|e| SyncError::Decryption(format!("decrypted data is not a bookmark tree: {}", e)))
    }

    /// The current snapshot, refreshed when the persisted blob no longer
    /// matches it. With nothing persisted locally the remote copy is fetched
    /// and persisted. A commit that has not reached storage yet is served
    /// as is.
    pub async fn get_cached_bookmarks(&self) -> Result<Arc<CacheSnapshot>> {
        let (seen, unpersisted) = {
            let state = self.state.read();
            (state.snapshot.clone(), state.unpersisted)
        };
        if let Some(current) = seen.as_ref().filter(|_| unpersisted) {
            return Ok(current.clone());
        }

        if let Some(encrypted) = self.store.get_string(StoreKey::Bookmarks).await? {
            if let Some(current) = seen.as_ref().filter(|c| c.encrypted == encrypted) {
                return Ok(current.clone());
            }
            debug!("Cached tree is stale, decrypting stored blob");
            let bookmarks = self.decrypt_tree(&encrypted)?;
            return Ok(self.replace_if_unchanged(&seen, encrypted, bookmarks));
        }

        let remote = self.remote.get_bookmarks().await?;
        let encrypted = remote
            .bookmarks
            .filter(|b| !b.is_empty())
            .ok_or_else(|| SyncError::NotFound("no synced bookmarks".into()))?;
        let bookmarks = self.decrypt_tree(&encrypted)?;

        let _persisting = self.persist_lock.lock().await;
        if !same_snapshot(&self.peek(), &seen) {
            debug!("A tree was committed while fetching the remote copy, keeping it");
            return self
                .peek()
                .ok_or_else(|| SyncError::NotFound("no synced bookmarks".into()));
        }
        self.store
            .set(StoreKey::Bookmarks, Value::String(encrypted.clone()))
            .await?;
        info!("📥 Cached {} bookmark containers from the remote store", bookmarks.len());
        Ok(self.replace_if_unchanged(&seen, encrypted, bookmarks))
    }

    /// Swaps in a freshly read pair unless another one was committed since
    /// `seen` was taken. Returns whichever pair is current afterwards.
    fn replace_if_unchanged(
        &self,
        seen: &Option<Arc<CacheSnapshot>>,
        encrypted: String,
        bookmarks: Vec<Bookmark>,
    ) -> Arc<CacheSnapshot> {
        let mut state = self.state.write();
        if !same_snapshot(&state.snapshot, seen) {
            if let Some(current) = &state.snapshot {
                debug!("A newer tree was committed during refresh, keeping it");
                return current.clone();
            }
        }
        let snapshot = Arc::new(CacheSnapshot { encrypted, bookmarks });
        state.snapshot = Some(snapshot.clone());
        snapshot
    }

    /// Swaps in a pair the remote store has acknowledged. Until [`persist`]
    /// writes it, readers are served this pair without consulting storage.
    ///
    /// [`persist`]: CacheManager::persist
    pub fn commit(&self, encrypted: String, bookmarks: Vec<Bookmark>) -> Arc<CacheSnapshot> {
        let snapshot = Arc::new(CacheSnapshot { encrypted, bookmarks });
        let mut state = self.state.write();
        state.snapshot = Some(snapshot.clone());
        state.unpersisted = true;
        snapshot
    }

    /// Writes the current pair to storage. After a failure the pair stays
    /// unpersisted and the next call writes it again.
    pub async fn persist(&self) -> Result<()> {
        let _persisting = self.persist_lock.lock().await;
        let Some(snapshot) = self.peek() else {
            return Ok(());
        };
        self.store
            .set(StoreKey::Bookmarks, Value::String(snapshot.encrypted.clone()))
            .await?;

        let mut state = self.state.write();
        if state.snapshot.as_ref().is_some_and(|current| Arc::ptr_eq(current, &snapshot)) {
            state.unpersisted = false;
        }
        Ok(())
    }

    /// Commits a pair and persists it.
    pub async fn update(&self, encrypted: String, bookmarks: Vec<Bookmark>) -> Result<Arc<CacheSnapshot>> {
        let snapshot = self.commit(encrypted, bookmarks);
        self.persist().await?;
        Ok(snapshot)
    }

    /// The in-memory snapshot without checking persistence.
    pub fn peek(&self) -> Option<Arc<CacheSnapshot>> {
        self.state.read().snapshot.clone()
    }

    pub fn is_unpersisted(&self) -> bool {
        self.state.read().unpersisted
    }

    /// Size in bytes of the committed encrypted blob, fetching the remote
    /// copy when nothing is cached. Zero when nothing has been synced.
    pub async fn sync_size(&self) -> Result<usize> {
        match self.get_cached_bookmarks().await {
            Ok(snapshot) => Ok(snapshot.encrypted.len()),
            Err(SyncError::NotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub async fn clear(&self) -> Result<()> {
        let _persisting = self.persist_lock.lock().await;
        self.store.remove(StoreKey::Bookmarks).await?;
        *self.state.write() = CacheState::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::helpers::fixtures::{folder, leaf};
    use crate::crypto::PassphraseCrypto;
    use crate::remote::MemoryRemoteStore;
    use crate::store::fixtures::FaultyStore;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn tree() -> Vec<Bookmark> {
        vec![folder(1, "[xbs] Other", vec![leaf(2, "Rust", "https://rust-lang.org")])]
    }

    fn manager(remote: Arc<MemoryRemoteStore>) -> (Arc<MemoryStore>, CacheManager) {
        let store = Arc::new(MemoryStore::new());
        let crypto = Arc::new(PassphraseCrypto::with_iterations("secret", "sync-id", 1_000).unwrap());
        (store.clone(), CacheManager::new(store, crypto, remote))
    }

    #[tokio::test]
    async fn test_nothing_anywhere_is_not_found() {
        let (_, cache) = manager(Arc::new(MemoryRemoteStore::new()));
        assert!(matches!(
            cache.get_cached_bookmarks().await,
            Err(SyncError::NotFound(_))
        ));
        assert_eq!(cache.sync_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fetches_remote_when_nothing_persisted() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (store, cache) = manager(remote.clone());
        let encrypted = cache.encrypt_tree(&tree()).unwrap();
        remote.push_bookmarks(&encrypted).await.unwrap();

        let snapshot = cache.get_cached_bookmarks().await.unwrap();
        assert_eq!(snapshot.bookmarks, tree());
        assert_eq!(
            store.get_string(StoreKey::Bookmarks).await.unwrap().as_deref(),
            Some(encrypted.as_str())
        );
        assert_eq!(cache.sync_size().await.unwrap(), encrypted.len());
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_refreshed() {
        let (store, cache) = manager(Arc::new(MemoryRemoteStore::new()));
        let first = cache.encrypt_tree(&tree()).unwrap();
        let held = cache.update(first, tree()).await.unwrap();

        let mut newer = tree();
        newer[0].children_mut().unwrap().clear();
        let second = cache.encrypt_tree(&newer).unwrap();
        store
            .set(StoreKey::Bookmarks, Value::String(second))
            .await
            .unwrap();

        let refreshed = cache.get_cached_bookmarks().await.unwrap();
        assert_eq!(refreshed.bookmarks, newer);
        // readers holding the old snapshot keep a consistent tree
        assert_eq!(held.bookmarks, tree());
        assert!(Arc::ptr_eq(&refreshed, &cache.get_cached_bookmarks().await.unwrap()));
    }

    #[tokio::test]
    async fn test_undecryptable_blob_is_fatal() {
        let (store, cache) = manager(Arc::new(MemoryRemoteStore::new()));
        let other = PassphraseCrypto::with_iterations("other", "sync-id", 1_000).unwrap();
        let foreign = other.encrypt_data("[]").unwrap();
        store
            .set(StoreKey::Bookmarks, Value::String(foreign))
            .await
            .unwrap();

        let err = cache.get_cached_bookmarks().await.unwrap_err();
        assert!(err.is_fatal());
    }

    fn faulty_manager() -> (Arc<FaultyStore>, CacheManager) {
        let store = Arc::new(FaultyStore::default());
        let crypto = Arc::new(PassphraseCrypto::with_iterations("secret", "sync-id", 1_000).unwrap());
        (store.clone(), CacheManager::new(store, crypto, Arc::new(MemoryRemoteStore::new())))
    }

    #[tokio::test]
    async fn test_unpersisted_commit_is_kept_and_written_later() {
        let (store, cache) = faulty_manager();
        let first = cache.encrypt_tree(&tree()).unwrap();
        cache.update(first.clone(), tree()).await.unwrap();

        let mut newer = tree();
        newer[0].children_mut().unwrap().clear();
        let second = cache.encrypt_tree(&newer).unwrap();

        store.fail_writes_to(Some(StoreKey::Bookmarks));
        assert!(matches!(
            cache.update(second.clone(), newer.clone()).await,
            Err(SyncError::Storage(_))
        ));
        assert!(cache.is_unpersisted());
        // storage still holds the older blob, which must not win
        let served = cache.get_cached_bookmarks().await.unwrap();
        assert_eq!(served.encrypted, second);
        assert_eq!(
            store.get_string(StoreKey::Bookmarks).await.unwrap().as_deref(),
            Some(first.as_str())
        );

        store.fail_writes_to(None);
        cache.persist().await.unwrap();
        assert!(!cache.is_unpersisted());
        assert_eq!(
            store.get_string(StoreKey::Bookmarks).await.unwrap().as_deref(),
            Some(second.as_str())
        );
        assert_eq!(cache.get_cached_bookmarks().await.unwrap().bookmarks, newer);
    }

    #[tokio::test]
    async fn test_slow_refresh_keeps_newer_commit() {
        let (store, cache) = faulty_manager();
        let old_tree = vec![folder(1, "[xbs] Other", vec![leaf(2, "old", "https://old.example")])];
        let new_tree = vec![folder(1, "[xbs] Other", vec![leaf(2, "new", "https://new.example")])];
        let old_blob = cache.encrypt_tree(&old_tree).unwrap();
        let new_blob = cache.encrypt_tree(&new_tree).unwrap();
        store
            .set(StoreKey::Bookmarks, Value::String(old_blob))
            .await
            .unwrap();

        store.set_get_delay(Some(Duration::from_millis(100)));
        let (read, committed) = tokio::join!(cache.get_cached_bookmarks(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cache.update(new_blob.clone(), new_tree.clone()).await
        });
        store.set_get_delay(None);

        committed.unwrap();
        assert_eq!(read.unwrap().encrypted, new_blob);
        let held = cache.peek().unwrap();
        assert_eq!(held.encrypted, new_blob);
        assert_eq!(held.bookmarks, new_tree);
    }

    #[tokio::test]
    async fn test_sync_size_fetches_remote() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let (store, cache) = manager(remote.clone());
        let encrypted = cache.encrypt_tree(&tree()).unwrap();
        remote.push_bookmarks(&encrypted).await.unwrap();

        assert_eq!(cache.sync_size().await.unwrap(), encrypted.len());
        assert_eq!(
            store.get_string(StoreKey::Bookmarks).await.unwrap().as_deref(),
            Some(encrypted.as_str())
        );
        assert!(cache.peek().is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let (_, cache) = manager(Arc::new(MemoryRemoteStore::new()));
        let encrypted = cache.encrypt_tree(&tree()).unwrap();
        cache.update(encrypted, tree()).await.unwrap();
        cache.clear().await.unwrap();
        assert!(cache.peek().is_none());
        assert_eq!(cache.sync_size().await.unwrap(), 0);
    }
}
