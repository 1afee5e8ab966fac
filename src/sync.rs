//! The sync engine: one queue task applies native changes and full-tree jobs
//! to the canonical tree, pushes the encrypted result and only then commits
//! it to the cache and the id mapper.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bookmark::{
    add_bookmark, find_by_id, get_container, get_ids_from_descendants, insert_bookmark,
    is_separator, modify_bookmark_by_id, move_bookmark, remove_bookmark_by_id,
    remove_empty_containers, reorder_children, upgrade_legacy_containers, clean_tree, Bookmark,
    BookmarkId, BookmarkMetadata, SEPARATOR_TITLE,
};
use crate::cache::{CacheManager, CacheSnapshot};
use crate::change::{Change, ChangeRecord};
use crate::crypto::CryptoService;
use crate::detector::{ChangeDetector, PageMetadataProvider};
use crate::error::{Result, SyncError};
use crate::id_mapper::{IdMapper, IdMapping};
use crate::native::{NativeAdapter, NativeNode};
use crate::queue::{ChangeHandle, Job, JobKind, SyncQueue, DEFAULT_MAX_RECORDS};
use crate::remote::{PushAck, RemoteStore};
use crate::search::{self, Lookahead, SearchQuery, SearchResult};
use crate::store::{KeyValueStore, StoreKey};

pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SyncEngineOptions {
    /// Upper bound on a single push to the remote store.
    pub push_timeout: Duration,
    /// How many finished jobs the queue remembers.
    pub max_records: usize,
}

impl Default for SyncEngineOptions {
    fn default() -> Self {
        Self {
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            max_records: DEFAULT_MAX_RECORDS,
        }
    }
}

/// State the queue task works on. The task is its only writer.
struct EngineCore {
    adapter: Arc<NativeAdapter>,
    store: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteStore>,
    cache: Arc<CacheManager>,
    mapper: RwLock<IdMapper>,
    listening: Arc<AtomicBool>,
    push_timeout: Duration,
}

pub struct SyncEngine {
    core: Arc<EngineCore>,
    queue: SyncQueue,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Loads the persisted id mappings and starts the queue task. Must be
    /// called inside a tokio runtime.
    pub async fn start(
        adapter: NativeAdapter,
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStore>,
        crypto: Arc<dyn CryptoService>,
        options: SyncEngineOptions,
    ) -> Result<Self> {
        if options.push_timeout.is_zero() {
            return Err(SyncError::InvalidConfig("push timeout must be positive".into()));
        }

        let mapper = IdMapper::load(store.as_ref()).await?;
        debug!("Loaded {} id mappings", mapper.len());

        let cache = Arc::new(CacheManager::new(store.clone(), crypto, remote.clone()));
        let core = Arc::new(EngineCore {
            adapter: Arc::new(adapter),
            store,
            remote,
            cache,
            mapper: RwLock::new(mapper),
            listening: Arc::new(AtomicBool::new(true)),
            push_timeout: options.push_timeout,
        });

        let (queue, receiver) = SyncQueue::new(options.max_records);
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(drain_queue(core.clone(), queue.clone(), receiver, shutdown.clone()));

        info!("🚀 Sync engine started for {}", core.adapter.platform().name());
        Ok(Self {
            core,
            queue,
            shutdown,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn adapter(&self) -> &NativeAdapter {
        &self.core.adapter
    }

    pub fn cache(&self) -> &CacheManager {
        &self.core.cache
    }

    pub fn submit(&self, change: Change) -> Result<ChangeHandle> {
        self.queue.submit(change)
    }

    pub fn submit_with_cancel(&self, change: Change, cancel: CancellationToken) -> Result<ChangeHandle> {
        self.queue.submit_with_cancel(change, cancel)
    }

    /// Replaces the remote copy with the native bookmarks and enables sync.
    pub fn upload(&self) -> Result<ChangeHandle> {
        self.queue.enqueue(JobKind::Upload, CancellationToken::new())
    }

    /// Replaces the native bookmarks with the remote copy.
    pub fn pull(&self) -> Result<ChangeHandle> {
        self.queue.enqueue(JobKind::Pull, CancellationToken::new())
    }

    /// Pushes `bookmarks` as the new remote copy and writes them natively.
    pub fn restore(&self, bookmarks: Vec<Bookmark>) -> Result<ChangeHandle> {
        self.queue.enqueue(JobKind::Restore(bookmarks), CancellationToken::new())
    }

    pub fn disable_sync(&self) -> Result<ChangeHandle> {
        self.queue.enqueue(JobKind::Disable, CancellationToken::new())
    }

    /// A detector feeding this engine's queue.
    pub fn detector(&self, pages: Arc<dyn PageMetadataProvider>) -> ChangeDetector {
        ChangeDetector::new(
            self.queue.clone(),
            self.core.adapter.host().clone(),
            self.core.adapter.platform(),
            pages,
            self.core.listening.clone(),
        )
    }

    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    pub fn current_change(&self) -> Option<ChangeRecord> {
        self.queue.current()
    }

    pub fn records(&self) -> Vec<ChangeRecord> {
        self.queue.records()
    }

    pub fn id_mappings(&self) -> Vec<IdMapping> {
        self.core.mapper.read().mappings()
    }

    pub fn is_listening(&self) -> bool {
        self.core.listening.load(Ordering::SeqCst)
    }

    pub fn set_listening(&self, listening: bool) {
        self.core.listening.store(listening, Ordering::SeqCst);
    }

    pub async fn is_sync_enabled(&self) -> Result<bool> {
        self.core.store.get_bool(StoreKey::SyncEnabled, false).await
    }

    pub async fn sync_toolbar(&self) -> Result<bool> {
        self.core.sync_toolbar().await
    }

    pub async fn set_sync_toolbar(&self, enabled: bool) -> Result<()> {
        self.core
            .store
            .set(StoreKey::SyncBookmarksToolbar, Value::Bool(enabled))
            .await
    }

    /// The committed tree. Safe to call while a change is being applied.
    pub async fn get_cached_bookmarks(&self) -> Result<Arc<CacheSnapshot>> {
        self.core.cache.get_cached_bookmarks().await
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let snapshot = self.get_cached_bookmarks().await?;
        Ok(search::search(&snapshot.bookmarks, query))
    }

    pub async fn lookahead(
        &self,
        word: &str,
        tags_only: bool,
        exclusions: &[String],
    ) -> Result<Option<Lookahead>> {
        let snapshot = self.get_cached_bookmarks().await?;
        Ok(search::lookahead(word, &snapshot.bookmarks, tags_only, exclusions))
    }

    pub async fn find_current_url_in_bookmarks(&self, url: &str) -> Result<Option<Bookmark>> {
        let snapshot = self.get_cached_bookmarks().await?;
        Ok(search::find_current_url_in_bookmarks(&snapshot.bookmarks, url))
    }

    /// The bookmarks as they should be saved to a file: native bookmarks
    /// while sync is off, otherwise the remote copy without empty containers
    /// or empty fields.
    pub async fn export_bookmarks(&self) -> Result<Vec<Bookmark>> {
        if !self.is_sync_enabled().await? {
            let sync_toolbar = self.core.sync_toolbar().await?;
            let converted = self.core.adapter.native_bookmarks_as_bookmarks(sync_toolbar).await?;
            return Ok(converted.bookmarks);
        }

        let remote = self.core.remote.get_bookmarks().await?;
        let encrypted = remote
            .bookmarks
            .filter(|b| !b.is_empty())
            .ok_or_else(|| SyncError::NotFound("no synced bookmarks".into()))?;
        let bookmarks = self.core.cache.decrypt_tree(&encrypted)?;
        Ok(clean_tree(&remove_empty_containers(&bookmarks)))
    }

    /// Size of the encrypted sync data; zero while sync is off.
    pub async fn sync_size(&self) -> Result<usize> {
        if !self.is_sync_enabled().await? {
            return Ok(0);
        }
        self.core.cache.sync_size().await
    }

    /// Stops the queue task after the job in hand. Jobs still queued fail
    /// with `QueueClosed`.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("❌ Sync queue task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn drain_queue(
    core: Arc<EngineCore>,
    queue: SyncQueue,
    mut receiver: mpsc::UnboundedReceiver<Job>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let Job { seq, kind, cancel, respond } = job;
        queue.mark_applying(seq);

        let outcome = if cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            core.run(kind, &cancel).await
        };
        match &outcome {
            Ok(()) => debug!("Job #{} applied", seq),
            Err(e) if e.is_retryable() => warn!("⚠️  Job #{} failed, may be retried: {}", seq, e),
            Err(e) => error!("❌ Job #{} failed: {}", seq, e),
        }

        queue.mark_finished(seq, &outcome);
        // The submitter may have dropped its handle.
        let _ = respond.send(outcome);
    }
    debug!("Sync queue task stopped");
}

impl EngineCore {
    async fn run(&self, kind: JobKind, cancel: &CancellationToken) -> Result<()> {
        match kind {
            JobKind::Change(change) => self.apply_change(change, cancel).await,
            JobKind::Upload => self.upload(cancel).await,
            JobKind::Pull => self.pull().await,
            JobKind::Restore(bookmarks) => self.restore(bookmarks, cancel).await,
            JobKind::Disable => self.disable().await,
        }
    }

    async fn sync_toolbar(&self) -> Result<bool> {
        self.store.get_bool(StoreKey::SyncBookmarksToolbar, true).await
    }

    async fn push(&self, encrypted: &str, cancel: &CancellationToken) -> Result<PushAck> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            pushed = tokio::time::timeout(self.push_timeout, self.remote.push_bookmarks(encrypted)) => {
                pushed.map_err(|_| {
                    SyncError::RemoteSync(format!("push timed out after {:?}", self.push_timeout))
                })?
            }
        }
    }

    /// Swaps in a pushed tree together with its id mappings, then saves both.
    /// The remote store already holds the tree, so a failed save is logged
    /// and the next commit saves the current state again.
    async fn commit(&self, encrypted: String, bookmarks: Vec<Bookmark>, mapper: IdMapper) {
        self.cache.commit(encrypted, bookmarks);
        *self.mapper.write() = mapper;

        if let Err(e) = self.cache.persist().await {
            warn!("⚠️  Bookmarks not saved locally, retrying on next commit: {}", e);
        }
        let mapper = self.mapper.read().clone();
        if let Err(e) = mapper.save(self.store.as_ref()).await {
            warn!("⚠️  Id mappings not saved locally, retrying on next commit: {}", e);
        }
    }

    async fn apply_change(&self, change: Change, cancel: &CancellationToken) -> Result<()> {
        if !self.store.get_bool(StoreKey::SyncEnabled, false).await? {
            debug!("Sync disabled, dropping {} change", change.kind());
            return Ok(());
        }
        let Some(change) = self.scope_to_synced_roots(change).await? else {
            return Ok(());
        };

        let snapshot = self.cache.get_cached_bookmarks().await?;
        let mut tree = snapshot.bookmarks.clone();
        let mut mapper = self.mapper.read().clone();

        let kind = change.kind();
        let Some(updated) = self.mutate(change, &mut tree, &mut mapper).await? else {
            return Ok(());
        };

        let encrypted = self.cache.encrypt_tree(&updated)?;
        let ack = self.push(&encrypted, cancel).await?;
        self.commit(encrypted, updated, mapper).await;

        info!("✅ Synced {} change at {}", kind, ack.last_updated);
        Ok(())
    }

    /// Drops or rewrites toolbar events when the toolbar is not synced.
    async fn scope_to_synced_roots(&self, change: Change) -> Result<Option<Change>> {
        if self.sync_toolbar().await? {
            return Ok(Some(change));
        }
        let adapter = &self.adapter;

        let scoped = match change {
            Change::Move { id, parent_id, old_parent_id, index, old_index } => {
                let from_toolbar = adapter.is_in_toolbar(&old_parent_id).await?;
                let to_toolbar = adapter.is_in_toolbar(&parent_id).await?;
                match (from_toolbar, to_toolbar) {
                    (true, true) => None,
                    (true, false) => {
                        let node = adapter.host().get_subtree(&id).await?;
                        Some(Change::Add { node, description: None, tags: None })
                    }
                    (false, true) => Some(Change::Remove {
                        id,
                        parent_id: old_parent_id,
                        index: old_index,
                        node: None,
                    }),
                    (false, false) => Some(Change::Move { id, parent_id, old_parent_id, index, old_index }),
                }
            }
            other => {
                let in_toolbar = match &other {
                    Change::Add { node, .. } => {
                        adapter.is_in_toolbar(node.parent_id.as_deref().unwrap_or_default()).await?
                    }
                    Change::Modify { node } => adapter.is_in_toolbar(&node.id).await?,
                    Change::Remove { parent_id, .. } | Change::Reorder { parent_id, .. } => {
                        adapter.is_in_toolbar(parent_id).await?
                    }
                    Change::Move { .. } => false,
                };
                (!in_toolbar).then_some(other)
            }
        };

        if scoped.is_none() {
            debug!("Toolbar sync disabled, ignoring toolbar change");
        }
        Ok(scoped)
    }

    /// Canonical id for a native parent: a container (created in `tree` when
    /// missing) or a mapped folder.
    async fn resolve_parent(
        &self,
        native_parent_id: &str,
        tree: &mut Vec<Bookmark>,
        mapper: &IdMapper,
    ) -> Result<BookmarkId> {
        if let Some(container) = self.adapter.container_for_native_id(native_parent_id).await? {
            return get_container(container, tree, true)
                .map(|c| c.id())
                .ok_or_else(|| SyncError::ContainerNotFound(container.title().to_string()));
        }
        mapper
            .get_by_native(native_parent_id)
            .ok_or_else(|| SyncError::IdMapping(native_parent_id.to_string()))
    }

    fn mapped(mapper: &IdMapper, native_id: &str) -> Result<BookmarkId> {
        mapper
            .get_by_native(native_id)
            .ok_or_else(|| SyncError::IdMapping(native_id.to_string()))
    }

    fn metadata_for(&self, node: &NativeNode) -> BookmarkMetadata {
        let new_tab_url = self.adapter.platform().new_tab_url();
        if is_separator(node, Some(new_tab_url)) {
            return BookmarkMetadata {
                title: SEPARATOR_TITLE.to_string(),
                ..BookmarkMetadata::default()
            };
        }
        BookmarkMetadata {
            title: node.title.clone(),
            url: node.url.clone(),
            ..BookmarkMetadata::default()
        }
    }

    /// Applies one change to `tree` (already a private copy). `None` means
    /// there is nothing to sync.
    async fn mutate(
        &self,
        change: Change,
        tree: &mut Vec<Bookmark>,
        mapper: &mut IdMapper,
    ) -> Result<Option<Vec<Bookmark>>> {
        let platform = self.adapter.platform();

        match change {
            Change::Add { node, description, tags } => {
                let native_parent = node
                    .parent_id
                    .clone()
                    .ok_or_else(|| SyncError::NativeHost(format!("node {} has no parent", node.id)))?;
                let parent_id = self.resolve_parent(&native_parent, tree, mapper).await?;
                let index = self.adapter.canonical_index(&native_parent, node.index).await?;

                if node.children.as_ref().is_some_and(|c| !c.is_empty()) {
                    let (bookmark, mappings) = self.adapter.convert_native_subtree(&node, tree);
                    let updated = insert_bookmark(bookmark, parent_id, Some(index), tree)?;
                    mapper.extend(mappings);
                    return Ok(Some(updated));
                }

                let mut metadata = self.metadata_for(&node);
                if metadata.url.is_some() {
                    metadata.description = description;
                    metadata.tags = tags;
                }
                let (added, updated) = add_bookmark(&metadata, parent_id, Some(index), tree)?;
                mapper.add(node.id, added.id());
                Ok(Some(updated))
            }

            Change::Modify { node } => {
                if self.adapter.container_for_native_id(&node.id).await?.is_some() {
                    debug!("Ignoring edit of container {}", node.id);
                    return Ok(None);
                }
                let id = Self::mapped(mapper, &node.id)?;
                let mut metadata = self.metadata_for(&node);
                if metadata.title == SEPARATOR_TITLE && metadata.url.is_none() {
                    metadata.url = Some(platform.new_tab_url().to_string());
                }
                Ok(Some(modify_bookmark_by_id(id, &metadata, tree, platform)?))
            }

            Change::Move { id, parent_id, index, .. } => {
                let bookmark_id = Self::mapped(mapper, &id)?;
                let new_parent = self.resolve_parent(&parent_id, tree, mapper).await?;
                let index = self.adapter.canonical_index(&parent_id, index).await?;
                Ok(Some(move_bookmark(bookmark_id, new_parent, Some(index), tree)?))
            }

            Change::Remove { id, .. } => {
                let bookmark_id = Self::mapped(mapper, &id)?;
                let removed_ids = match find_by_id(tree.as_slice(), &bookmark_id) {
                    Some(found) => get_ids_from_descendants(found.node),
                    None => Vec::new(),
                };
                let updated = remove_bookmark_by_id(bookmark_id, tree)?;
                for canonical_id in removed_ids.into_iter().chain([bookmark_id]) {
                    mapper.remove_canonical(canonical_id);
                }
                Ok(Some(updated))
            }

            Change::Reorder { parent_id, child_ids } => {
                let parent = self.resolve_parent(&parent_id, tree, mapper).await?;
                let ordered = child_ids
                    .iter()
                    .map(|child| Self::mapped(mapper, child))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(reorder_children(parent, &ordered, tree)?))
            }
        }
    }

    async fn upload(&self, cancel: &CancellationToken) -> Result<()> {
        info!("📖 Phase 1: Reading native bookmarks");
        let sync_toolbar = self.sync_toolbar().await?;
        let converted = self.adapter.native_bookmarks_as_bookmarks(sync_toolbar).await?;

        info!("🔐 Phase 2: Encrypting {} containers", converted.bookmarks.len());
        let encrypted = self.cache.encrypt_tree(&converted.bookmarks)?;

        info!("📤 Phase 3: Pushing to the remote store");
        self.push(&encrypted, cancel).await?;

        self.commit(encrypted, converted.bookmarks, IdMapper::from(converted.mappings))
            .await;
        self.store.set(StoreKey::SyncEnabled, Value::Bool(true)).await?;
        info!("✅ Upload complete");
        Ok(())
    }

    async fn pull(&self) -> Result<()> {
        info!("📥 Phase 1: Fetching the remote copy");
        let remote = self.remote.get_bookmarks().await?;
        let encrypted = remote
            .bookmarks
            .filter(|b| !b.is_empty())
            .ok_or_else(|| SyncError::NotFound("no synced bookmarks".into()))?;
        let bookmarks = self.cache.decrypt_tree(&encrypted)?;

        let upgraded = upgrade_legacy_containers(&bookmarks);
        let encrypted = if upgraded != bookmarks {
            self.cache.encrypt_tree(&upgraded)?
        } else {
            encrypted
        };

        info!("✍️  Phase 2: Writing native bookmarks");
        let mappings = self.write_native(&upgraded).await?;

        self.commit(encrypted, upgraded, IdMapper::from(mappings)).await;
        self.store.set(StoreKey::SyncEnabled, Value::Bool(true)).await?;
        info!("✅ Pull complete");
        Ok(())
    }

    async fn restore(&self, bookmarks: Vec<Bookmark>, cancel: &CancellationToken) -> Result<()> {
        let upgraded = upgrade_legacy_containers(&bookmarks);

        info!("📤 Phase 1: Pushing restored bookmarks");
        let encrypted = self.cache.encrypt_tree(&upgraded)?;
        self.push(&encrypted, cancel).await?;

        info!("✍️  Phase 2: Writing native bookmarks");
        let mappings = self.write_native(&upgraded).await?;

        self.commit(encrypted, upgraded, IdMapper::from(mappings)).await;
        self.store.set(StoreKey::SyncEnabled, Value::Bool(true)).await?;
        info!("✅ Restore complete");
        Ok(())
    }

    /// Rebuilds the native store from `bookmarks` with event capture off so
    /// the engine's own writes are not raised as changes.
    async fn write_native(&self, bookmarks: &[Bookmark]) -> Result<Vec<IdMapping>> {
        let sync_toolbar = self.sync_toolbar().await?;
        let was_listening = self.listening.swap(false, Ordering::SeqCst);

        let written = async {
            self.adapter.clear_native_bookmarks(sync_toolbar).await?;
            self.adapter.populate_native(bookmarks, sync_toolbar).await
        }
        .await;

        self.listening.store(was_listening, Ordering::SeqCst);
        written
    }

    async fn disable(&self) -> Result<()> {
        self.store.set(StoreKey::SyncEnabled, Value::Bool(false)).await?;
        self.cache.clear().await?;
        self.store.remove(StoreKey::BookmarkIdMappings).await?;
        *self.mapper.write() = IdMapper::new();
        info!("🛑 Sync disabled");
        Ok(())
    }
}
