//! Turns native bookmark events into queued [`Change`]s.
//!
//! Handlers only build a change and submit it; they never touch the
//! canonical tree or the network.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::bookmark::{is_separator, DESCRIPTION_MAX_LENGTH};
use crate::change::Change;
use crate::error::Result;
use crate::native::{NativeBookmarkHost, NativeNode};
use crate::platform::Platform;
use crate::queue::{ChangeHandle, SyncQueue};
use crate::text::{strip_tags, tags_from_text, trim_to_nearest_word};

/// Metadata scraped from the page the user is looking at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
}

#[async_trait]
pub trait PageMetadataProvider: Send + Sync {
    async fn current_page(&self) -> Option<PageMetadata>;
}

/// For hosts with no notion of an active page.
pub struct NoPageMetadata;

#[async_trait]
impl PageMetadataProvider for NoPageMetadata {
    async fn current_page(&self) -> Option<PageMetadata> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveInfo {
    pub parent_id: String,
    pub index: usize,
    pub old_parent_id: String,
    pub old_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveInfo {
    pub parent_id: String,
    pub index: usize,
    #[serde(default)]
    pub node: Option<NativeNode>,
}

pub struct ChangeDetector {
    queue: SyncQueue,
    host: Arc<dyn NativeBookmarkHost>,
    platform: Platform,
    pages: Arc<dyn PageMetadataProvider>,
    listening: Arc<AtomicBool>,
}

impl ChangeDetector {
    pub fn new(
        queue: SyncQueue,
        host: Arc<dyn NativeBookmarkHost>,
        platform: Platform,
        pages: Arc<dyn PageMetadataProvider>,
        listening: Arc<AtomicBool>,
    ) -> Self {
        Self { queue, host, platform, pages, listening }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::SeqCst);
    }

    fn submit(&self, change: Change) -> Result<Option<ChangeHandle>> {
        if !self.is_listening() {
            debug!("Ignoring {} event for {} while not listening", change.kind(), change.native_id());
            return Ok(None);
        }
        self.queue.submit(change).map(Some)
    }

    pub async fn on_created(&self, mut node: NativeNode) -> Result<Option<ChangeHandle>> {
        if !self.is_listening() {
            return Ok(None);
        }

        let mut description = None;
        let mut tags = None;
        let enrichable = node.url.is_some() && !is_separator(&node, Some(self.platform.new_tab_url()));
        if enrichable {
            if let Some(page) = self.pages.current_page().await {
                // The user may have switched tabs before the metadata arrived.
                if node.url.as_deref() == Some(page.url.as_str()) {
                    if !page.title.trim().is_empty() {
                        node.title = page.title.trim().to_string();
                    }
                    description = page
                        .description
                        .as_deref()
                        .map(|d| trim_to_nearest_word(strip_tags(d).trim(), DESCRIPTION_MAX_LENGTH))
                        .filter(|d| !d.is_empty());
                    tags = page
                        .keywords
                        .as_deref()
                        .map(tags_from_text)
                        .filter(|t| !t.is_empty());
                } else {
                    debug!("Active page does not match new bookmark {}, not enriching", node.id);
                }
            }
        }

        self.submit(Change::Add { node, description, tags })
    }

    /// The event payload is partial, so the node is fetched again.
    pub async fn on_changed(&self, id: &str) -> Result<Option<ChangeHandle>> {
        if !self.is_listening() {
            return Ok(None);
        }
        let node = self.host.get_subtree(id).await?;
        self.submit(Change::Modify { node })
    }

    pub fn on_moved(&self, id: &str, info: MoveInfo) -> Result<Option<ChangeHandle>> {
        self.submit(Change::Move {
            id: id.to_string(),
            parent_id: info.parent_id,
            old_parent_id: info.old_parent_id,
            index: info.index,
            old_index: info.old_index,
        })
    }

    pub fn on_removed(&self, id: &str, info: RemoveInfo) -> Result<Option<ChangeHandle>> {
        self.submit(Change::Remove {
            id: id.to_string(),
            parent_id: info.parent_id,
            index: info.index,
            node: info.node,
        })
    }

    pub fn on_children_reordered(&self, parent_id: &str, child_ids: Vec<String>) -> Result<Option<ChangeHandle>> {
        self.submit(Change::Reorder {
            parent_id: parent_id.to_string(),
            child_ids,
        })
    }
}
