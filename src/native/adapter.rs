use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{CreateDetails, NativeBookmarkHost, NativeNode, NativeNodeType};
use crate::bookmark::{
    each_bookmark, get_new_id, is_separator, new_bookmark, new_separator, Bookmark,
    BookmarkContainer, BookmarkId, Folder, HORIZONTAL_SEPARATOR_TITLE, VERTICAL_SEPARATOR_TITLE,
};
use crate::error::{Result, SyncError};
use crate::id_mapper::IdMapping;
use crate::platform::Platform;

const OPERA_SEPARATOR_TITLE: &str = "─";
const OPERA_SEPARATOR_URL: &str = "data:text/plain;charset=UTF-8,separator";
/// Guards parent walks against cycles in a misbehaving host.
const MAX_DEPTH: usize = 256;

/// A canonical tree built from the native store, with the native id behind
/// every canonical id.
#[derive(Debug, Clone, Default)]
pub struct ConvertedTree {
    pub bookmarks: Vec<Bookmark>,
    pub mappings: Vec<IdMapping>,
}

pub struct NativeAdapter {
    host: Arc<dyn NativeBookmarkHost>,
    platform: Platform,
}

impl NativeAdapter {
    pub fn new(host: Arc<dyn NativeBookmarkHost>, platform: Platform) -> Self {
        Self { host, platform }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn host(&self) -> &Arc<dyn NativeBookmarkHost> {
        &self.host
    }

    /// Native ids of the platform's root containers. Missing a required root
    /// is fatal: there is nowhere to read or write bookmarks.
    pub async fn container_ids(&self) -> Result<HashMap<BookmarkContainer, String>> {
        let tree = self.host.get_tree().await?;
        let roots: Vec<&NativeNode> = tree
            .iter()
            .flat_map(|root| root.children.iter().flatten())
            .collect();

        let mut ids = HashMap::new();
        for spec in self.platform.root_specs() {
            let found = roots
                .iter()
                .find(|node| spec.ids.contains(&node.id.as_str()))
                .or_else(|| roots.iter().find(|node| spec.titles.contains(&node.title.as_str())));

            match found {
                Some(node) => {
                    ids.insert(spec.container, node.id.clone());
                }
                None if spec.required => {
                    return Err(SyncError::ContainerNotFound(format!(
                        "{} root for {}",
                        self.platform.name(),
                        spec.container.title()
                    )));
                }
                None => debug!("Optional {:?} root not present", spec.container),
            }
        }
        Ok(ids)
    }

    /// The container a folder under the Other root stands in for, when that
    /// container has no root of its own.
    fn lifted_container(
        node: &NativeNode,
        roots: &HashMap<BookmarkContainer, String>,
    ) -> Option<BookmarkContainer> {
        if !node.is_folder() {
            return None;
        }
        BookmarkContainer::from_title(&node.title)
            .filter(|c| *c != BookmarkContainer::Other && !roots.contains_key(c))
    }

    /// The container a native id stands for: one of the roots, or a lifted
    /// container folder directly under Other.
    pub async fn container_for_native_id(
        &self,
        native_id: &str,
    ) -> Result<Option<BookmarkContainer>> {
        let roots = self.container_ids().await?;
        if let Some((container, _)) = roots.iter().find(|(_, id)| id.as_str() == native_id) {
            return Ok(Some(*container));
        }

        let Ok(node) = self.host.get_subtree(native_id).await else {
            return Ok(None);
        };
        let under_other = node.parent_id.is_some()
            && node.parent_id.as_ref() == roots.get(&BookmarkContainer::Other);
        Ok(under_other
            .then(|| Self::lifted_container(&node, &roots))
            .flatten())
    }

    /// Whether the node sits anywhere below the toolbar root.
    pub async fn is_in_toolbar(&self, native_id: &str) -> Result<bool> {
        let roots = self.container_ids().await?;
        let Some(toolbar_id) = roots.get(&BookmarkContainer::Toolbar) else {
            return Ok(false);
        };

        let mut current = native_id.to_string();
        for _ in 0..MAX_DEPTH {
            if current == *toolbar_id {
                return Ok(true);
            }
            let Ok(node) = self.host.get_subtree(&current).await else {
                return Ok(false);
            };
            match node.parent_id {
                Some(parent) => current = parent,
                None => return Ok(false),
            }
        }
        Ok(false)
    }

    /// Position in the canonical parent for a native index. Lifted container
    /// folders under Other take native slots that canonical Other lacks.
    pub async fn canonical_index(&self, native_parent_id: &str, native_index: usize) -> Result<usize> {
        let roots = self.container_ids().await?;
        if roots.get(&BookmarkContainer::Other).map(String::as_str) != Some(native_parent_id) {
            return Ok(native_index);
        }

        let children = self.host.get_children(native_parent_id).await?;
        let lifted_before = children
            .iter()
            .take(native_index)
            .filter(|child| Self::lifted_container(child, &roots).is_some())
            .count();
        Ok(native_index - lifted_before)
    }

    /// Canonical ids for every node under `subtrees`, handed out oldest
    /// `date_added` first so repeated conversions agree. Ids start above
    /// everything in `tree`.
    fn assign_ids(subtrees: &[&NativeNode], tree: &[Bookmark]) -> HashMap<String, BookmarkId> {
        let mut ordered: Vec<&NativeNode> = Vec::new();
        for subtree in subtrees {
            each_bookmark(std::slice::from_ref(*subtree), |node| {
                ordered.push(node);
                ControlFlow::Continue(())
            });
        }
        ordered.sort_by_key(|node| node.date_added);

        let mut ids = HashMap::with_capacity(ordered.len());
        let mut last_assigned = 0;
        for node in ordered {
            last_assigned = get_new_id(tree, &[last_assigned]);
            ids.insert(node.id.clone(), last_assigned);
        }
        ids
    }

    fn to_bookmark(&self, node: &NativeNode, ids: &HashMap<String, BookmarkId>) -> Bookmark {
        let id = ids.get(&node.id).copied().unwrap_or_default();

        if is_separator(node, Some(self.platform.new_tab_url())) {
            return new_separator().with_id(id);
        }
        if node.is_folder() {
            return Bookmark::Folder(Folder {
                id,
                title: node.title.clone(),
                children: node
                    .children
                    .iter()
                    .flatten()
                    .map(|child| self.to_bookmark(child, ids))
                    .collect(),
            });
        }
        new_bookmark(&node.title, node.url.as_deref(), None, None).with_id(id)
    }

    fn collect_mappings(node: &NativeNode, ids: &HashMap<String, BookmarkId>) -> Vec<IdMapping> {
        let mut mappings = Vec::new();
        each_bookmark(std::slice::from_ref(node), |n| {
            if let Some(id) = ids.get(&n.id) {
                mappings.push(IdMapping::new(n.id.clone(), *id));
            }
            ControlFlow::Continue(())
        });
        mappings
    }

    /// Converts one native subtree for insertion into `tree`.
    pub fn convert_native_subtree(
        &self,
        node: &NativeNode,
        tree: &[Bookmark],
    ) -> (Bookmark, Vec<IdMapping>) {
        let ids = Self::assign_ids(&[node], tree);
        (self.to_bookmark(node, &ids), Self::collect_mappings(node, &ids))
    }

    /// Reads the whole native store as a fresh canonical tree. The toolbar is
    /// left out when toolbar sync is off.
    pub async fn native_bookmarks_as_bookmarks(&self, sync_toolbar: bool) -> Result<ConvertedTree> {
        let roots = self.container_ids().await?;

        let mut other_children = Vec::new();
        let mut lifted: HashMap<BookmarkContainer, NativeNode> = HashMap::new();
        if let Some(other_id) = roots.get(&BookmarkContainer::Other) {
            let other = self.host.get_subtree(other_id).await?;
            for child in other.children.unwrap_or_default() {
                match Self::lifted_container(&child, &roots) {
                    Some(container) if !lifted.contains_key(&container) => {
                        lifted.insert(container, child);
                    }
                    _ => other_children.push(child),
                }
            }
        }

        // (container, native folder standing in for it, native children)
        let mut sources: Vec<(BookmarkContainer, Option<String>, Vec<NativeNode>)> = Vec::new();
        for container in BookmarkContainer::ALL {
            if container == BookmarkContainer::Toolbar && !sync_toolbar {
                continue;
            }
            if container == BookmarkContainer::Other && roots.contains_key(&container) {
                sources.push((container, None, std::mem::take(&mut other_children)));
            } else if let Some(root_id) = roots.get(&container) {
                let root = self.host.get_subtree(root_id).await?;
                sources.push((container, None, root.children.unwrap_or_default()));
            } else if let Some(folder) = lifted.remove(&container) {
                sources.push((container, Some(folder.id), folder.children.unwrap_or_default()));
            }
        }

        let mut bookmarks: Vec<Bookmark> = Vec::new();
        let mut mappings = Vec::new();
        for (container, stand_in, _) in &sources {
            let id = get_new_id(&bookmarks, &[]);
            bookmarks.push(Bookmark::Folder(Folder {
                id,
                title: container.title().to_string(),
                children: Vec::new(),
            }));
            if let Some(native_id) = stand_in {
                mappings.push(IdMapping::new(native_id.clone(), id));
            }
        }

        let all_children: Vec<&NativeNode> = sources
            .iter()
            .flat_map(|(_, _, children)| children.iter())
            .collect();
        let ids = Self::assign_ids(&all_children, &bookmarks);

        for ((_, _, children), container) in sources.iter().zip(bookmarks.iter_mut()) {
            if let Some(container_children) = container.children_mut() {
                for child in children {
                    container_children.push(self.to_bookmark(child, &ids));
                    mappings.extend(Self::collect_mappings(child, &ids));
                }
            }
        }

        info!(
            "📖 Read {} native bookmarks from {}",
            ids.len(),
            self.platform.name()
        );
        Ok(ConvertedTree { bookmarks, mappings })
    }

    /// Removes everything under the native roots. The toolbar is kept when
    /// toolbar sync is off.
    pub async fn clear_native_bookmarks(&self, sync_toolbar: bool) -> Result<()> {
        let roots = self.container_ids().await?;
        for (container, root_id) in &roots {
            if *container == BookmarkContainer::Toolbar && !sync_toolbar {
                continue;
            }
            for child in self.host.get_children(root_id).await? {
                self.host.remove_tree(&child.id).await?;
            }
        }
        debug!("Cleared native bookmarks");
        Ok(())
    }

    /// Writes a canonical tree into the (already cleared) native store and
    /// returns the id pairs for every created node.
    pub async fn populate_native(
        &self,
        tree: &[Bookmark],
        sync_toolbar: bool,
    ) -> Result<Vec<IdMapping>> {
        let roots = self.container_ids().await?;
        let mut mappings = Vec::new();

        for top in tree {
            let Some(container) = BookmarkContainer::from_title(top.title()).filter(|_| top.is_folder())
            else {
                warn!("⚠️  Skipping unknown top-level folder '{}'", top.title());
                continue;
            };
            if container == BookmarkContainer::Toolbar && !sync_toolbar {
                continue;
            }
            let children = top.children().unwrap_or_default();

            let parent_id = match roots.get(&container) {
                Some(root_id) => root_id.clone(),
                None => {
                    if children.is_empty() {
                        continue;
                    }
                    let other_id = roots.get(&BookmarkContainer::Other).ok_or_else(|| {
                        SyncError::ContainerNotFound(BookmarkContainer::Other.title().into())
                    })?;
                    let folder = self
                        .host
                        .create(CreateDetails {
                            parent_id: other_id.clone(),
                            title: container.title().to_string(),
                            ..CreateDetails::default()
                        })
                        .await?;
                    mappings.push(IdMapping::new(folder.id.clone(), top.id()));
                    folder.id
                }
            };

            let in_toolbar = container == BookmarkContainer::Toolbar;
            mappings.extend(self.create_native_tree(&parent_id, children, in_toolbar).await?);
        }

        info!("✅ Wrote {} bookmarks to {}", mappings.len(), self.platform.name());
        Ok(mappings)
    }

    fn create_native_tree<'a>(
        &'a self,
        parent_id: &'a str,
        bookmarks: &'a [Bookmark],
        in_toolbar: bool,
    ) -> BoxFuture<'a, Result<Vec<IdMapping>>> {
        async move {
            let mut mappings = Vec::new();
            for bookmark in bookmarks {
                if is_separator(bookmark, None) {
                    let created = self.create_native_separator(parent_id, in_toolbar).await?;
                    mappings.push(IdMapping::new(created.id, bookmark.id()));
                    continue;
                }

                let created = self.host.create(self.create_details(parent_id, bookmark)).await?;
                mappings.push(IdMapping::new(created.id.clone(), bookmark.id()));

                if let Some(children) = bookmark.children() {
                    mappings.extend(self.create_native_tree(&created.id, children, false).await?);
                }
            }
            Ok(mappings)
        }
        .boxed()
    }

    fn create_details(&self, parent_id: &str, bookmark: &Bookmark) -> CreateDetails {
        CreateDetails {
            parent_id: parent_id.to_string(),
            index: None,
            title: bookmark.title().to_string(),
            url: bookmark.url().map(|url| self.platform.supported_url(url)),
            node_type: None,
        }
    }

    /// Each platform draws separators its own way.
    pub async fn create_native_separator(&self, parent_id: &str, in_toolbar: bool) -> Result<NativeNode> {
        let details = match self.platform {
            Platform::Firefox => CreateDetails {
                parent_id: parent_id.to_string(),
                node_type: Some(NativeNodeType::Separator),
                ..CreateDetails::default()
            },
            Platform::Opera => CreateDetails {
                parent_id: parent_id.to_string(),
                title: OPERA_SEPARATOR_TITLE.to_string(),
                url: Some(OPERA_SEPARATOR_URL.to_string()),
                node_type: Some(NativeNodeType::Separator),
                ..CreateDetails::default()
            },
            Platform::Chromium => CreateDetails {
                parent_id: parent_id.to_string(),
                title: if in_toolbar {
                    VERTICAL_SEPARATOR_TITLE
                } else {
                    HORIZONTAL_SEPARATOR_TITLE
                }
                .to_string(),
                url: Some(self.platform.new_tab_url().to_string()),
                ..CreateDetails::default()
            },
        };
        self.host.create(details).await
    }
}
