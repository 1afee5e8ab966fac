//! Mutations on the canonical tree.
//!
//! Every operation works on a copy and hands back the new tree. The tree
//! passed in is never touched, so a failed operation leaves nothing behind.

use std::ops::ControlFlow;

use super::container::BookmarkContainer;
use super::helpers::{
    each_bookmark, find_by_id, find_by_id_mut, get_new_id, is_separator, new_bookmark,
    new_separator, sibling_list_mut,
};
use super::{Bookmark, BookmarkId, BookmarkMetadata, DESCRIPTION_MAX_LENGTH};
use crate::error::{Result, SyncError};
use crate::platform::Platform;
use crate::text::trim_to_nearest_word;

fn children_of_mut(tree: &mut [Bookmark], parent_id: BookmarkId) -> Result<&mut Vec<Bookmark>> {
    find_by_id_mut(tree, parent_id)
        .ok_or_else(|| SyncError::NotFound(format!("parent {parent_id}")))?
        .children_mut()
        .ok_or_else(|| SyncError::NotFound(format!("folder {parent_id}")))
}

/// Inserts a new bookmark under `parent_id` at `index` (clamped to the child
/// count; `None` appends). Returns the bookmark as stored, with its new id.
pub fn add_bookmark(
    metadata: &BookmarkMetadata,
    parent_id: BookmarkId,
    index: Option<usize>,
    tree: &[Bookmark],
) -> Result<(Bookmark, Vec<Bookmark>)> {
    let mut updated = tree.to_vec();
    let id = get_new_id(&updated, &[]);

    let mut bookmark = new_bookmark(
        &metadata.title,
        metadata.url.as_deref(),
        metadata.description.as_deref(),
        metadata.tags.clone(),
    );
    if is_separator(&bookmark, None) {
        bookmark = new_separator();
    }
    bookmark.set_id(id);

    let children = children_of_mut(&mut updated, parent_id)?;
    let index = index.unwrap_or(children.len()).min(children.len());
    children.insert(index, bookmark.clone());

    Ok((bookmark, updated))
}

/// Inserts an already built bookmark (with its own ids) under `parent_id`.
pub fn insert_bookmark(
    bookmark: Bookmark,
    parent_id: BookmarkId,
    index: Option<usize>,
    tree: &[Bookmark],
) -> Result<Vec<Bookmark>> {
    let mut updated = tree.to_vec();
    let children = children_of_mut(&mut updated, parent_id)?;
    let index = index.unwrap_or(children.len()).min(children.len());
    children.insert(index, bookmark);
    Ok(updated)
}

pub fn modify_bookmark_by_id(
    id: BookmarkId,
    metadata: &BookmarkMetadata,
    tree: &[Bookmark],
    platform: Platform,
) -> Result<Vec<Bookmark>> {
    let mut updated = tree.to_vec();
    let node = find_by_id_mut(&mut updated, id)
        .ok_or_else(|| SyncError::NotFound(id.to_string()))?;

    let new_tab_url = platform.new_tab_url();
    // The placeholder only overwrites urls the browser could have stored.
    let url = match metadata.url.as_deref() {
        Some(url) if url == new_tab_url => match node.url() {
            Some(current) if !platform.url_is_supported(current) => None,
            _ => Some(url),
        },
        other => other,
    };

    let childless = node.children().map_or(true, |c| c.is_empty());
    let candidate = new_bookmark(&metadata.title, url.or(node.url()), None, None);
    if childless && is_separator(&candidate, Some(new_tab_url)) {
        *node = new_separator().with_id(id);
        return Ok(updated);
    }

    match node {
        Bookmark::Folder(folder) => folder.title = metadata.title.trim().to_string(),
        Bookmark::Leaf(leaf) => {
            leaf.title = metadata.title.trim().to_string();
            if let Some(url) = url {
                leaf.url = Some(url.to_string());
            }
            if let Some(description) = &metadata.description {
                leaf.description = Some(trim_to_nearest_word(description, DESCRIPTION_MAX_LENGTH))
                    .filter(|d| !d.is_empty());
            }
            if let Some(tags) = &metadata.tags {
                leaf.tags = tags.clone();
            }
        }
    }

    Ok(updated)
}

pub fn remove_bookmark_by_id(id: BookmarkId, tree: &[Bookmark]) -> Result<Vec<Bookmark>> {
    let mut updated = tree.to_vec();
    let (siblings, index) = sibling_list_mut(&mut updated, id)
        .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
    siblings.remove(index);
    Ok(updated)
}

/// Moves a bookmark under `new_parent_id` at `index`, counted after the
/// bookmark has left its old position.
pub fn move_bookmark(
    id: BookmarkId,
    new_parent_id: BookmarkId,
    index: Option<usize>,
    tree: &[Bookmark],
) -> Result<Vec<Bookmark>> {
    let found = find_by_id(tree, &id).ok_or_else(|| SyncError::NotFound(id.to_string()))?;
    if new_parent_id == id || get_ids_from_descendants(found.node).contains(&new_parent_id) {
        return Err(SyncError::InvalidMove(format!(
            "{id} cannot be moved into its own subtree ({new_parent_id})"
        )));
    }

    let mut updated = tree.to_vec();
    let (siblings, position) = sibling_list_mut(&mut updated, id)
        .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
    let bookmark = siblings.remove(position);

    let children = children_of_mut(&mut updated, new_parent_id)?;
    let index = index.unwrap_or(children.len()).min(children.len());
    children.insert(index, bookmark);

    Ok(updated)
}

/// Puts the children of `parent_id` in the order given. Children missing
/// from `ordered_ids` follow in their previous relative order.
pub fn reorder_children(
    parent_id: BookmarkId,
    ordered_ids: &[BookmarkId],
    tree: &[Bookmark],
) -> Result<Vec<Bookmark>> {
    let mut updated = tree.to_vec();
    let children = children_of_mut(&mut updated, parent_id)?;

    let mut remaining: Vec<Option<Bookmark>> = children.drain(..).map(Some).collect();
    for id in ordered_ids {
        if let Some(slot) = remaining
            .iter_mut()
            .find(|slot| matches!(slot, Some(b) if b.id() == *id))
        {
            children.extend(slot.take());
        }
    }
    children.extend(remaining.into_iter().flatten());

    Ok(updated)
}

/// Ids of every node below `bookmark`, not including its own.
pub fn get_ids_from_descendants(bookmark: &Bookmark) -> Vec<BookmarkId> {
    let mut ids = Vec::new();
    if let Some(children) = bookmark.children() {
        each_bookmark(children, |node| {
            ids.push(node.id());
            ControlFlow::Continue(())
        });
    }
    ids
}

pub fn title_for_display(bookmark: &Bookmark) -> String {
    if bookmark.is_folder() {
        if let Some(container) = BookmarkContainer::from_title(bookmark.title()) {
            return container.display_name().to_string();
        }
    }
    if !bookmark.title().is_empty() {
        return bookmark.title().to_string();
    }

    match bookmark.url() {
        Some(url) => url
            .split_once("://")
            .map_or(url, |(_, rest)| rest)
            .trim_end_matches('/')
            .to_string(),
        None => String::new(),
    }
}
