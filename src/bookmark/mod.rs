//! Canonical bookmark tree.
//!
//! A tree is an ordered `Vec<Bookmark>` whose top level holds the reserved
//! containers. Every node carries an integer id that is unique across the
//! whole tree. Folders always serialize a `children` array (possibly empty);
//! leaves never do, which is how the two shapes are told apart on the wire.

pub mod container;
pub mod helpers;
pub mod tree;

use serde::{Deserialize, Serialize};

pub use container::{
    find_container, get_container, get_container_by_bookmark_id, is_container, remove_empty_containers,
    upgrade_legacy_containers, BookmarkContainer,
};
pub use helpers::{
    clean_bookmark, clean_tree, each_bookmark, find_by_id, find_by_id_mut, get_new_id,
    is_separator, new_bookmark, new_separator, Found, TreeNode,
};
pub use tree::{
    add_bookmark, get_ids_from_descendants, insert_bookmark, modify_bookmark_by_id,
    move_bookmark, remove_bookmark_by_id, reorder_children, title_for_display,
};

pub type BookmarkId = u64;

/// Descriptions longer than this are cut back to the nearest word.
pub const DESCRIPTION_MAX_LENGTH: usize = 300;
/// Title given to separators created by the engine.
pub const SEPARATOR_TITLE: &str = "-";
/// Titles containing this marker are treated as horizontal separators.
pub const HORIZONTAL_SEPARATOR_TITLE: &str = "────────────────────";
/// Title used for separators placed on a horizontal toolbar.
pub const VERTICAL_SEPARATOR_TITLE: &str = "|";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bookmark {
    Folder(Folder),
    Leaf(Leaf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    #[serde(default)]
    pub id: BookmarkId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    pub children: Vec<Bookmark>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    #[serde(default)]
    pub id: BookmarkId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// `None` only for separators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// The user-editable part of a bookmark.
///
/// When modifying, `url`, `description` and `tags` left as `None` keep the
/// stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl Bookmark {
    pub fn id(&self) -> BookmarkId {
        match self {
            Bookmark::Folder(folder) => folder.id,
            Bookmark::Leaf(leaf) => leaf.id,
        }
    }

    pub fn set_id(&mut self, id: BookmarkId) {
        match self {
            Bookmark::Folder(folder) => folder.id = id,
            Bookmark::Leaf(leaf) => leaf.id = id,
        }
    }

    pub fn with_id(mut self, id: BookmarkId) -> Self {
        self.set_id(id);
        self
    }

    pub fn title(&self) -> &str {
        match self {
            Bookmark::Folder(folder) => &folder.title,
            Bookmark::Leaf(leaf) => &leaf.title,
        }
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        match self {
            Bookmark::Folder(folder) => folder.title = title.into(),
            Bookmark::Leaf(leaf) => leaf.title = title.into(),
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Bookmark::Folder(_) => None,
            Bookmark::Leaf(leaf) => leaf.url.as_deref(),
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Bookmark::Folder(_) => None,
            Bookmark::Leaf(leaf) => leaf.description.as_deref(),
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            Bookmark::Folder(_) => &[],
            Bookmark::Leaf(leaf) => &leaf.tags,
        }
    }

    pub fn children(&self) -> Option<&[Bookmark]> {
        match self {
            Bookmark::Folder(folder) => Some(&folder.children),
            Bookmark::Leaf(_) => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Bookmark>> {
        match self {
            Bookmark::Folder(folder) => Some(&mut folder.children),
            Bookmark::Leaf(_) => None,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Bookmark::Folder(_))
    }

    pub fn metadata(&self) -> BookmarkMetadata {
        BookmarkMetadata {
            title: self.title().to_string(),
            url: self.url().map(str::to_string),
            description: self.description().map(str::to_string),
            tags: match self {
                Bookmark::Leaf(leaf) if !leaf.tags.is_empty() => Some(leaf.tags.clone()),
                _ => None,
            },
        }
    }
}
