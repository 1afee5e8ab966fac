//! Reserved top-level folders.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::helpers::{find_by_id, get_new_id};
use super::{Bookmark, BookmarkId, Folder};

/// Title prefix shared by every reserved container.
const CONTAINER_PREFIX: &str = "[xbs] ";

const LEGACY_OTHER_TITLE: &str = "_other_";
const LEGACY_TOOLBAR_TITLE: &str = "_toolbar_";
const LEGACY_ROOT_TITLE: &str = "_xBrowserSync_";
/// Title given to the legacy root once it is moved under Other.
const LEGACY_ROOT_RELABEL: &str = "Legacy xBrowserSync bookmarks";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookmarkContainer {
    Menu,
    Mobile,
    Other,
    Toolbar,
}

impl BookmarkContainer {
    pub const ALL: [BookmarkContainer; 4] = [
        BookmarkContainer::Menu,
        BookmarkContainer::Mobile,
        BookmarkContainer::Other,
        BookmarkContainer::Toolbar,
    ];

    /// The title the container folder carries in the canonical tree.
    pub fn title(&self) -> &'static str {
        match self {
            BookmarkContainer::Menu => "[xbs] Menu",
            BookmarkContainer::Mobile => "[xbs] Mobile",
            BookmarkContainer::Other => "[xbs] Other",
            BookmarkContainer::Toolbar => "[xbs] Toolbar",
        }
    }

    pub fn from_title(title: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.title() == title)
    }

    /// Human-readable name used when listing trees.
    pub fn display_name(&self) -> &'static str {
        match self {
            BookmarkContainer::Menu => "Bookmarks menu",
            BookmarkContainer::Mobile => "Mobile bookmarks",
            BookmarkContainer::Other => "Other bookmarks",
            BookmarkContainer::Toolbar => "Bookmarks toolbar",
        }
    }
}

/// A folder whose title is one of the reserved container titles.
pub fn is_container(bookmark: &Bookmark) -> bool {
    bookmark.is_folder() && BookmarkContainer::from_title(bookmark.title()).is_some()
}

/// Whether a top-level title looks reserved without matching a known
/// container, e.g. `[xbs] Trash`.
pub(crate) fn has_container_prefix(title: &str) -> bool {
    title.starts_with(CONTAINER_PREFIX)
}

pub fn find_container(container: BookmarkContainer, tree: &[Bookmark]) -> Option<&Bookmark> {
    tree.iter()
        .find(|b| b.is_folder() && b.title() == container.title())
}

/// The top-level folder for `container`, appended with a fresh id when
/// missing and `create_if_missing` is set.
pub fn get_container(
    container: BookmarkContainer,
    tree: &mut Vec<Bookmark>,
    create_if_missing: bool,
) -> Option<&mut Bookmark> {
    let position = tree
        .iter()
        .position(|b| b.is_folder() && b.title() == container.title());

    let index = match position {
        Some(index) => index,
        None if create_if_missing => {
            let id = get_new_id(tree, &[]);
            tree.push(Bookmark::Folder(Folder {
                id,
                title: container.title().to_string(),
                children: Vec::new(),
            }));
            tree.len() - 1
        }
        None => return None,
    };

    tree.get_mut(index)
}

/// The container that holds (or is) the bookmark with `id`.
pub fn get_container_by_bookmark_id(
    id: BookmarkId,
    tree: &[Bookmark],
) -> Option<BookmarkContainer> {
    tree.iter().find_map(|top| {
        let container = BookmarkContainer::from_title(top.title())?;
        let children = top.children()?;
        (top.id() == id || find_by_id(children, &id).is_some()).then_some(container)
    })
}

/// Drops reserved containers that have no children. Other folders are kept
/// even when empty.
pub fn remove_empty_containers(tree: &[Bookmark]) -> Vec<Bookmark> {
    tree.iter()
        .filter(|b| !(is_container(b) && b.children().is_some_and(|c| c.is_empty())))
        .cloned()
        .collect()
}

/// One-time migration of trees written by old clients.
///
/// Legacy container titles are renamed, and the legacy root folder is moved
/// to the top of the Other container under a descriptive title.
pub fn upgrade_legacy_containers(tree: &[Bookmark]) -> Vec<Bookmark> {
    let mut upgraded: Vec<Bookmark> = tree.to_vec();

    for bookmark in upgraded.iter_mut().filter(|b| b.is_folder()) {
        let renamed = match bookmark.title() {
            LEGACY_OTHER_TITLE => Some(BookmarkContainer::Other),
            LEGACY_TOOLBAR_TITLE => Some(BookmarkContainer::Toolbar),
            _ => None,
        };
        if let Some(container) = renamed {
            bookmark.set_title(container.title());
        }
    }

    let legacy_root = upgraded
        .iter()
        .position(|b| b.is_folder() && b.title() == LEGACY_ROOT_TITLE);

    if let Some(position) = legacy_root {
        let mut legacy = upgraded.remove(position);
        legacy.set_title(LEGACY_ROOT_RELABEL);

        if let Some(children) = get_container(BookmarkContainer::Other, &mut upgraded, true)
            .and_then(|other| other.children_mut())
        {
            children.insert(0, legacy);
        }
        info!("📦 Moved legacy bookmarks into {}", BookmarkContainer::Other.title());
    }

    upgraded
}

#[cfg(test)]
mod tests {
    use super::super::helpers::fixtures::{folder, leaf};
    use super::*;

    #[test]
    fn test_get_container_creates_when_asked() {
        let mut tree = vec![folder(1, BookmarkContainer::Other.title(), vec![])];

        assert!(get_container(BookmarkContainer::Toolbar, &mut tree, false).is_none());
        let toolbar = get_container(BookmarkContainer::Toolbar, &mut tree, true).unwrap();
        assert_eq!(toolbar.id(), 2);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[1].title(), "[xbs] Toolbar");
    }

    #[test]
    fn test_remove_empty_containers() {
        let tree = vec![
            folder(1, BookmarkContainer::Menu.title(), vec![]),
            folder(2, BookmarkContainer::Other.title(), vec![leaf(3, "a", "https://a.io")]),
            folder(4, "Plain empty folder", vec![]),
        ];

        let once = remove_empty_containers(&tree);
        assert_eq!(once.len(), 2);
        assert_eq!(once[0].id(), 2);
        assert_eq!(remove_empty_containers(&once), once);
    }

    #[test]
    fn test_container_by_bookmark_id() {
        let tree = vec![
            folder(1, BookmarkContainer::Toolbar.title(), vec![leaf(2, "a", "https://a.io")]),
            folder(3, BookmarkContainer::Other.title(), vec![
                folder(4, "Nested", vec![leaf(5, "b", "https://b.io")]),
            ]),
        ];

        assert_eq!(get_container_by_bookmark_id(2, &tree), Some(BookmarkContainer::Toolbar));
        assert_eq!(get_container_by_bookmark_id(5, &tree), Some(BookmarkContainer::Other));
        assert_eq!(get_container_by_bookmark_id(3, &tree), Some(BookmarkContainer::Other));
        assert_eq!(get_container_by_bookmark_id(42, &tree), None);
    }

    #[test]
    fn test_upgrade_renames_legacy_titles() {
        let tree = vec![
            folder(1, "_other_", vec![leaf(2, "a", "https://a.io")]),
            folder(3, "_toolbar_", vec![]),
        ];

        let upgraded = upgrade_legacy_containers(&tree);
        assert_eq!(upgraded[0].title(), BookmarkContainer::Other.title());
        assert_eq!(upgraded[1].title(), BookmarkContainer::Toolbar.title());
        assert_eq!(upgraded[0].children().unwrap().len(), 1);
    }

    #[test]
    fn test_upgrade_relocates_legacy_root() {
        let tree = vec![
            folder(1, "_xBrowserSync_", vec![leaf(2, "old", "https://old.io")]),
            folder(3, "_other_", vec![leaf(4, "a", "https://a.io")]),
        ];

        let upgraded = upgrade_legacy_containers(&tree);
        assert_eq!(upgraded.len(), 1);
        let other = &upgraded[0];
        assert_eq!(other.title(), BookmarkContainer::Other.title());
        let children = other.children().unwrap();
        assert_eq!(children[0].title(), LEGACY_ROOT_RELABEL);
        assert_eq!(children[0].children().unwrap()[0].id(), 2);
        assert_eq!(children[1].id(), 4);
    }

    #[test]
    fn test_upgrade_is_noop_without_legacy_names() {
        let tree = vec![folder(1, BookmarkContainer::Other.title(), vec![leaf(2, "a", "https://a.io")])];
        assert_eq!(upgrade_legacy_containers(&tree), tree);
    }
}
