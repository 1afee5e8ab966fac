use regex::Regex;
use std::ops::ControlFlow;
use std::sync::OnceLock;

use super::{
    Bookmark, BookmarkId, Folder, Leaf, DESCRIPTION_MAX_LENGTH, HORIZONTAL_SEPARATOR_TITLE,
    SEPARATOR_TITLE, VERTICAL_SEPARATOR_TITLE,
};
use crate::text::trim_to_nearest_word;

/// Read-only view shared by canonical bookmarks and native nodes, so
/// traversal and separator detection work on either shape.
pub trait TreeNode: Sized {
    type Id: PartialEq + ?Sized;

    fn node_id(&self) -> &Self::Id;
    fn node_title(&self) -> &str;
    fn node_url(&self) -> Option<&str>;
    fn node_children(&self) -> Option<&[Self]>;

    /// Set when the native store itself flags the node as a separator.
    fn is_explicit_separator(&self) -> bool {
        false
    }
}

impl TreeNode for Bookmark {
    type Id = BookmarkId;

    fn node_id(&self) -> &BookmarkId {
        match self {
            Bookmark::Folder(folder) => &folder.id,
            Bookmark::Leaf(leaf) => &leaf.id,
        }
    }

    fn node_title(&self) -> &str {
        self.title()
    }

    fn node_url(&self) -> Option<&str> {
        self.url()
    }

    fn node_children(&self) -> Option<&[Bookmark]> {
        self.children()
    }
}

/// A search hit together with its position among its siblings.
///
/// The index is taken from where the node actually sits in the array, never
/// from whatever index the native store reported.
#[derive(Debug)]
pub struct Found<'a, T> {
    pub node: &'a T,
    pub index: usize,
}

fn separator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[-─]+$").expect("static regex"))
}

/// Pre-order walk over every node. Returning `ControlFlow::Break` from the
/// visitor stops the walk; nodes already visited stay visited.
pub fn each_bookmark<'a, T, F>(nodes: &'a [T], mut visit: F)
where
    T: TreeNode,
    F: FnMut(&'a T) -> ControlFlow<()>,
{
    let mut stack: Vec<&'a T> = nodes.iter().rev().collect();
    while let Some(node) = stack.pop() {
        if visit(node).is_break() {
            return;
        }
        if let Some(children) = node.node_children() {
            stack.extend(children.iter().rev());
        }
    }
}

pub fn find_by_id<'a, T: TreeNode>(nodes: &'a [T], id: &T::Id) -> Option<Found<'a, T>> {
    for (index, node) in nodes.iter().enumerate() {
        if node.node_id() == id {
            return Some(Found { node, index });
        }
        if let Some(found) = node.node_children().and_then(|c| find_by_id(c, id)) {
            return Some(found);
        }
    }
    None
}

pub fn find_by_id_mut(tree: &mut [Bookmark], id: BookmarkId) -> Option<&mut Bookmark> {
    for node in tree.iter_mut() {
        if node.id() == id {
            return Some(node);
        }
        if let Some(children) = node.children_mut() {
            if let Some(found) = find_by_id_mut(children, id) {
                return Some(found);
            }
        }
    }
    None
}

/// The sibling list holding `id`, with the node's position in it.
pub(crate) fn sibling_list_mut(
    list: &mut Vec<Bookmark>,
    id: BookmarkId,
) -> Option<(&mut Vec<Bookmark>, usize)> {
    if let Some(index) = list.iter().position(|b| b.id() == id) {
        return Some((list, index));
    }
    for node in list.iter_mut() {
        if let Some(children) = node.children_mut() {
            if let Some(found) = sibling_list_mut(children, id) {
                return Some(found);
            }
        }
    }
    None
}

pub fn is_separator<T: TreeNode>(node: &T, new_tab_url: Option<&str>) -> bool {
    if node.is_explicit_separator() {
        return true;
    }

    let title = node.node_title();
    let title_matches = separator_regex().is_match(title)
        || title.contains(HORIZONTAL_SEPARATOR_TITLE)
        || title == VERTICAL_SEPARATOR_TITLE;

    let url_allowed = match node.node_url() {
        None => true,
        Some(url) => url.is_empty() || Some(url) == new_tab_url,
    };

    let childless = node.node_children().map_or(true, |c| c.is_empty());

    title_matches && url_allowed && childless
}

/// Builds a bookmark with id 0. A url makes it a leaf, otherwise it is an
/// empty folder.
pub fn new_bookmark(
    title: &str,
    url: Option<&str>,
    description: Option<&str>,
    tags: Option<Vec<String>>,
) -> Bookmark {
    let title = title.trim().to_string();
    let url = url.map(str::trim).filter(|u| !u.is_empty());

    let Some(url) = url else {
        return Bookmark::Folder(Folder { id: 0, title, children: Vec::new() });
    };

    let description = description
        .map(|d| trim_to_nearest_word(d, DESCRIPTION_MAX_LENGTH))
        .filter(|d| !d.is_empty());

    Bookmark::Leaf(Leaf {
        id: 0,
        title,
        url: Some(url.to_string()),
        description,
        tags: tags.unwrap_or_default(),
    })
}

pub fn new_separator() -> Bookmark {
    Bookmark::Leaf(Leaf { title: SEPARATOR_TITLE.to_string(), ..Leaf::default() })
}

/// One more than the highest id in the tree or in `reserved`.
pub fn get_new_id(tree: &[Bookmark], reserved: &[BookmarkId]) -> BookmarkId {
    let mut highest = reserved.iter().copied().max().unwrap_or(0);
    each_bookmark(tree, |node| {
        highest = highest.max(node.id());
        ControlFlow::Continue(())
    });
    highest + 1
}

/// Drops blank optional fields from a single node. Children are kept as-is.
pub fn clean_bookmark(bookmark: &Bookmark) -> Bookmark {
    match bookmark {
        Bookmark::Folder(folder) => Bookmark::Folder(folder.clone()),
        Bookmark::Leaf(leaf) => Bookmark::Leaf(Leaf {
            id: leaf.id,
            title: leaf.title.clone(),
            url: leaf.url.clone().filter(|u| !u.trim().is_empty()),
            description: leaf.description.clone().filter(|d| !d.trim().is_empty()),
            tags: leaf
                .tags
                .iter()
                .filter(|t| !t.trim().is_empty())
                .cloned()
                .collect(),
        }),
    }
}

/// `clean_bookmark` applied to every node.
pub fn clean_tree(tree: &[Bookmark]) -> Vec<Bookmark> {
    tree.iter()
        .map(|bookmark| match clean_bookmark(bookmark) {
            Bookmark::Folder(mut folder) => {
                folder.children = clean_tree(&folder.children);
                Bookmark::Folder(folder)
            }
            leaf => leaf,
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn leaf(id: BookmarkId, title: &str, url: &str) -> Bookmark {
        new_bookmark(title, Some(url), None, None).with_id(id)
    }

    pub fn folder(id: BookmarkId, title: &str, children: Vec<Bookmark>) -> Bookmark {
        Bookmark::Folder(Folder { id, title: title.to_string(), children })
    }
}


#[cfg(test)]
mod property_tests {
    use super::fixtures::{folder, leaf};
    use super::*;
    use proptest::prelude::*;

    fn arb_tree() -> impl Strategy<Value = Vec<Bookmark>> {
        let node = (1u64..500, "[a-z]{1,8}").prop_map(|(id, title)| {
            leaf(id, &title, &format!("https://{title}.example"))
        });
        let tree = node.prop_recursive(3, 32, 5, |inner| {
            (1u64..500, "[a-z]{1,8}", prop::collection::vec(inner, 0..5))
                .prop_map(|(id, title, children)| folder(id, &title, children))
        });
        prop::collection::vec(tree, 0..5)
    }

    fn all_ids(tree: &[Bookmark]) -> Vec<BookmarkId> {
        let mut ids = Vec::new();
        each_bookmark(tree, |node| {
            ids.push(node.id());
            ControlFlow::Continue(())
        });
        ids
    }

    proptest! {
        #[test]
        fn find_by_id_misses_absent_ids(tree in arb_tree(), missing in 1u64..1000) {
            let ids = all_ids(&tree);
            prop_assume!(!ids.contains(&missing));
            prop_assert!(find_by_id(&tree, &missing).is_none());
        }

        #[test]
        fn new_id_exceeds_tree_and_reservations(
            tree in arb_tree(),
            reserved in prop::collection::vec(1u64..1000, 0..10),
        ) {
            let mut reserved = reserved;
            let first = get_new_id(&tree, &reserved);
            prop_assert!(all_ids(&tree).iter().all(|id| *id < first));
            prop_assert!(reserved.iter().all(|id| *id < first));

            reserved.push(first);
            let second = get_new_id(&tree, &reserved);
            prop_assert!(second > first);
        }

        #[test]
        fn urls_that_are_not_new_tab_are_never_separators(
            title in "[-─]{1,5}",
            host in "[a-z]{1,10}",
        ) {
            let bookmark = leaf(1, &title, &format!("https://{host}.com"));
            prop_assert!(!is_separator(&bookmark, Some("chrome://newtab/")));
        }
    }
}
