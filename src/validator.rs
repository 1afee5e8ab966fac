use std::collections::HashSet;
use std::ops::ControlFlow;

use crate::bookmark::container::has_container_prefix;
use crate::bookmark::{
    clean_bookmark, each_bookmark, is_container, title_for_display, Bookmark, BookmarkContainer,
    BookmarkId,
};

/// Problems found in a canonical tree before it is restored or pushed.
#[derive(Debug, Default)]
pub struct ValidationReport {
    containers_found: Vec<BookmarkContainer>,
    bookmark_count: usize,
    duplicate_ids: Vec<BookmarkId>,
    misplaced_containers: Vec<(BookmarkId, String)>,
    uncleaned: Vec<(BookmarkId, String)>,
    unknown_top_level: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn containers_found(&self) -> &[BookmarkContainer] {
        &self.containers_found
    }

    pub fn duplicate_ids(&self) -> &[BookmarkId] {
        &self.duplicate_ids
    }

    pub fn misplaced_containers(&self) -> &[(BookmarkId, String)] {
        &self.misplaced_containers
    }

    pub fn uncleaned(&self) -> &[(BookmarkId, String)] {
        &self.uncleaned
    }

    pub fn unknown_top_level(&self) -> &[String] {
        &self.unknown_top_level
    }

    /// Uncleaned fields are only a warning; everything else fails.
    pub fn is_valid(&self) -> bool {
        self.duplicate_ids.is_empty()
            && self.misplaced_containers.is_empty()
            && self.unknown_top_level.is_empty()
    }

    pub fn format(&self, detailed: bool) -> String {
        let mut output = String::new();

        output.push_str("\n🔍 Bookmark Tree Validation Report\n");
        output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

        output.push_str("📁 Containers:\n");
        for container in &self.containers_found {
            output.push_str(&format!("  • {}\n", container.display_name()));
        }
        output.push_str(&format!("\n📖 Bookmarks: {}\n\n", self.bookmark_count));

        if !self.duplicate_ids.is_empty() {
            output.push_str("❌ Duplicate IDs:\n");
            for id in &self.duplicate_ids {
                output.push_str(&format!("  • {}\n", id));
            }
            output.push('\n');
        }

        if !self.misplaced_containers.is_empty() {
            output.push_str("❌ Containers below the top level:\n");
            for (id, title) in &self.misplaced_containers {
                output.push_str(&format!("  • {}", title));
                if detailed {
                    output.push_str(&format!(" (id {})", id));
                }
                output.push('\n');
            }
            output.push('\n');
        }

        if !self.unknown_top_level.is_empty() {
            output.push_str("❌ Unknown top-level folders:\n");
            for title in &self.unknown_top_level {
                output.push_str(&format!("  • {}\n", title));
            }
            output.push('\n');
        }

        if !self.uncleaned.is_empty() {
            output.push_str(&format!("⚠️  {} bookmarks carry empty fields\n", self.uncleaned.len()));
            if detailed {
                for (id, title) in &self.uncleaned {
                    output.push_str(&format!("  • {} (id {})\n", title, id));
                }
            }
            output.push('\n');
        }

        output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        if self.is_valid() {
            output.push_str("\n📊 Summary: ✅ tree is valid\n\n");
        } else {
            output.push_str("\n📊 Summary: ❌ tree has problems\n\n");
        }

        output
    }
}

pub fn validate_tree(tree: &[Bookmark]) -> ValidationReport {
    let mut report = ValidationReport::new();

    for top in tree {
        match BookmarkContainer::from_title(top.title()).filter(|_| top.is_folder()) {
            Some(container) => report.containers_found.push(container),
            None => {
                let reason = if has_container_prefix(top.title()) {
                    "reserved prefix"
                } else {
                    "not a container"
                };
                report
                    .unknown_top_level
                    .push(format!("{} ({})", title_for_display(top), reason));
            }
        }
    }

    let mut seen = HashSet::new();
    let mut duplicates = HashSet::new();
    let mut check_id = |id: BookmarkId, report: &mut ValidationReport| {
        if !seen.insert(id) && duplicates.insert(id) {
            report.duplicate_ids.push(id);
        }
    };

    for top in tree {
        check_id(top.id(), &mut report);
        each_bookmark(top.children().unwrap_or_default(), |node| {
            check_id(node.id(), &mut report);
            report.bookmark_count += 1;
            if is_container(node) {
                report.misplaced_containers.push((node.id(), node.title().to_string()));
            }
            if clean_bookmark(node) != *node {
                report.uncleaned.push((node.id(), title_for_display(node)));
            }
            ControlFlow::Continue(())
        });
    }

    report
}
