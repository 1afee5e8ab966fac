//! Keyword, url and lookahead queries over a canonical tree.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::OnceLock;

use crate::bookmark::{each_bookmark, is_container, is_separator, Bookmark};
use crate::text::split_text_into_words;

/// Lookahead candidates shorter than this are ignored.
const MIN_LOOKAHEAD_LENGTH: usize = 3;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    pub url: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub bookmark: Bookmark,
    pub score: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lookahead {
    /// The completed word.
    pub suggestion: String,
    /// The partial word the suggestion completes.
    pub word: String,
}

fn host_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:[a-z][\w+.-]*://)?((?:www\.)?([^/?#:]+))").expect("static regex"))
}

fn is_searchable(node: &Bookmark) -> bool {
    !node.is_folder() && node.url().is_some() && !is_separator(node, None)
}

/// Every leaf whose url contains `url`, ignoring case, in tree order.
pub fn search_by_url(tree: &[Bookmark], url: &str) -> Vec<Bookmark> {
    let needle = url.to_lowercase();
    let mut hits = Vec::new();
    each_bookmark(tree, |node| {
        if let Some(candidate) = node.url() {
            if candidate.to_lowercase().contains(&needle) {
                hits.push(node.clone());
            }
        }
        ControlFlow::Continue(())
    });
    hits
}

fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

/// Leaves where every keyword prefixes at least one word of the title,
/// description or tags. With no keywords every leaf matches with score 0.
pub fn search_by_keywords(tree: &[Bookmark], keywords: &[String]) -> Vec<SearchResult> {
    let keywords = normalize_keywords(keywords);
    let mut results = Vec::new();

    each_bookmark(tree, |node| {
        if !is_searchable(node) {
            return ControlFlow::Continue(());
        }

        let text = format!(
            "{} {} {}",
            node.title(),
            node.description().unwrap_or_default(),
            node.tags().join(" ")
        );
        let words = split_text_into_words(&text);

        let mut score = 0;
        for keyword in &keywords {
            let count = words.iter().filter(|w| w.starts_with(keyword.as_str())).count();
            if count == 0 {
                return ControlFlow::Continue(());
            }
            score += count;
        }

        results.push(SearchResult { bookmark: node.clone(), score });
        ControlFlow::Continue(())
    });

    results
}

/// Url hits narrowed by keywords, ordered by score then by newest id.
pub fn search(tree: &[Bookmark], query: &SearchQuery) -> Vec<SearchResult> {
    let mut results = match query.url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => search_by_keywords(&search_by_url(tree, url), &query.keywords),
        None => search_by_keywords(tree, &query.keywords),
    };

    results.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.bookmark.id().cmp(&a.bookmark.id()))
    });
    results
}

/// The bookmark whose url is exactly `url`, ignoring case.
pub fn find_current_url_in_bookmarks(tree: &[Bookmark], url: &str) -> Option<Bookmark> {
    let wanted = url.to_lowercase();
    search_by_url(tree, url)
        .into_iter()
        .find(|b| b.url().is_some_and(|u| u.to_lowercase() == wanted))
}

fn lookahead_candidates(node: &Bookmark, tags_only: bool) -> Vec<String> {
    let mut candidates = Vec::new();

    if !tags_only {
        candidates.extend(split_text_into_words(node.title()));
    }

    for tag in node.tags() {
        candidates.extend(tag.split_whitespace().map(str::to_lowercase));
    }

    if !tags_only {
        if let Some(caps) = node.url().and_then(|url| host_regex().captures(url)) {
            let host = caps[1].to_lowercase();
            let bare = caps[2].to_lowercase();
            if host != bare {
                candidates.push(host);
            }
            candidates.push(bare);
        }
    }

    candidates
}

/// Suggests a completion for `word` drawn from the words in the tree.
///
/// The most frequent candidate wins; among equally frequent ones the
/// shortest, then the first seen.
pub fn lookahead(
    word: &str,
    tree: &[Bookmark],
    tags_only: bool,
    exclusions: &[String],
) -> Option<Lookahead> {
    let word = word.trim().to_lowercase();
    if word.is_empty() {
        return None;
    }
    let exclusions: Vec<String> = exclusions.iter().map(|e| e.to_lowercase()).collect();

    let mut candidates = Vec::new();
    each_bookmark(tree, |node| {
        if !is_container(node) && !is_separator(node, None) {
            candidates.extend(
                lookahead_candidates(node, tags_only)
                    .into_iter()
                    .filter(|c| c.starts_with(&word))
                    .filter(|c| c.chars().count() >= MIN_LOOKAHEAD_LENGTH)
                    .filter(|c| !exclusions.contains(c)),
            );
        }
        ControlFlow::Continue(())
    });

    candidates.sort_by_key(|c| c.chars().count());

    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for candidate in &candidates {
        let count = counts.entry(candidate.as_str()).or_insert(0);
        if *count == 0 {
            order.push(candidate.as_str());
        }
        *count += 1;
    }

    let best = order.iter().copied().fold(None, |best: Option<(&str, usize)>, c| {
        let count = counts[c];
        match best {
            Some((_, top)) if top >= count => best,
            _ => Some((c, count)),
        }
    })?;

    Some(Lookahead { suggestion: best.0.to_string(), word })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::helpers::fixtures::{folder, leaf};
    use crate::bookmark::{new_bookmark, new_separator};

    fn tree() -> Vec<Bookmark> {
        vec![folder(
            10,
            "[xbs] Other",
            vec![
                leaf(1, "Golang Docs", "https://go.dev/doc"),
                leaf(2, "Go Home", "https://www.go.dev"),
                new_separator().with_id(3),
                new_bookmark(
                    "Tokio",
                    Some("https://tokio.rs"),
                    Some("Asynchronous runtime"),
                    Some(vec!["rust".into(), "async io".into()]),
                )
                .with_id(4),
            ],
        )]
    }

    fn ids(results: &[SearchResult]) -> Vec<u64> {
        results.iter().map(|r| r.bookmark.id()).collect()
    }

    #[test]
    fn test_keyword_ties_break_on_newest_id() {
        let tree = vec![folder(
            10,
            "[xbs] Other",
            vec![leaf(1, "Golang Docs", "https://a.io"), leaf(2, "Go Home", "https://b.io")],
        )];
        let results = search(&tree, &SearchQuery { url: None, keywords: vec!["go".into()] });
        assert_eq!(ids(&results), vec![2, 1]);
        assert!(results.iter().all(|r| r.score == 1));
    }

    #[test]
    fn test_every_keyword_must_match() {
        let query = SearchQuery { url: None, keywords: vec!["go".into(), "docs".into()] };
        assert_eq!(ids(&search(&tree(), &query)), vec![1]);

        let query = SearchQuery { url: None, keywords: vec!["ASYNC".into()] };
        let results = search(&tree(), &query);
        assert_eq!(ids(&results), vec![4]);
        // description "asynchronous" and tag "async"
        assert_eq!(results[0].score, 2);
    }

    #[test]
    fn test_url_search_then_keywords() {
        let hits = search_by_url(&tree(), "GO.DEV");
        assert_eq!(hits.iter().map(Bookmark::id).collect::<Vec<_>>(), vec![1, 2]);

        let query = SearchQuery { url: Some("go.dev".into()), keywords: vec!["home".into()] };
        assert_eq!(ids(&search(&tree(), &query)), vec![2]);
    }

    #[test]
    fn test_no_keywords_lists_leaves_only() {
        let results = search(&tree(), &SearchQuery::default());
        assert_eq!(ids(&results), vec![4, 2, 1]);
    }

    #[test]
    fn test_find_current_url() {
        assert_eq!(
            find_current_url_in_bookmarks(&tree(), "HTTPS://TOKIO.RS").map(|b| b.id()),
            Some(4)
        );
        assert!(find_current_url_in_bookmarks(&tree(), "https://tokio").is_none());
    }

    #[test]
    fn test_lookahead_prefers_most_frequent() {
        let suggestion = lookahead("go", &tree(), false, &[]).unwrap();
        // "go.dev" appears for both leaves, "golang" once
        assert_eq!(suggestion.suggestion, "go.dev");
        assert_eq!(suggestion.word, "go");
    }

    #[test]
    fn test_lookahead_ties_go_to_shorter_word() {
        let tied = vec![folder(
            10,
            "[xbs] Other",
            vec![leaf(1, "Rustacean", "https://a.io"), leaf(2, "Rust", "https://b.io")],
        )];
        assert_eq!(lookahead("ru", &tied, false, &[]).unwrap().suggestion, "rust");

        let mut more = tied.clone();
        more[0]
            .children_mut()
            .unwrap()
            .push(leaf(3, "Rustacean", "https://c.io"));
        assert_eq!(lookahead("ru", &more, false, &[]).unwrap().suggestion, "rustacean");
    }

    #[test]
    fn test_lookahead_host_forms() {
        let suggestion = lookahead("www", &tree(), false, &[]).unwrap();
        assert_eq!(suggestion.suggestion, "www.go.dev");
    }

    #[test]
    fn test_lookahead_exclusions_and_tags_only() {
        let excluded = lookahead("go", &tree(), false, &["go.dev".into()]).unwrap();
        assert_eq!(excluded.suggestion, "golang");

        assert!(lookahead("go", &tree(), true, &[]).is_none());
        assert_eq!(lookahead("as", &tree(), true, &[]).unwrap().suggestion, "async");
        assert!(lookahead("", &tree(), false, &[]).is_none());
    }
}
