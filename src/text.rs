//! String helpers shared by the tree model, search and change detection.

use regex::Regex;
use std::sync::OnceLock;

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("static regex"))
}

/// Cuts `text` back to the last whole word that fits in `limit` characters
/// and appends an ellipsis. Text already within the limit is only trimmed.
pub fn trim_to_nearest_word(text: &str, limit: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= limit {
        return text.to_string();
    }

    let head: String = text.chars().take(limit).collect();
    let cut = head
        .char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .map(|(i, _)| i)
        .last()
        .unwrap_or(head.len());

    format!("{}…", head[..cut].trim_end())
}

/// Lowercases `text`, drops apostrophes and splits on anything that is not a
/// letter or digit.
pub fn split_text_into_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace(['\'', '’'], "")
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn strip_tags(html: &str) -> String {
    tag_regex().replace_all(html, "").trim().to_string()
}

/// Turns comma separated keyword text into a
/// sorted, de-duplicated lowercase tag list.
pub fn tags_from_text(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = strip_tags(text)
        .split([',', ';'])
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_to_nearest_word() {
        assert_eq!(trim_to_nearest_word("  short  ", 10), "short");
        assert_eq!(trim_to_nearest_word("the quick brown fox", 12), "the quick…");
        assert_eq!(trim_to_nearest_word("unbreakable", 4), "unbr…");
    }

    #[test]
    fn test_split_text_into_words() {
        assert_eq!(
            split_text_into_words("Rust's Book: ownership_and-borrowing"),
            vec!["rusts", "book", "ownership", "and", "borrowing"]
        );
        assert!(split_text_into_words("  --  ").is_empty());
    }

    #[test]
    fn test_tags_from_text() {
        assert_eq!(
            tags_from_text("<b>Rust</b>, async, rust ,  Tokio"),
            vec!["async", "rust", "tokio"]
        );
        assert!(tags_from_text("").is_empty());
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn trimmed_text_never_exceeds_limit(text in "[a-z ]{0,80}", limit in 1usize..40) {
            let trimmed = trim_to_nearest_word(&text, limit);
            // the ellipsis is the only character allowed past the limit
            prop_assert!(trimmed.chars().count() <= limit + 1);
        }

        #[test]
        fn words_are_lowercase_alphanumeric(text in "[A-Za-z0-9 '_.-]{0,60}") {
            for word in split_text_into_words(&text) {
                prop_assert!(!word.is_empty());
                prop_assert!(word.chars().all(char::is_alphanumeric));
                prop_assert_eq!(word.to_lowercase(), word.clone());
            }
        }
    }
}
