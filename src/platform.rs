use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::bookmark::BookmarkContainer;

/// Browser families whose native bookmark stores we know how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Chromium,
    Firefox,
    Opera,
}

/// How one reserved container is found among a platform's native roots.
#[derive(Debug, Clone, Copy)]
pub struct RootSpec {
    pub container: BookmarkContainer,
    /// Well-known native ids, checked first.
    pub ids: &'static [&'static str],
    /// Fallback titles, checked when no id matches.
    pub titles: &'static [&'static str],
    pub required: bool,
}

const CHROMIUM_ROOTS: &[RootSpec] = &[
    RootSpec {
        container: BookmarkContainer::Toolbar,
        ids: &["1"],
        titles: &["Bookmarks bar", "Bookmarks Bar"],
        required: true,
    },
    RootSpec {
        container: BookmarkContainer::Other,
        ids: &["2"],
        titles: &["Other bookmarks", "Other Bookmarks"],
        required: true,
    },
    RootSpec {
        container: BookmarkContainer::Mobile,
        ids: &["3"],
        titles: &["Mobile bookmarks", "Mobile Bookmarks"],
        required: false,
    },
];

const FIREFOX_ROOTS: &[RootSpec] = &[
    RootSpec {
        container: BookmarkContainer::Menu,
        ids: &["menu________"],
        titles: &["Bookmarks Menu"],
        required: true,
    },
    RootSpec {
        container: BookmarkContainer::Toolbar,
        ids: &["toolbar_____"],
        titles: &["Bookmarks Toolbar"],
        required: true,
    },
    RootSpec {
        container: BookmarkContainer::Other,
        ids: &["unfiled_____"],
        titles: &["Other Bookmarks"],
        required: true,
    },
    RootSpec {
        container: BookmarkContainer::Mobile,
        ids: &["mobile______"],
        titles: &["Mobile Bookmarks"],
        required: false,
    },
];

const OPERA_ROOTS: &[RootSpec] = &[
    RootSpec {
        container: BookmarkContainer::Toolbar,
        ids: &["1"],
        titles: &["Bookmarks Bar", "Bookmarks bar"],
        required: true,
    },
    RootSpec {
        container: BookmarkContainer::Menu,
        ids: &["2"],
        titles: &["Bookmarks Menu"],
        required: true,
    },
    RootSpec {
        container: BookmarkContainer::Other,
        ids: &["3"],
        titles: &["Other Bookmarks"],
        required: true,
    },
];

fn scheme_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([\w-]+):").expect("static regex"))
}

impl Platform {
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Chromium => "Chromium",
            Platform::Firefox => "Firefox",
            Platform::Opera => "Opera",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "chromium" | "chrome" | "brave" | "edge" => Some(Platform::Chromium),
            "firefox" | "waterfox" => Some(Platform::Firefox),
            "opera" => Some(Platform::Opera),
            _ => None,
        }
    }

    /// Placeholder url the browser shows for a new tab. Separators and
    /// unsupported urls are written to the native store with this url.
    pub fn new_tab_url(&self) -> &'static str {
        match self {
            Platform::Chromium => "chrome://newtab/",
            Platform::Firefox => "about:newtab",
            Platform::Opera => "chrome://newtab",
        }
    }

    /// Scheme prefixes the native store refuses to save.
    fn blocked_schemes(&self) -> &'static [&'static str] {
        match self {
            Platform::Chromium => &["chrome", "data"],
            Platform::Firefox => &["about", "chrome", "data", "file", "javascript", "moz-extension"],
            Platform::Opera => &["chrome", "opera", "data"],
        }
    }

    pub fn url_is_supported(&self, url: &str) -> bool {
        let Some(caps) = scheme_regex().captures(url) else {
            return false;
        };
        let scheme = caps[1].to_lowercase();
        !self
            .blocked_schemes()
            .iter()
            .any(|blocked| scheme.starts_with(blocked))
    }

    /// The url to hand to the native store: the url itself when supported,
    /// otherwise the new tab url.
    pub fn supported_url(&self, url: &str) -> String {
        if self.url_is_supported(url) {
            url.to_string()
        } else {
            self.new_tab_url().to_string()
        }
    }

    pub fn root_specs(&self) -> &'static [RootSpec] {
        match self {
            Platform::Chromium => CHROMIUM_ROOTS,
            Platform::Firefox => FIREFOX_ROOTS,
            Platform::Opera => OPERA_ROOTS,
        }
    }

    /// Containers without a native root on this platform. They are kept as a
    /// folder inside the Other root.
    pub fn unsupported_containers(&self) -> Vec<BookmarkContainer> {
        BookmarkContainer::ALL
            .into_iter()
            .filter(|c| !self.root_specs().iter().any(|spec| spec.container == *c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_support() {
        assert!(Platform::Chromium.url_is_supported("https://example.com"));
        assert!(!Platform::Chromium.url_is_supported("chrome://settings"));
        assert!(!Platform::Opera.url_is_supported("opera://flags"));
        assert!(Platform::Opera.url_is_supported("ftp://files.example.com"));
        assert!(!Platform::Firefox.url_is_supported("about:config"));
        assert!(!Platform::Firefox.url_is_supported("not a url"));
    }

    #[test]
    fn test_supported_url_falls_back_to_new_tab() {
        assert_eq!(Platform::Opera.supported_url("opera://flags"), "chrome://newtab");
        assert_eq!(
            Platform::Firefox.supported_url("https://mozilla.org"),
            "https://mozilla.org"
        );
    }

    #[test]
    fn test_unsupported_containers() {
        assert_eq!(
            Platform::Chromium.unsupported_containers(),
            vec![BookmarkContainer::Menu]
        );
        assert!(Platform::Firefox.unsupported_containers().is_empty());
        assert_eq!(
            Platform::Opera.unsupported_containers(),
            vec![BookmarkContainer::Mobile]
        );
    }

    #[test]
    fn test_parse() {
        assert_eq!(Platform::parse("Brave"), Some(Platform::Chromium));
        assert_eq!(Platform::parse("waterfox"), Some(Platform::Firefox));
        assert_eq!(Platform::parse("lynx"), None);
    }
}
