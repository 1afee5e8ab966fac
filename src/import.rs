//! Netscape bookmark file import (the HTML format every browser exports).

use scraper::{Html, Selector};
use tracing::{debug, info};

use crate::bookmark::{add_bookmark, get_container, Bookmark, BookmarkContainer, BookmarkMetadata};
use crate::error::{Result, SyncError};
use crate::text::tags_from_text;

/// Links found in a bookmark file, in document order. Folder structure is
/// not kept.
pub fn parse_netscape_html(html: &str) -> Result<Vec<BookmarkMetadata>> {
    let document = Html::parse_document(html);
    let link_selector = Selector::parse("a[href]")
        .map_err(|e| SyncError::Import(format!("selector: {:?}", e)))?;

    let mut links = Vec::new();
    for element in document.select(&link_selector) {
        let Some(url) = element.value().attr("href").map(str::trim) else {
            continue;
        };
        // Firefox smart folders are queries, not pages.
        if url.is_empty() || url.starts_with("place:") {
            debug!("Skipping link without a page url: {:?}", url);
            continue;
        }

        let title = element.text().collect::<String>().trim().to_string();
        let tags = element
            .value()
            .attr("tags")
            .map(tags_from_text)
            .filter(|t| !t.is_empty());

        links.push(BookmarkMetadata {
            title,
            url: Some(url.to_string()),
            description: None,
            tags,
        });
    }
    Ok(links)
}

/// Appends every link in `html` to the Other container of `tree`, creating
/// the container when missing. Returns the number imported and the new tree.
pub fn import_html_bookmarks(html: &str, tree: &[Bookmark]) -> Result<(usize, Vec<Bookmark>)> {
    let links = parse_netscape_html(html)?;
    if links.is_empty() {
        return Err(SyncError::Import("no links found in bookmark file".into()));
    }

    let mut updated = tree.to_vec();
    let other_id = get_container(BookmarkContainer::Other, &mut updated, true)
        .map(|c| c.id())
        .ok_or_else(|| SyncError::ContainerNotFound(BookmarkContainer::Other.title().into()))?;

    for link in &links {
        let (_, next) = add_bookmark(link, other_id, None, &updated)?;
        updated = next;
    }

    info!("✅ Imported {} bookmarks from HTML", links.len());
    Ok((links.len(), updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::find_container;
    use crate::bookmark::helpers::fixtures::{folder, leaf};

    const EXPORT: &str = r#"<!DOCTYPE NETSCAPE-Bookmark-file-1>
<META HTTP-EQUIV="Content-Type" CONTENT="text/html; charset=UTF-8">
<TITLE>Bookmarks</TITLE>
<H1>Bookmarks</H1>
<DL><p>
    <DT><H3>Rust</H3>
    <DL><p>
        <DT><A HREF="https://rust-lang.org" ADD_DATE="1700000000" TAGS="Lang,Systems">Rust</A>
        <DT><A HREF="place:sort=8&maxResults=10">Recent Tags</A>
    </DL><p>
    <DT><A HREF="https://tokio.rs">  Tokio  </A>
</DL><p>"#;

    #[test]
    fn test_parse_links() {
        let links = parse_netscape_html(EXPORT).unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].url.as_deref(), Some("https://rust-lang.org"));
        assert_eq!(links[0].tags, Some(vec!["lang".to_string(), "systems".to_string()]));
        assert_eq!(links[1].title, "Tokio");
        assert!(links[1].tags.is_none());
    }

    #[test]
    fn test_import_into_other() {
        let tree = vec![folder(1, "[xbs] Other", vec![leaf(2, "Existing", "https://a.io")])];
        let (count, updated) = import_html_bookmarks(EXPORT, &tree).unwrap();
        assert_eq!(count, 2);

        let other = find_container(BookmarkContainer::Other, &updated).unwrap();
        let urls: Vec<_> = other.children().unwrap().iter().filter_map(Bookmark::url).collect();
        assert_eq!(urls, vec!["https://a.io", "https://rust-lang.org", "https://tokio.rs"]);
        assert_eq!(other.children().unwrap()[1].tags(), &["lang", "systems"]);
    }

    #[test]
    fn test_empty_file_is_an_error() {
        assert!(matches!(
            import_html_bookmarks("<html></html>", &[]),
            Err(SyncError::Import(_))
        ));
    }
}
