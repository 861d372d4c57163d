//! Tag index page parser.
//!
//! The catalog's tag index has a "My Tags" block listing every tag as
//! `Name (count)` links. The block is found by its heading first, then by
//! id/class names containing `tag`.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use tagcrawl_shared::{Result, TagCrawlError};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A tag link found on the index page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagLink {
    /// Tag name without the trailing count.
    pub name: String,
    /// Article count shown next to the name, if any.
    pub count: Option<u32>,
    /// Absolute URL of the tag's first listing page.
    pub url: Url,
}

// ---------------------------------------------------------------------------
// Patterns (compiled once)
// ---------------------------------------------------------------------------

/// Matches `Name (12)`.
static NAME_COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(.*?)\s*\((\d+)\)\s*$").expect("name/count regex"));

static TAG_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)tag").expect("tag attribute regex"));

static HEADING_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2, h3, h4").expect("heading selector"));

static ANY_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("*").expect("any selector"));

static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("link selector"));

/// Heading texts that introduce the tag block.
const TAG_HEADINGS: [&str; 2] = ["我的标签", "My Tags"];

/// Elements scanned after the heading when looking for the block.
const HEADING_LOOKAHEAD: usize = 10;

/// Container element names accepted after the heading.
const CONTAINER_NAMES: [&str; 4] = ["div", "section", "ul", "dl"];

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Split `Name (12)` into `("Name", Some(12))`; other texts are returned trimmed.
pub fn parse_tag_link_text(text: &str) -> (String, Option<u32>) {
    match NAME_COUNT_RE.captures(text) {
        Some(caps) => (caps[1].trim().to_string(), caps[2].parse().ok()),
        None => (text.trim().to_string(), None),
    }
}

/// Parse the tag index page fetched from `base`.
///
/// Returns tags in page order, first occurrence wins. Fails when the tag
/// block cannot be located.
pub fn parse_tag_index(html: &str, base: &Url) -> Result<Vec<TagLink>> {
    let doc = Html::parse_document(html);
    let container = find_tag_container(&doc).ok_or_else(|| {
        TagCrawlError::parse("tag block not found on the index page; has the layout changed?")
    })?;

    let mut tags: Vec<TagLink> = Vec::new();
    for a in container.select(&LINK_SEL) {
        let text = a.text().collect::<String>();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let Ok(url) = base.join(href.trim()) else {
            continue;
        };
        if !url.as_str().contains("/tag/") {
            continue;
        }

        let (name, count) = parse_tag_link_text(text);
        if name.is_empty() || tags.iter().any(|t| t.name == name) {
            continue;
        }
        tags.push(TagLink { name, count, url });
    }

    Ok(tags)
}

fn find_tag_container(doc: &Html) -> Option<ElementRef<'_>> {
    find_after_heading(doc).or_else(|| find_by_attribute(doc))
}

/// First link-bearing container among the elements following a
/// "My Tags" heading in document order.
fn find_after_heading(doc: &Html) -> Option<ElementRef<'_>> {
    let heading = doc.select(&HEADING_SEL).find(|h| {
        let text = h.text().collect::<String>();
        TAG_HEADINGS.iter().any(|t| text.contains(t))
    })?;

    let all: Vec<ElementRef<'_>> = doc.select(&ANY_SEL).collect();
    let start = all.iter().position(|el| el.id() == heading.id())?;

    all.into_iter()
        .skip(start + 1)
        .take(HEADING_LOOKAHEAD)
        .find(|el| CONTAINER_NAMES.contains(&el.value().name()) && has_links(el))
}

/// The first element whose id, else whose class, mentions `tag`, provided
/// it holds links.
fn find_by_attribute(doc: &Html) -> Option<ElementRef<'_>> {
    let by_id = doc
        .select(&ANY_SEL)
        .find(|el| el.value().id().is_some_and(|id| TAG_ATTR_RE.is_match(id)));
    if let Some(el) = by_id.filter(has_links) {
        return Some(el);
    }

    doc.select(&ANY_SEL)
        .find(|el| el.value().classes().any(|c| TAG_ATTR_RE.is_match(c)))
        .filter(has_links)
}

fn has_links(el: &ElementRef<'_>) -> bool {
    el.select(&LINK_SEL).next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.example.com/someone/tag/").unwrap()
    }

    #[test]
    fn splits_name_and_count() {
        assert_eq!(parse_tag_link_text("Linux (42)"), ("Linux".into(), Some(42)));
        assert_eq!(parse_tag_link_text("  Go语言(3) "), ("Go语言".into(), Some(3)));
        assert_eq!(parse_tag_link_text("Misc"), ("Misc".into(), None));
    }

    #[test]
    fn finds_block_after_heading() {
        let html = r#"<html><body>
            <div id="nav"><a href="/someone/tag/Nav/">Nav (1)</a></div>
            <h3>我的标签</h3>
            <div class="box">
                <ul>
                    <li><a href="/someone/tag/Linux/">Linux (42)</a></li>
                    <li><a href="https://www.example.com/someone/tag/Go/">Go (7)</a></li>
                    <li><a href="/someone/p/1.html">Not a tag</a></li>
                    <li><a href="/someone/tag/Linux/">Linux (42)</a></li>
                </ul>
            </div>
        </body></html>"#;

        let tags = parse_tag_index(html, &base()).unwrap();
        let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Linux", "Go"]);
        assert_eq!(tags[0].count, Some(42));
        assert_eq!(
            tags[0].url.as_str(),
            "https://www.example.com/someone/tag/Linux/"
        );
    }

    #[test]
    fn falls_back_to_tag_named_elements() {
        let html = r#"<html><body>
            <div id="taglist"></div>
            <div class="catListTag"><a href="/someone/tag/Rust/">Rust (2)</a></div>
        </body></html>"#;

        let tags = parse_tag_index(html, &base()).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "Rust");
    }

    #[test]
    fn missing_block_is_a_parse_error() {
        let html = "<html><body><p>nothing here</p></body></html>";
        let err = parse_tag_index(html, &base()).unwrap_err();
        assert_eq!(err.kind(), "parse");
    }
}
