//! Article page extraction.
//!
//! Locates the title and the post body of a catalog article page and
//! re-serializes the body without blog chrome, with in-page anchors unlinked
//! and lazy-loaded images pointing at absolute `src` URLs.

use std::sync::LazyLock;

use regex::Regex;
use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use tagcrawl_shared::{Result, TagCrawlError, UNTITLED};

/// Elements dropped wholesale, by tag name.
const CHROME_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "ins", "aside", "footer",
];

/// `<div>` ids that wrap blog furniture rather than post content.
const CHROME_DIV_IDS: &[&str] = &[
    "MySignature",
    "MyTopNavigator",
    "MyBottomNavigator",
    "div_digg",
    "opt_under_post",
    "cnblogs_c1",
    "cnblogs_c2",
    "blog_post_info_block",
    "ad_t2",
    "ad_c1",
    "ad_c2",
];

/// `<div>` classes that wrap blog furniture.
const CHROME_DIV_CLASSES: &[&str] = &["recommend_btns"];

/// Attributes that only matter to lazy-loading scripts.
const LAZY_IMAGE_ATTRS: &[&str] = &["srcset", "data-src", "data-original", "data-lazy-src", "loading"];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

static TITLE_ID_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#cb_post_title_url").expect("valid selector"));
static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("valid selector"));
static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));
static BODY_ID_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#cnblogs_post_body").expect("valid selector"));
static ANY_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("*").expect("valid selector"));
static TABLE_ROW_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static TABLE_CELL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th, td").expect("valid selector"));

static TITLE_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)post|title").expect("valid regex"));
static BODY_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)post|content|body").expect("valid regex"));
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Title plus cleaned body HTML of one article page.
#[derive(Debug, Clone)]
pub(crate) struct ExtractedArticle {
    pub title: String,
    pub body_html: String,
    /// Markdown renderings of the body's tables, referenced by placeholder.
    pub tables: Vec<String>,
}

/// Placeholder paragraph text for the `index`-th table.
pub(crate) fn table_placeholder(index: usize) -> String {
    format!("TAGCRAWLTABLE{index}X")
}

/// Pull the title and the post body out of an article page.
pub(crate) fn extract_article(html: &str, page_url: &Url) -> Result<ExtractedArticle> {
    let doc = Html::parse_document(html);
    let title = extract_title(&doc);

    let body = doc
        .select(&BODY_ID_SEL)
        .next()
        .or_else(|| {
            doc.select(&ANY_SEL)
                .find(|el| el.value().classes().any(|c| BODY_CLASS_RE.is_match(c)))
        })
        .ok_or_else(|| TagCrawlError::extraction("post body container not found"))?;

    let mut writer = BodyWriter {
        base: page_url,
        out: String::with_capacity(html.len() / 2),
        tables: Vec::new(),
    };
    writer.write_children(body);

    Ok(ExtractedArticle {
        title,
        body_html: writer.out,
        tables: writer.tables,
    })
}

fn extract_title(doc: &Html) -> String {
    let by_id = doc.select(&TITLE_ID_SEL).map(|el| element_text(&el));
    let by_heading = doc
        .select(&H1_SEL)
        .filter(|el| el.value().classes().any(|c| TITLE_CLASS_RE.is_match(c)))
        .map(|el| element_text(&el));

    if let Some(title) = by_id.chain(by_heading).find(|t| !t.is_empty()) {
        return title;
    }

    doc.select(&TITLE_SEL)
        .next()
        .map(|el| element_text(&el))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string())
}

fn element_text(el: &ElementRef<'_>) -> String {
    let text: String = el.text().collect();
    WS_RE.replace_all(text.trim(), " ").into_owned()
}

fn is_chrome(el: &Element) -> bool {
    let name = el.name();
    if CHROME_TAGS.contains(&name) {
        return true;
    }
    if name != "div" {
        return false;
    }
    el.id().is_some_and(|id| CHROME_DIV_IDS.contains(&id))
        || el.classes().any(|c| CHROME_DIV_CLASSES.contains(&c))
}

/// Resolve the real image URL from lazy-loading attributes.
fn real_image_src(el: &Element, base: &Url) -> Option<String> {
    let candidate = ["data-src", "data-original", "src"]
        .iter()
        .filter_map(|attr| el.attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .or_else(|| {
            el.attr("srcset")
                .and_then(|set| set.split(',').next())
                .and_then(|first| first.split_whitespace().next())
        })?;

    if let Some(rest) = candidate.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if candidate.starts_with("http") {
        return Some(candidate.to_string());
    }
    base.join(candidate).ok().map(String::from)
}

struct BodyWriter<'u> {
    base: &'u Url,
    out: String,
    tables: Vec<String>,
}

impl BodyWriter<'_> {
    fn write_children(&mut self, parent: ElementRef<'_>) {
        for child in parent.children() {
            if let Some(el) = ElementRef::wrap(child) {
                self.write_element(el);
            } else if let Node::Text(text) = child.value() {
                escape_into(&mut self.out, text, false);
            }
        }
    }

    fn write_element(&mut self, el: ElementRef<'_>) {
        let value = el.value();
        if is_chrome(value) {
            return;
        }
        let name = value.name();
        if name == "table" {
            self.write_table(&el);
            return;
        }

        self.out.push('<');
        self.out.push_str(name);

        let image_src = if name == "img" {
            real_image_src(value, self.base)
        } else {
            None
        };
        if let Some(src) = &image_src {
            self.write_attr("src", src);
        }

        for (attr, attr_value) in value.attrs() {
            let dropped = match name {
                "a" => attr == "href" && attr_value.starts_with('#'),
                "img" => {
                    LAZY_IMAGE_ATTRS.contains(&attr) || (attr == "src" && image_src.is_some())
                }
                _ => false,
            };
            if !dropped {
                self.write_attr(attr, attr_value);
            }
        }
        self.out.push('>');

        if VOID_ELEMENTS.contains(&name) {
            return;
        }
        self.write_children(el);
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
    }

    fn write_attr(&mut self, name: &str, value: &str) {
        self.out.push(' ');
        self.out.push_str(name);
        self.out.push_str("=\"");
        escape_into(&mut self.out, value, true);
        self.out.push('"');
    }

    /// Tables are rendered to Markdown here and spliced back in after
    /// conversion; the HTML converter has no table support.
    fn write_table(&mut self, table: &ElementRef<'_>) {
        let markdown = table_to_markdown(table);
        if markdown.is_empty() {
            return;
        }
        self.out.push_str("<p>");
        self.out.push_str(&table_placeholder(self.tables.len()));
        self.out.push_str("</p>");
        self.tables.push(markdown);
    }
}

fn escape_into(out: &mut String, text: &str, in_attr: bool) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if in_attr => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

/// Render a `<table>` as a pipe table. The first row is the header.
fn table_to_markdown(table: &ElementRef<'_>) -> String {
    let mut rows: Vec<Vec<String>> = table
        .select(&TABLE_ROW_SEL)
        .map(|tr| {
            tr.select(&TABLE_CELL_SEL)
                .map(|cell| element_text(&cell).replace('|', "\\|"))
                .collect::<Vec<_>>()
        })
        .filter(|cells| !cells.is_empty())
        .collect();

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return String::new();
    }
    for row in &mut rows {
        row.resize(width, String::new());
    }

    let mut md = String::new();
    for (i, row) in rows.iter().enumerate() {
        md.push_str("| ");
        md.push_str(&row.join(" | "));
        md.push_str(" |\n");
        if i == 0 {
            md.push_str("| ");
            md.push_str(&vec!["---"; width].join(" | "));
            md.push_str(" |\n");
        }
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_url() -> Url {
        Url::parse("https://blog.example.com/me/p/42.html").unwrap()
    }

    #[test]
    fn title_prefers_post_title_anchor() {
        let html = r#"<html><head><title>Site - Post</title></head><body>
            <h1 class="postTitle"><a id="cb_post_title_url" href="/p/42.html"> Real
            Title </a></h1>
            <div id="cnblogs_post_body"><p>x</p></div>
        </body></html>"#;
        let article = extract_article(html, &page_url()).unwrap();
        assert_eq!(article.title, "Real Title");
    }

    #[test]
    fn title_falls_back_to_heading_then_document_title() {
        let heading = r#"<html><body><h1 class="entry-title">From H1</h1>
            <div class="post-content"><p>x</p></div></body></html>"#;
        assert_eq!(extract_article(heading, &page_url()).unwrap().title, "From H1");

        let doc_title = r#"<html><head><title>Doc Title</title></head><body>
            <div id="cnblogs_post_body"><p>x</p></div></body></html>"#;
        assert_eq!(extract_article(doc_title, &page_url()).unwrap().title, "Doc Title");

        let none = r#"<html><body><div id="cnblogs_post_body"><p>x</p></div></body></html>"#;
        assert_eq!(extract_article(none, &page_url()).unwrap().title, UNTITLED);
    }

    #[test]
    fn missing_body_is_extraction_error() {
        let html = "<html><body><p>nothing here</p></body></html>";
        let err = extract_article(html, &page_url()).unwrap_err();
        assert_eq!(err.kind(), "extraction");
    }

    #[test]
    fn chrome_is_removed() {
        let html = r#"<html><body><div id="cnblogs_post_body">
            <p>keep me</p>
            <script>alert(1)</script>
            <div id="MySignature">signed</div>
            <div class="recommend_btns">recommend</div>
            <iframe src="https://ads.example.com"></iframe>
            <footer>foot</footer>
        </div></body></html>"#;
        let body = extract_article(html, &page_url()).unwrap().body_html;
        assert!(body.contains("keep me"));
        for gone in ["alert", "signed", "recommend", "iframe", "foot"] {
            assert!(!body.contains(gone), "{gone} survived: {body}");
        }
    }

    #[test]
    fn in_page_anchors_lose_href() {
        let html = r##"<html><body><div id="cnblogs_post_body">
            <a href="#section">jump</a> <a href="/other">other</a>
        </div></body></html>"##;
        let body = extract_article(html, &page_url()).unwrap().body_html;
        assert!(body.contains("<a>jump</a>"));
        assert!(body.contains(r#"<a href="/other">other</a>"#));
    }

    #[test]
    fn lazy_images_get_absolute_src() {
        let html = r#"<html><body><div id="cnblogs_post_body">
            <img data-src="//img.example.com/a.png" src="placeholder.gif" loading="lazy">
            <img srcset="/b.png 1x, /b@2x.png 2x">
            <img src="c.jpg" alt="c">
        </div></body></html>"#;
        let body = extract_article(html, &page_url()).unwrap().body_html;
        assert!(body.contains(r#"src="https://img.example.com/a.png""#));
        assert!(!body.contains("placeholder.gif"));
        assert!(!body.contains("loading"));
        assert!(body.contains(r#"src="https://blog.example.com/b.png""#));
        assert!(!body.contains("srcset"));
        assert!(body.contains(r#"src="https://blog.example.com/me/p/c.jpg""#));
        assert!(body.contains(r#"alt="c""#));
    }

    #[test]
    fn tables_become_placeholders() {
        let html = r#"<html><body><div id="cnblogs_post_body">
            <table><tr><th>Name</th><th>Value</th></tr><tr><td>a|b</td></tr></table>
        </div></body></html>"#;
        let article = extract_article(html, &page_url()).unwrap();
        assert!(article.body_html.contains(&table_placeholder(0)));
        assert_eq!(
            article.tables[0],
            "| Name | Value |\n| --- | --- |\n| a\\|b |  |\n"
        );
    }
}
