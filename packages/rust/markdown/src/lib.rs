//! Article HTML to Markdown conversion.
//!
//! [`ArticleConverter`] is the production [`ContentConverter`]: it extracts
//! the title and post body of a catalog article page, converts the body with
//! `htmd`, and runs a series of cleanup passes over the result.

mod cleanup;
mod extract;

use tracing::{debug, instrument};
use url::Url;

use tagcrawl_shared::{ContentConverter, ConvertedArticle, Result, TagCrawlError};

/// Tags `htmd` should never render, even if they slip past extraction.
const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "iframe", "svg", "nav"];

/// Converts catalog article pages to Markdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArticleConverter;

impl ArticleConverter {
    pub fn new() -> Self {
        Self
    }
}

impl ContentConverter for ArticleConverter {
    fn convert(&self, source_url: &Url, html: &str) -> Result<ConvertedArticle> {
        convert_article(html, source_url)
    }
}

/// Convert one article page to Markdown.
///
/// 1. Extract the title and the chrome-free body HTML
/// 2. Convert the body with `htmd`
/// 3. Splice pre-rendered tables back in
/// 4. Run the cleanup pipeline
///
/// A page with no body container, or whose body converts to nothing, is an
/// [`TagCrawlError::Extraction`].
#[instrument(skip(html), fields(url = %source_url))]
pub fn convert_article(html: &str, source_url: &Url) -> Result<ConvertedArticle> {
    let article = extract::extract_article(html, source_url)?;

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();
    let mut raw = converter
        .convert(&article.body_html)
        .map_err(|e| TagCrawlError::extraction(format!("htmd conversion failed: {e}")))?;

    for (index, table) in article.tables.iter().enumerate() {
        raw = raw.replacen(
            &extract::table_placeholder(index),
            &format!("\n{}\n", table.trim_end()),
            1,
        );
    }
    debug!(raw_len = raw.len(), tables = article.tables.len(), "htmd conversion complete");

    let markdown = cleanup::run_pipeline(&raw, source_url);
    if markdown.is_empty() {
        return Err(TagCrawlError::extraction("article body converted to empty Markdown"));
    }

    debug!(title = %article.title, len = markdown.len(), "conversion complete");
    Ok(ConvertedArticle {
        title: article.title,
        markdown,
    })
}
