//! Capabilities injected into the crawl engine.
//!
//! The engine never talks to the network or an HTML library directly; it is
//! handed a [`Fetcher`] and a [`ContentConverter`]. Production wiring uses
//! `tagcrawl-crawler::HttpFetcher` and `tagcrawl-markdown::ArticleConverter`;
//! tests use in-memory fakes.

use async_trait::async_trait;
use url::Url;

use crate::error::{NetworkError, Result};

/// Raw response returned by a [`Fetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// `fetch(url) -> (status, body) | NetworkError`. Timeouts are the
/// implementation's responsibility.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> std::result::Result<FetchResponse, NetworkError>;
}

/// A converted article: the human title and its Markdown body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedArticle {
    pub title: String,
    pub markdown: String,
}

/// `toMarkdown(html) -> Markdown | ExtractionError`.
///
/// Implementations must report unusable pages as
/// [`TagCrawlError::Extraction`](crate::TagCrawlError::Extraction).
pub trait ContentConverter: Send + Sync {
    fn convert(&self, source_url: &Url, html: &str) -> Result<ConvertedArticle>;
}
