//! Paginated tag listings.
//!
//! A [`TagListing`] lazily walks the listing pages of one tag and yields
//! [`ArticleRef`]s in listing order. Every page request goes through the
//! shared [`RetryingFetcher`], and therefore through the politeness gate.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

use tagcrawl_shared::{ArticleId, ArticleRef, Result, Tag, TagSource};

use crate::retry::RetryingFetcher;

/// Article URLs look like `/p/<digits>.html`, optionally with a fragment.
static ARTICLE_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/p/(\d+)\.html($|#)").expect("valid regex"));

/// Link text of "next page" anchors ("下一页 »", "Next >", ...).
static NEXT_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(下一页|下页|next\b)").expect("valid regex"));

/// Containers holding a tag's own article list, most specific first.
/// `body` is the last resort for unknown themes.
static CONTENT_SCOPE_SELS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["#mainContent", "#main", ".main", ".forFlow", "body"]
        .into_iter()
        .map(|s| Selector::parse(s).expect("valid selector"))
        .collect()
});

static TITLE_LINK_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[title], h2 a, h3 a, .postTitle a, .entrylistTitle a")
        .expect("valid selector")
});

static ANCHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

static REL_NEXT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[rel~="next"][href]"#).expect("valid selector"));

/// Extract the article ID from an article URL.
pub fn article_id_from_url(url: &str) -> Option<ArticleId> {
    ARTICLE_LINK_RE
        .captures(url)
        .map(|caps| ArticleId::new(&caps[1]))
}

/// Whether `url` points at an article page.
pub fn is_article_link(url: &str) -> bool {
    ARTICLE_LINK_RE.is_match(url)
}

// ---------------------------------------------------------------------------
// Page parsing
// ---------------------------------------------------------------------------

/// What one listing page contributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Article URLs in page order (may contain duplicates).
    pub article_urls: Vec<Url>,
    /// The following listing page, if any.
    pub next: Option<Url>,
}

/// Parse a listing page fetched from `page_url`.
pub fn parse_listing_page(html: &str, page_url: &Url) -> ListingPage {
    let doc = Html::parse_document(html);

    let scope = CONTENT_SCOPE_SELS
        .iter()
        .find_map(|sel| doc.select(sel).next());

    let mut article_urls: Vec<Url> = match scope {
        Some(scope) => scope
            .select(&ANCHOR_SEL)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| resolve_article(page_url, href))
            .collect(),
        None => Vec::new(),
    };

    if article_urls.is_empty() {
        article_urls = doc
            .select(&TITLE_LINK_SEL)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| resolve_article(page_url, href))
            .collect();
    }

    ListingPage {
        article_urls,
        next: find_next_page(&doc, page_url),
    }
}

fn resolve_article(page_url: &Url, href: &str) -> Option<Url> {
    let resolved = page_url.join(href.trim()).ok()?;
    is_article_link(resolved.as_str()).then_some(resolved)
}

/// Locate the "next page" link. Links that lead nowhere (`#`,
/// `javascript:void(0)`, or back to the current page) end pagination.
fn find_next_page(doc: &Html, page_url: &Url) -> Option<Url> {
    let by_text = doc.select(&ANCHOR_SEL).find(|a| {
        let text = a.text().collect::<String>();
        NEXT_TEXT_RE.is_match(text.trim())
    });
    let anchor = by_text.or_else(|| doc.select(&REL_NEXT_SEL).next())?;
    let href = anchor.value().attr("href")?.trim();

    let mut next = page_url.join(href).ok()?;
    if next.scheme() != "http" && next.scheme() != "https" {
        return None;
    }
    next.set_fragment(None);

    let mut current = page_url.clone();
    current.set_fragment(None);
    (next != current).then_some(next)
}

// ---------------------------------------------------------------------------
// Lazy listing
// ---------------------------------------------------------------------------

/// Lazy, restartable sequence of articles for one tag.
pub struct TagListing {
    source: TagSource,
    fetcher: Arc<RetryingFetcher>,
    next_page: Option<Url>,
    visited_pages: HashSet<String>,
    seen_ids: HashSet<ArticleId>,
    buffer: VecDeque<ArticleRef>,
    pages_fetched: usize,
}

impl TagListing {
    pub fn new(source: TagSource, fetcher: Arc<RetryingFetcher>) -> Self {
        let first = source.listing_url.clone();
        Self {
            source,
            fetcher,
            next_page: Some(first),
            visited_pages: HashSet::new(),
            seen_ids: HashSet::new(),
            buffer: VecDeque::new(),
            pages_fetched: 0,
        }
    }

    pub fn tag(&self) -> &Tag {
        &self.source.tag
    }

    /// Listing pages fetched so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Start over from the first listing page.
    pub fn restart(&mut self) {
        self.next_page = Some(self.source.listing_url.clone());
        self.visited_pages.clear();
        self.seen_ids.clear();
        self.buffer.clear();
        self.pages_fetched = 0;
    }

    /// Next article, fetching further listing pages as needed.
    /// `Ok(None)` once the listing is exhausted.
    pub async fn next(&mut self) -> Result<Option<ArticleRef>> {
        loop {
            if let Some(article) = self.buffer.pop_front() {
                return Ok(Some(article));
            }
            let Some(page_url) = self.next_page.take() else {
                return Ok(None);
            };
            self.load_page(page_url).await?;
        }
    }

    /// Drain the whole listing.
    pub async fn collect_all(&mut self) -> Result<Vec<ArticleRef>> {
        let mut articles = Vec::new();
        while let Some(article) = self.next().await? {
            articles.push(article);
        }
        Ok(articles)
    }

    #[instrument(skip(self), fields(tag = %self.source.tag, page = self.pages_fetched + 1))]
    async fn load_page(&mut self, page_url: Url) -> Result<()> {
        info!(url = %page_url, "fetching listing page");
        self.visited_pages.insert(page_url.to_string());

        let response = self.fetcher.fetch(&page_url).await?;
        self.pages_fetched += 1;
        let page = parse_listing_page(&response.text(), &page_url);

        let candidates = page.article_urls.len();
        let mut added = 0;
        for mut url in page.article_urls {
            let Some(id) = article_id_from_url(url.as_str()) else {
                continue;
            };
            if !self.seen_ids.insert(id.clone()) {
                continue;
            }
            url.set_fragment(None);
            self.buffer.push_back(ArticleRef {
                tag: self.source.tag.clone(),
                id,
                url,
            });
            added += 1;
        }

        info!(
            candidates,
            added,
            total = self.seen_ids.len(),
            "listing page parsed"
        );

        self.next_page = page
            .next
            .filter(|next| !self.visited_pages.contains(next.as_str()));
        if self.next_page.is_none() {
            debug!("last listing page reached");
        }
        Ok(())
    }
}
