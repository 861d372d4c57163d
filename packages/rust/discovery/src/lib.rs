//! Tag discovery.
//!
//! Before any article is enumerated, the catalog's tag index page is fetched
//! and parsed into [`TagSource`]s. The allow-list is applied here, so tags
//! outside it never cost a listing request.

mod parser;

use tracing::{info, instrument, warn};

use tagcrawl_crawler::RetryingFetcher;
use tagcrawl_shared::{CrawlConfig, Result, Tag, TagCrawlError, TagSource};

pub use parser::{TagLink, parse_tag_index, parse_tag_link_text};

/// Fetch the tag index and return the selected tags in page order.
///
/// Allow-listed tags that do not appear on the page are reported with a
/// warning. Finding no selectable tag at all is an error.
#[instrument(skip_all, fields(url = %config.base_tag_url))]
pub async fn discover_tags(fetcher: &RetryingFetcher, config: &CrawlConfig) -> Result<Vec<TagSource>> {
    let response = fetcher.fetch(&config.base_tag_url).await?;
    let links = parse_tag_index(&response.text(), &config.base_tag_url)?;
    let selected = select_tags(links, config);

    if selected.is_empty() {
        return Err(TagCrawlError::parse("no tag links found on the index page"));
    }

    info!(tags = selected.len(), "tags discovered");
    Ok(selected)
}

/// Apply the allow-list to parsed tag links.
pub fn select_tags(links: Vec<TagLink>, config: &CrawlConfig) -> Vec<TagSource> {
    if let Some(wanted) = &config.only_tags {
        let missing: Vec<&str> = wanted
            .iter()
            .filter(|w| !links.iter().any(|l| &l.name == *w))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            warn!(?missing, "requested tags not found on the index page");
        }
    }

    links
        .into_iter()
        .filter(|link| config.allows_tag(&link.name))
        .map(|link| TagSource {
            tag: Tag::new(link.name),
            listing_url: link.url,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tagcrawl_crawler::{HttpFetcher, PolitenessGate};
    use tagcrawl_shared::{AppConfig, DelayWindow};
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const INDEX: &str = r#"<html><body>
        <h2>My Tags</h2>
        <div><a href="/me/tag/A/">A (3)</a><a href="/me/tag/B/">B (1)</a><a href="/me/tag/C/">C (9)</a></div>
    </body></html>"#;

    fn config(server: &MockServer, only: &[&str]) -> CrawlConfig {
        let mut app = AppConfig::default();
        app.crawl.base_tag_url = format!("{}/me/tag/", server.uri());
        app.crawl.only_tags = only.iter().map(|s| s.to_string()).collect();
        CrawlConfig::try_from(&app).unwrap()
    }

    fn fetcher() -> RetryingFetcher {
        let http = HttpFetcher::with_settings("tagcrawl-test", "en", "", Duration::from_secs(5))
            .unwrap();
        let gate = Arc::new(PolitenessGate::new(DelayWindow::none()));
        RetryingFetcher::new(Arc::new(http), gate, 0)
    }

    async fn index_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/tag/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INDEX))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn discovers_all_tags_in_order() {
        let server = index_server().await;
        let tags = discover_tags(&fetcher(), &config(&server, &[])).await.unwrap();
        let names: Vec<&str> = tags.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(
            tags[2].listing_url,
            Url::parse(&format!("{}/me/tag/C/", server.uri())).unwrap()
        );
    }

    #[tokio::test]
    async fn allow_list_drops_other_tags() {
        let server = index_server().await;
        let tags = discover_tags(&fetcher(), &config(&server, &["A", "B", "Z"]))
            .await
            .unwrap();
        let names: Vec<&str> = tags.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn allow_list_matching_nothing_is_an_error() {
        let server = index_server().await;
        let err = discover_tags(&fetcher(), &config(&server, &["Z"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "parse");
    }
}
