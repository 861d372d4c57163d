//! `reqwest`-backed [`Fetcher`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use tracing::debug;
use url::Url;

use tagcrawl_shared::{CrawlConfig, FetchResponse, Fetcher, NetworkError, Result, TagCrawlError};

/// Accept header sent with every request.
const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Maximum redirects followed per request.
const MAX_REDIRECTS: usize = 5;

/// HTTP transport with browser-like headers and a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a client from the run configuration.
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        Self::with_settings(
            &config.user_agent,
            &config.accept_language,
            &config.referer,
            config.timeout,
        )
    }

    pub fn with_settings(
        user_agent: &str,
        accept_language: &str,
        referer: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value("user_agent", user_agent)?);
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        headers.insert(ACCEPT_LANGUAGE, header_value("accept_language", accept_language)?);
        if !referer.is_empty() {
            headers.insert(REFERER, header_value("referer", referer)?);
        }

        let client = Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(|e| TagCrawlError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> std::result::Result<FetchResponse, NetworkError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;
        debug!(%url, status, bytes = body.len(), "response received");

        Ok(FetchResponse::new(status, body.to_vec()))
    }
}

fn header_value(field: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| TagCrawlError::config(format!("invalid http.{field} header value: {e}")))
}

fn classify(e: reqwest::Error) -> NetworkError {
    if e.is_timeout() {
        NetworkError::Timeout
    } else if e.is_connect() {
        NetworkError::Connect(e.to_string())
    } else {
        NetworkError::Other(e.to_string())
    }
}
