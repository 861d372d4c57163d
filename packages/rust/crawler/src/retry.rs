//! Fetch-retry wrapper.
//!
//! Every network attempt, first or retry, passes through the shared
//! [`PolitenessGate`]; the gate wait doubles as the inter-attempt sleep.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};
use url::Url;

use tagcrawl_shared::{ArticleRef, FailureCause, FetchError, FetchResponse, Fetcher};

use crate::gate::PolitenessGate;

/// Bookkeeping for one retry cycle. Dropped once the cycle resolves.
#[derive(Debug, Default)]
struct FetchAttempt {
    attempts: u32,
    last_cause: Option<FailureCause>,
    waited: Duration,
}

/// Wraps an injected [`Fetcher`] with bounded retries behind the gate.
#[derive(Clone)]
pub struct RetryingFetcher {
    fetcher: Arc<dyn Fetcher>,
    gate: Arc<PolitenessGate>,
    retries: u32,
}

impl RetryingFetcher {
    /// `retries` is the number of extra attempts after the first.
    pub fn new(fetcher: Arc<dyn Fetcher>, gate: Arc<PolitenessGate>, retries: u32) -> Self {
        Self {
            fetcher,
            gate,
            retries,
        }
    }

    pub fn gate(&self) -> &Arc<PolitenessGate> {
        &self.gate
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Fetch an article page.
    pub async fn fetch_article(
        &self,
        article: &ArticleRef,
    ) -> std::result::Result<FetchResponse, FetchError> {
        self.fetch(&article.url).await
    }

    /// Fetch `url`, retrying every failure class up to `retries` times.
    ///
    /// Succeeds only on a 2xx status with a non-empty body.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> std::result::Result<FetchResponse, FetchError> {
        let mut attempt = FetchAttempt::default();

        loop {
            attempt.waited += self.gate.wait().await;
            attempt.attempts += 1;

            let cause = match self.fetcher.fetch(url).await {
                Ok(response) if response.is_success() && !response.body.is_empty() => {
                    debug!(
                        attempt = attempt.attempts,
                        status = response.status,
                        bytes = response.body.len(),
                        waited_ms = attempt.waited.as_millis() as u64,
                        "fetched"
                    );
                    return Ok(response);
                }
                Ok(response) if response.is_success() => FailureCause::EmptyBody,
                Ok(response) => FailureCause::Status(response.status),
                Err(e) => FailureCause::Network(e),
            };

            if attempt.attempts >= self.max_attempts() {
                warn!(
                    attempts = attempt.attempts,
                    cause = %cause,
                    "giving up"
                );
                return Err(FetchError::Exhausted {
                    url: url.to_string(),
                    attempts: attempt.attempts,
                    last_cause: cause,
                });
            }

            warn!(
                attempt = attempt.attempts,
                max_attempts = self.max_attempts(),
                cause = %cause,
                previous = ?attempt.last_cause,
                "fetch failed, retrying"
            );
            attempt.last_cause = Some(cause);
        }
    }
}
