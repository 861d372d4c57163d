//! Work scheduler.
//!
//! Tags are walked one after another; the articles of the current tag are
//! dispatched to at most `threads` concurrent processing units. All units
//! share one [`RetryingFetcher`] and therefore one politeness gate.
//!
//! A unit is: skip if done, fetch, convert, save, mark done. A failing unit is
//! recorded and abandoned; it never marks the ledger and never stops the run.
//! The only run-level abort is a streak of I/O failures, which points at an
//! unusable output root rather than a bad article.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use tagcrawl_crawler::{RetryingFetcher, TagListing};
use tagcrawl_shared::{
    ArticleRef, ContentConverter, CrawlConfig, Result, TagCrawlError, TagSource,
};
use tagcrawl_storage::CompletionLedger;

use crate::persist::ArticlePersister;
use crate::pipeline::ProgressReporter;

// ---------------------------------------------------------------------------
// Outcomes and summary
// ---------------------------------------------------------------------------

/// How one processing unit ended.
#[derive(Debug)]
pub enum UnitOutcome {
    Saved(PathBuf),
    Skipped,
    Failed(TagCrawlError),
}

/// A per-article failure as reported in the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct ArticleFailure {
    pub tag: String,
    pub article_id: String,
    pub url: String,
    pub kind: &'static str,
    pub message: String,
}

/// A tag whose listing could not be enumerated.
#[derive(Debug, Clone, Serialize)]
pub struct TagFailure {
    pub tag: String,
    pub kind: &'static str,
    pub message: String,
}

/// Totals for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub tags: usize,
    pub articles_seen: usize,
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<ArticleFailure>,
    pub tag_failures: Vec<TagFailure>,
    pub interrupted: bool,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl RunSummary {
    /// Articles that were fetched or attempted; skipped ones do not count.
    pub fn attempted(&self) -> usize {
        self.saved + self.failed
    }

    /// At least one article was attempted and none of them succeeded.
    pub fn all_failed(&self) -> bool {
        self.saved == 0 && self.failed > 0
    }

    fn record(&mut self, article: &ArticleRef, outcome: &UnitOutcome) {
        match outcome {
            UnitOutcome::Saved(_) => self.saved += 1,
            UnitOutcome::Skipped => self.skipped += 1,
            UnitOutcome::Failed(e) => {
                self.failed += 1;
                self.failures.push(ArticleFailure {
                    tag: article.tag.to_string(),
                    article_id: article.id.to_string(),
                    url: article.url.to_string(),
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Everything a processing unit needs, shared by all units of a run.
struct UnitContext {
    fetcher: Arc<RetryingFetcher>,
    converter: Arc<dyn ContentConverter>,
    ledger: CompletionLedger,
    persister: ArticlePersister,
}

/// Drives a crawl over a list of tags.
pub struct Scheduler {
    config: Arc<CrawlConfig>,
    ctx: Arc<UnitContext>,
}

impl Scheduler {
    pub fn new(
        config: Arc<CrawlConfig>,
        fetcher: Arc<RetryingFetcher>,
        converter: Arc<dyn ContentConverter>,
        ledger: CompletionLedger,
    ) -> Self {
        let persister = ArticlePersister::new(&config.root);
        Self {
            config,
            ctx: Arc::new(UnitContext {
                fetcher,
                converter,
                ledger,
                persister,
            }),
        }
    }

    /// Process every article of every tag in `tags`.
    ///
    /// When `shutdown` resolves, no further units are dispatched; units
    /// already running are awaited and the summary is marked interrupted.
    #[instrument(skip_all, fields(tags = tags.len(), threads = self.config.threads))]
    pub async fn run<F>(
        &self,
        tags: Vec<TagSource>,
        progress: &dyn ProgressReporter,
        shutdown: F,
    ) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.threads));
        let mut units: JoinSet<(ArticleRef, UnitOutcome)> = JoinSet::new();
        let mut tracker = RunTracker::new(self.config.max_consecutive_io_errors, tags.len());
        tokio::pin!(shutdown);

        let total_tags = tags.len();
        'tags: for (index, source) in tags.into_iter().enumerate() {
            progress.tag_started(&source.tag, index + 1, total_tags);
            info!(tag = %source.tag, url = %source.listing_url, "enumerating tag");
            let mut listing = TagListing::new(source, Arc::clone(&self.ctx.fetcher));

            loop {
                while let Some(joined) = units.try_join_next() {
                    tracker.finish(joined, progress);
                }
                if tracker.escalated() {
                    break 'tags;
                }

                let permit = tokio::select! {
                    biased;
                    () = &mut shutdown => {
                        tracker.summary.interrupted = true;
                        break 'tags;
                    }
                    permit = Arc::clone(&semaphore).acquire_owned() => permit
                        .map_err(|_| TagCrawlError::systemic("worker pool closed"))?,
                };

                let next = tokio::select! {
                    biased;
                    () = &mut shutdown => {
                        tracker.summary.interrupted = true;
                        break 'tags;
                    }
                    next = listing.next() => next,
                };

                match next {
                    Ok(Some(article)) => {
                        tracker.summary.articles_seen += 1;
                        let ctx = Arc::clone(&self.ctx);
                        units.spawn(async move {
                            let outcome = run_isolated(ctx, article.clone()).await;
                            drop(permit);
                            (article, outcome)
                        });
                    }
                    Ok(None) => {
                        info!(tag = %listing.tag(), pages = listing.pages_fetched(), "tag enumerated");
                        break;
                    }
                    Err(e) => {
                        warn!(tag = %listing.tag(), kind = e.kind(), error = %e, "tag listing failed, skipping rest of tag");
                        tracker.summary.tag_failures.push(TagFailure {
                            tag: listing.tag().to_string(),
                            kind: e.kind(),
                            message: e.to_string(),
                        });
                        break;
                    }
                }
            }
        }

        if tracker.summary.interrupted {
            warn!(in_flight = units.len(), "shutdown requested, finishing in-flight articles");
        }
        while let Some(joined) = units.join_next().await {
            tracker.finish(joined, progress);
        }

        // Units drained after the abort may succeed; the run is still aborted.
        let escalated = tracker.escalated();
        let mut summary = tracker.summary;
        summary.duration = start.elapsed();

        if escalated {
            error!(
                consecutive = tracker.io_limit,
                saved = summary.saved,
                "aborting run after repeated I/O failures"
            );
            return Err(TagCrawlError::systemic(format!(
                "{} consecutive I/O failures while saving articles under {}",
                tracker.io_limit,
                self.config.root.display()
            )));
        }

        info!(
            saved = summary.saved,
            skipped = summary.skipped,
            failed = summary.failed,
            interrupted = summary.interrupted,
            elapsed_ms = summary.duration.as_millis() as u64,
            "run complete"
        );
        progress.done(&summary);
        Ok(summary)
    }
}

/// Folds finished units into the summary and watches the I/O streak.
struct RunTracker {
    summary: RunSummary,
    io_streak: usize,
    io_limit: usize,
    /// Latched once the streak reaches the limit.
    escalated: bool,
}

impl RunTracker {
    fn new(io_limit: usize, tags: usize) -> Self {
        Self {
            summary: RunSummary {
                tags,
                ..RunSummary::default()
            },
            io_streak: 0,
            io_limit,
            escalated: false,
        }
    }

    fn escalated(&self) -> bool {
        self.escalated
    }

    fn finish(
        &mut self,
        joined: std::result::Result<(ArticleRef, UnitOutcome), tokio::task::JoinError>,
        progress: &dyn ProgressReporter,
    ) {
        let (article, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                // Units catch their own panics, so only an aborted task lands here.
                error!(error = %e, "processing unit task failed");
                self.summary.failed += 1;
                self.summary.failures.push(ArticleFailure {
                    tag: String::new(),
                    article_id: String::new(),
                    url: String::new(),
                    kind: "panic",
                    message: e.to_string(),
                });
                return;
            }
        };

        match &outcome {
            UnitOutcome::Saved(path) => {
                self.io_streak = 0;
                info!(%article, path = %path.display(), "saved");
            }
            UnitOutcome::Skipped => info!(%article, "already done, skipped"),
            UnitOutcome::Failed(e) => {
                if e.is_io() {
                    self.io_streak += 1;
                    if self.io_streak >= self.io_limit {
                        self.escalated = true;
                    }
                } else {
                    self.io_streak = 0;
                }
                error!(%article, kind = e.kind(), error = %e, "article failed");
            }
        }

        self.summary.record(&article, &outcome);
        progress.article_finished(&article, &outcome);
    }
}

/// Run a unit on its own task so that a panic is reported against its
/// article instead of losing it.
async fn run_isolated(ctx: Arc<UnitContext>, article: ArticleRef) -> UnitOutcome {
    let unit = tokio::spawn(async move { process_unit(&ctx, &article).await });
    match unit.await {
        Ok(outcome) => outcome,
        Err(e) => UnitOutcome::Failed(TagCrawlError::Panicked {
            message: e.to_string(),
        }),
    }
}

/// One article, start to finish. Saving always precedes marking.
async fn process_unit(ctx: &UnitContext, article: &ArticleRef) -> UnitOutcome {
    match try_process_unit(ctx, article).await {
        Ok(Some(path)) => UnitOutcome::Saved(path),
        Ok(None) => UnitOutcome::Skipped,
        Err(e) => UnitOutcome::Failed(e),
    }
}

async fn try_process_unit(ctx: &UnitContext, article: &ArticleRef) -> Result<Option<PathBuf>> {
    if ctx.ledger.is_done(&article.tag, &article.id).await? {
        return Ok(None);
    }

    let response = ctx.fetcher.fetch_article(article).await?;
    let converted = ctx.converter.convert(&article.url, &response.text())?;
    let path = ctx
        .persister
        .save(article, &converted.title, &converted.markdown)
        .await?;
    ctx.ledger.mark_done(&article.tag, &article.id).await?;
    Ok(Some(path))
}
