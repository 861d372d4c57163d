//! End-to-end `crawl` pipeline: tag index → listings → articles → Markdown.

use std::future::Future;
use std::sync::Arc;

use tracing::{info, instrument};

use tagcrawl_crawler::{HttpFetcher, PolitenessGate, RetryingFetcher};
use tagcrawl_markdown::ArticleConverter;
use tagcrawl_shared::{
    ArticleRef, ContentConverter, CrawlConfig, Fetcher, Result, Tag, TagCrawlError,
};
use tagcrawl_storage::CompletionLedger;

use crate::scheduler::{RunSummary, Scheduler, UnitOutcome};

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before a tag's listing is enumerated.
    fn tag_started(&self, tag: &Tag, current: usize, total: usize);
    /// Called once per processed article, whatever the outcome.
    fn article_finished(&self, article: &ArticleRef, outcome: &UnitOutcome);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn tag_started(&self, _tag: &Tag, _current: usize, _total: usize) {}
    fn article_finished(&self, _article: &ArticleRef, _outcome: &UnitOutcome) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// The injected collaborators of a run.
pub struct CrawlComponents {
    pub fetcher: Arc<dyn Fetcher>,
    pub converter: Arc<dyn ContentConverter>,
    pub ledger: CompletionLedger,
}

impl CrawlComponents {
    /// Production wiring: `reqwest` transport, article converter, and the
    /// ledger backend selected in `config`.
    pub async fn from_config(config: &CrawlConfig) -> Result<Self> {
        Ok(Self {
            fetcher: Arc::new(HttpFetcher::new(config)?),
            converter: Arc::new(ArticleConverter::new()),
            ledger: CompletionLedger::open(config).await?,
        })
    }
}

/// Build the shared fetch path: one gate for the whole process.
pub fn retrying_fetcher(config: &CrawlConfig, fetcher: Arc<dyn Fetcher>) -> Arc<RetryingFetcher> {
    let gate = Arc::new(PolitenessGate::new(config.delay));
    Arc::new(RetryingFetcher::new(fetcher, gate, config.retries))
}

/// Run a crawl with production components.
pub async fn crawl<F>(
    config: Arc<CrawlConfig>,
    progress: &dyn ProgressReporter,
    shutdown: F,
) -> Result<RunSummary>
where
    F: Future<Output = ()>,
{
    ensure_root(&config).await?;
    let components = CrawlComponents::from_config(&config).await?;
    run_crawl(config, components, progress, shutdown).await
}

/// Run a crawl with the given components.
///
/// 1. Discover tags from the tag index (allow-list applied)
/// 2. Enumerate and process each tag's articles
#[instrument(skip_all, fields(root = %config.root.display()))]
pub async fn run_crawl<F>(
    config: Arc<CrawlConfig>,
    components: CrawlComponents,
    progress: &dyn ProgressReporter,
    shutdown: F,
) -> Result<RunSummary>
where
    F: Future<Output = ()>,
{
    let fetcher = retrying_fetcher(&config, components.fetcher);

    progress.phase("Discovering tags");
    let tags = tagcrawl_discovery::discover_tags(&fetcher, &config).await?;
    info!(
        tags = tags.len(),
        threads = config.threads,
        delay_min = config.delay.min_secs(),
        delay_max = config.delay.max_secs(),
        resume = config.resume,
        "starting crawl"
    );

    progress.phase("Crawling articles");
    let scheduler = Scheduler::new(
        Arc::clone(&config),
        fetcher,
        components.converter,
        components.ledger,
    );
    scheduler.run(tags, progress, shutdown).await
}

/// Create the output root; failure here aborts the run.
async fn ensure_root(config: &CrawlConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.root).await.map_err(|e| {
        TagCrawlError::systemic(format!(
            "cannot create output root {}: {e}",
            config.root.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tagcrawl_shared::{
        AppConfig, ArticleId, ConvertedArticle, FetchResponse, NetworkError,
    };
    use tagcrawl_storage::FileMarkerStore;
    use url::Url;
    use uuid::Uuid;

    use super::*;

    const BASE: &str = "https://blog.example.com/me";

    /// In-memory catalog that records every requested URL.
    #[derive(Default)]
    struct FakeCatalog {
        tags: Vec<(String, Vec<u32>)>,
        missing: Vec<u32>,
        slow: Vec<u32>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeCatalog {
        fn new() -> Self {
            Self::default()
        }

        /// Add a tag with one listing page holding `ids`.
        fn tag(mut self, name: &str, ids: &[u32]) -> Self {
            self.tags.push((name.to_string(), ids.to_vec()));
            self
        }

        /// Make an article page answer 404.
        fn without_article(mut self, id: u32) -> Self {
            self.missing.push(id);
            self
        }

        /// Delay the answer for an article page.
        fn with_slow_article(mut self, id: u32) -> Self {
            self.slow.push(id);
            self
        }

        fn is_slow(&self, url: &str) -> bool {
            self.slow
                .iter()
                .any(|id| url == format!("{BASE}/p/{id}.html"))
        }

        fn page(&self, url: &str) -> Option<String> {
            let path = url.strip_prefix(BASE)?;
            if path == "/tag/" {
                let links: String = self
                    .tags
                    .iter()
                    .map(|(tag, ids)| {
                        format!(r#"<li><a href="{BASE}/tag/{tag}/">{tag} ({})</a></li>"#, ids.len())
                    })
                    .collect();
                return Some(format!(
                    "<html><body><h3>My Tags</h3><ul>{links}</ul></body></html>"
                ));
            }
            if let Some(tag) = path.strip_prefix("/tag/").and_then(|t| t.strip_suffix('/')) {
                let (_, ids) = self.tags.iter().find(|(name, _)| name == tag)?;
                let items: String = ids
                    .iter()
                    .map(|id| format!(r#"<a href="{BASE}/p/{id}.html">Post {id}</a>"#))
                    .collect();
                return Some(format!(
                    r#"<html><body><div id="mainContent">{items}</div></body></html>"#
                ));
            }
            let id: u32 = path.strip_prefix("/p/")?.strip_suffix(".html")?.parse().ok()?;
            let listed = self.tags.iter().any(|(_, ids)| ids.contains(&id));
            (listed && !self.missing.contains(&id)).then(|| format!("article {id}"))
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        fn article_fetches(&self, id: u32) -> usize {
            let url = format!("{BASE}/p/{id}.html");
            self.requests().iter().filter(|r| **r == url).count()
        }
    }

    #[async_trait]
    impl Fetcher for FakeCatalog {
        async fn fetch(&self, url: &Url) -> std::result::Result<FetchResponse, NetworkError> {
            self.requests.lock().unwrap().push(url.to_string());
            if self.is_slow(url.as_str()) {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            }
            match self.page(url.as_str()) {
                Some(body) => Ok(FetchResponse::new(200, body)),
                None => Ok(FetchResponse::new(404, Vec::new())),
            }
        }
    }

    /// Turns `article <id>` into Markdown; fails for the configured IDs.
    struct FakeConverter {
        fail_ids: Vec<String>,
        panic_ids: Vec<String>,
        calls: AtomicUsize,
    }

    impl FakeConverter {
        fn new(fail_ids: &[&str]) -> Self {
            Self {
                fail_ids: fail_ids.iter().map(|s| s.to_string()).collect(),
                panic_ids: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn panicking_on(mut self, ids: &[&str]) -> Self {
            self.panic_ids = ids.iter().map(|s| s.to_string()).collect();
            self
        }
    }

    impl ContentConverter for FakeConverter {
        fn convert(&self, source_url: &Url, html: &str) -> Result<ConvertedArticle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let id = html.trim_start_matches("article ");
            if self.panic_ids.iter().any(|p| p == id) {
                panic!("converter bug on article {id}");
            }
            if self.fail_ids.iter().any(|f| f == id) {
                return Err(TagCrawlError::extraction(format!("no body in {source_url}")));
            }
            Ok(ConvertedArticle {
                title: "Same Title".into(),
                markdown: format!("# {id}\n"),
            })
        }
    }

    fn test_config(root: &Path, only: &[&str], resume: bool, threads: usize) -> Arc<CrawlConfig> {
        let mut app = AppConfig::default();
        app.crawl.root = root.to_string_lossy().into_owned();
        app.crawl.base_tag_url = format!("{BASE}/tag/");
        app.crawl.delay_min = 0.0;
        app.crawl.delay_max = 0.0;
        app.crawl.retries = 1;
        app.crawl.threads = threads;
        app.crawl.resume = resume;
        app.crawl.only_tags = only.iter().map(|s| s.to_string()).collect();
        Arc::new(CrawlConfig::try_from(&app).unwrap())
    }

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("tagcrawl_pipeline_{}", Uuid::now_v7()))
    }

    async fn run(
        config: &Arc<CrawlConfig>,
        catalog: &Arc<FakeCatalog>,
        converter: Arc<FakeConverter>,
    ) -> Result<RunSummary> {
        let components = CrawlComponents {
            fetcher: Arc::clone(catalog) as Arc<dyn Fetcher>,
            converter,
            ledger: CompletionLedger::new(
                Arc::new(FileMarkerStore::new(&config.root)),
                config.resume,
            ),
        };
        run_crawl(Arc::clone(config), components, &SilentProgress, std::future::pending()).await
    }

    fn marker(root: &Path, tag: &str, id: &str) -> PathBuf {
        FileMarkerStore::new(root).marker_path(&Tag::new(tag), &ArticleId::new(id))
    }

    #[tokio::test]
    async fn crawls_every_article_and_marks_it() {
        let root = temp_root();
        let catalog = Arc::new(FakeCatalog::new().tag("A", &[1, 2]).tag("B", &[3]));
        let config = test_config(&root, &[], true, 2);

        let summary = run(&config, &catalog, Arc::new(FakeConverter::new(&[]))).await.unwrap();

        assert_eq!(summary.tags, 2);
        assert_eq!(summary.saved, 3);
        assert_eq!(summary.failed, 0);
        assert!(root.join("A").join("Same Title [p1].md").exists());
        assert!(root.join("B").join("Same Title [p3].md").exists());
        assert!(marker(&root, "A", "2").exists());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn resume_skips_done_articles_without_fetching() {
        let root = temp_root();
        let catalog = Arc::new(FakeCatalog::new().tag("A", &[7, 8]));
        let config = test_config(&root, &[], true, 1);
        let ledger = FileMarkerStore::new(&root);
        tagcrawl_storage::KeySetStore::insert(&ledger, &Tag::new("A"), &ArticleId::new("7"))
            .await
            .unwrap();

        let summary = run(&config, &catalog, Arc::new(FakeConverter::new(&[]))).await.unwrap();

        assert_eq!(catalog.article_fetches(7), 0);
        assert_eq!(catalog.article_fetches(8), 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.saved, 1);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn resume_disabled_fetches_done_articles_again() {
        let root = temp_root();
        let catalog = Arc::new(FakeCatalog::new().tag("A", &[7]));
        let first = test_config(&root, &[], true, 1);
        run(&first, &catalog, Arc::new(FakeConverter::new(&[]))).await.unwrap();
        assert!(marker(&root, "A", "7").exists());

        let second = test_config(&root, &[], false, 1);
        let summary = run(&second, &catalog, Arc::new(FakeConverter::new(&[]))).await.unwrap();

        assert_eq!(catalog.article_fetches(7), 2);
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.skipped, 0);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn allow_list_never_touches_other_tags() {
        let root = temp_root();
        let catalog = Arc::new(FakeCatalog::new().tag("A", &[1]).tag("B", &[2]).tag("C", &[3]));
        let config = test_config(&root, &["A", "B"], true, 2);

        let summary = run(&config, &catalog, Arc::new(FakeConverter::new(&[]))).await.unwrap();

        assert_eq!(summary.saved, 2);
        let c_urls = [format!("{BASE}/tag/C/"), format!("{BASE}/p/3.html")];
        assert!(catalog.requests().iter().all(|r| !c_urls.contains(r)));
        assert!(!root.join("C").exists());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn extraction_failure_is_isolated() {
        let root = temp_root();
        let catalog = Arc::new(FakeCatalog::new().tag("A", &[5, 6, 7]).tag("B", &[8]));
        let config = test_config(&root, &[], true, 2);
        let converter = Arc::new(FakeConverter::new(&["5"]));

        let summary = run(&config, &catalog, Arc::clone(&converter)).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.saved, 3);
        assert_eq!(summary.failures[0].article_id, "5");
        assert_eq!(summary.failures[0].kind, "extraction");
        assert!(!marker(&root, "A", "5").exists());
        for (tag, id) in [("A", "6"), ("A", "7"), ("B", "8")] {
            assert!(marker(&root, tag, id).exists(), "{tag}/{id} not marked");
        }
        // Extraction errors are not retried.
        assert_eq!(catalog.article_fetches(5), 1);
        assert!(!summary.all_failed());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn missing_article_exhausts_retries_and_is_reported() {
        let root = temp_root();
        let catalog = Arc::new(FakeCatalog::new().tag("A", &[1, 2]).without_article(2));
        let config = test_config(&root, &[], true, 1);

        let summary = run(&config, &catalog, Arc::new(FakeConverter::new(&[]))).await.unwrap();

        assert_eq!(catalog.article_fetches(2), 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].kind, "fetch");
        assert_eq!(summary.saved, 1);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn every_attempt_failing_is_reported_as_all_failed() {
        let root = temp_root();
        let catalog = Arc::new(FakeCatalog::new().tag("A", &[1, 2]));
        let config = test_config(&root, &[], true, 1);

        let summary = run(&config, &catalog, Arc::new(FakeConverter::new(&["1", "2"])))
            .await
            .unwrap();

        assert!(summary.all_failed());
        assert_eq!(summary.attempted(), 2);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn repeated_io_failures_abort_the_run() {
        let root = temp_root();
        std::fs::create_dir_all(&root).unwrap();
        // A file where the tag directory should be makes every save fail.
        std::fs::write(root.join("A"), "blocker").unwrap();
        let catalog = Arc::new(FakeCatalog::new().tag("A", &[1, 2, 3, 4, 5]));
        let config = test_config(&root, &[], true, 1);

        let err = run(&config, &catalog, Arc::new(FakeConverter::new(&[])))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "systemic");
        assert!(catalog.article_fetches(5) == 0 || catalog.article_fetches(4) == 0);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn io_abort_holds_even_when_drained_units_succeed() {
        let root = temp_root();
        // A directory squatting on article 1's file name makes its save fail.
        let blocked = root.join("A").join("Same Title [p1].md");
        std::fs::create_dir_all(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), "x").unwrap();

        let catalog = Arc::new(
            FakeCatalog::new()
                .tag("A", &[1, 2, 3, 4, 5, 6])
                .with_slow_article(2),
        );
        let mut config = (*test_config(&root, &[], true, 2)).clone();
        config.max_consecutive_io_errors = 1;
        let config = Arc::new(config);

        let err = run(&config, &catalog, Arc::new(FakeConverter::new(&[])))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "systemic");
        // Article 2 finished after the abort and was still saved.
        assert!(root.join("A").join("Same Title [p2].md").exists());
        assert_eq!(catalog.article_fetches(6), 0);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn panicking_unit_is_reported_against_its_article() {
        let root = temp_root();
        let catalog = Arc::new(FakeCatalog::new().tag("A", &[1, 2]));
        let config = test_config(&root, &[], true, 2);
        let converter = Arc::new(FakeConverter::new(&[]).panicking_on(&["2"]));

        let summary = run(&config, &catalog, converter).await.unwrap();

        assert_eq!(summary.saved, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures.len(), summary.failed);
        assert_eq!(summary.failures[0].article_id, "2");
        assert_eq!(summary.failures[0].kind, "panic");
        assert!(!marker(&root, "A", "2").exists());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn shutdown_before_start_dispatches_nothing() {
        let root = temp_root();
        let catalog = Arc::new(FakeCatalog::new().tag("A", &[1, 2]));
        let config = test_config(&root, &[], true, 1);
        let components = CrawlComponents {
            fetcher: Arc::clone(&catalog) as Arc<dyn Fetcher>,
            converter: Arc::new(FakeConverter::new(&[])),
            ledger: CompletionLedger::new(Arc::new(FileMarkerStore::new(&root)), true),
        };

        let summary = run_crawl(config, components, &SilentProgress, std::future::ready(()))
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.articles_seen, 0);
        assert_eq!(catalog.article_fetches(1), 0);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn summary_serializes_duration_as_millis() {
        let summary = RunSummary {
            duration: std::time::Duration::from_millis(1500),
            ..RunSummary::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["duration_ms"], 1500);
        assert_eq!(json["interrupted"], false);
    }
}
