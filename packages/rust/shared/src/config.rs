//! Application configuration for tagcrawl.
//!
//! User config lives at `~/.tagcrawl/tagcrawl.toml` (or wherever `--config`
//! points). CLI flags override config file values, which override defaults.
//! The file is resolved once into an immutable [`CrawlConfig`] that every
//! component receives explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TagCrawlError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "tagcrawl.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".tagcrawl";

/// Upper bound on concurrent workers; larger values are capped.
pub const MAX_THREADS: usize = 8;

/// Browser-like User-Agent; the catalog serves reduced pages to unknown clients.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

// ---------------------------------------------------------------------------
// Config structs (matching tagcrawl.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Crawl behaviour.
    #[serde(default)]
    pub crawl: CrawlSection,

    /// HTTP transport settings.
    #[serde(default)]
    pub http: HttpSection,

    /// Completion ledger backend.
    #[serde(default)]
    pub ledger: LedgerSection,

    /// Post-processing defaults.
    #[serde(default)]
    pub tidy: TidySection,
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// Output root; articles land in `<root>/<tag>/`.
    #[serde(default = "default_root")]
    pub root: String,

    /// Tag index page listing every tag of the catalog.
    #[serde(default = "default_base_tag_url")]
    pub base_tag_url: String,

    /// Lower bound of the randomized inter-request delay, in seconds.
    #[serde(default = "default_delay_min")]
    pub delay_min: f64,

    /// Upper bound of the randomized inter-request delay, in seconds.
    #[serde(default = "default_delay_max")]
    pub delay_max: f64,

    /// Number of parallel article workers.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Extra attempts after the first failed fetch.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Only crawl these tags. Empty means every tag.
    #[serde(default)]
    pub only_tags: Vec<String>,

    /// Skip articles that already have a completion marker.
    #[serde(default = "default_true")]
    pub resume: bool,

    /// Abort the run after this many I/O failures in a row.
    #[serde(default = "default_max_consecutive_io_errors")]
    pub max_consecutive_io_errors: usize,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            base_tag_url: default_base_tag_url(),
            delay_min: default_delay_min(),
            delay_max: default_delay_max(),
            threads: default_threads(),
            retries: default_retries(),
            only_tags: Vec::new(),
            resume: true,
            max_consecutive_io_errors: default_max_consecutive_io_errors(),
        }
    }
}

fn default_root() -> String {
    "MyArticles".into()
}
fn default_base_tag_url() -> String {
    "https://www.cnblogs.com/chuchengzhi/tag/".into()
}
fn default_delay_min() -> f64 {
    1.0
}
fn default_delay_max() -> f64 {
    2.0
}
fn default_threads() -> usize {
    1
}
fn default_retries() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_max_consecutive_io_errors() -> usize {
    3
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSection {
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_accept_language")]
    pub accept_language: String,

    #[serde(default = "default_referer")]
    pub referer: String,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            referer: default_referer(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    20
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}
fn default_accept_language() -> String {
    "zh-CN,zh;q=0.9".into()
}
fn default_referer() -> String {
    "https://www.cnblogs.com/".into()
}

/// Where completion markers are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// Empty `<root>/<tag>/.done/p<ID>.done` files.
    #[default]
    Files,
    /// A libSQL database file.
    Sqlite,
}

/// `[ledger]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSection {
    #[serde(default)]
    pub backend: LedgerBackend,

    /// Database path for the `sqlite` backend (defaults to `<root>/.ledger.db`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

/// `[tidy]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TidySection {
    /// Lines containing any of these substrings are dropped by `tidy clean-lines`.
    #[serde(default)]
    pub drop_line_patterns: Vec<String>,

    /// Directory (beside each Markdown file) for localized images.
    #[serde(default = "default_images_dir")]
    pub images_dir: String,
}

impl Default for TidySection {
    fn default() -> Self {
        Self {
            drop_line_patterns: Vec::new(),
            images_dir: default_images_dir(),
        }
    }
}

fn default_images_dir() -> String {
    "images".into()
}

// ---------------------------------------------------------------------------
// Delay window
// ---------------------------------------------------------------------------

/// Validated `[min, max]` politeness delay, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayWindow {
    min: f64,
    max: f64,
}

impl DelayWindow {
    /// Both bounds must be finite and non-negative, with `min <= max`.
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(TagCrawlError::config("delay bounds must be finite numbers"));
        }
        if min < 0.0 || max < 0.0 {
            return Err(TagCrawlError::config(format!(
                "delay bounds must not be negative (got {min}..{max})"
            )));
        }
        if min > max {
            return Err(TagCrawlError::config(format!(
                "delay_min ({min}) must not exceed delay_max ({max})"
            )));
        }
        Ok(Self { min, max })
    }

    /// A window that never waits.
    pub fn none() -> Self {
        Self { min: 0.0, max: 0.0 }
    }

    pub fn min_secs(&self) -> f64 {
        self.min
    }

    pub fn max_secs(&self) -> f64 {
        self.max
    }
}

// ---------------------------------------------------------------------------
// Crawl config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Immutable run configuration, shared read-only by every component.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Output root directory.
    pub root: PathBuf,
    /// Tag index page.
    pub base_tag_url: Url,
    /// Politeness delay bounds.
    pub delay: DelayWindow,
    /// Worker count, `1..=MAX_THREADS`.
    pub threads: usize,
    /// Retries after the first attempt (total attempts = retries + 1).
    pub retries: u32,
    /// Tag allow-list; `None` means all tags.
    pub only_tags: Option<Vec<String>>,
    /// Honour completion markers.
    pub resume: bool,
    /// Consecutive I/O failures that abort the run.
    pub max_consecutive_io_errors: usize,
    /// Transport timeout.
    pub timeout: Duration,
    pub user_agent: String,
    pub accept_language: String,
    pub referer: String,
    /// Completion ledger backend.
    pub ledger: LedgerBackend,
    /// Database path used by [`LedgerBackend::Sqlite`].
    pub ledger_db_path: PathBuf,
}

impl CrawlConfig {
    /// Whether `tag` passes the allow-list.
    pub fn allows_tag(&self, tag: &str) -> bool {
        match &self.only_tags {
            Some(tags) => tags.iter().any(|t| t == tag),
            None => true,
        }
    }
}

impl TryFrom<&AppConfig> for CrawlConfig {
    type Error = TagCrawlError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let crawl = &config.crawl;
        let delay = DelayWindow::new(crawl.delay_min, crawl.delay_max)?;

        if crawl.threads == 0 {
            return Err(TagCrawlError::config("threads must be at least 1"));
        }
        let threads = if crawl.threads > MAX_THREADS {
            tracing::warn!(
                requested = crawl.threads,
                max = MAX_THREADS,
                "thread count capped"
            );
            MAX_THREADS
        } else {
            crawl.threads
        };

        if crawl.max_consecutive_io_errors == 0 {
            return Err(TagCrawlError::config(
                "max_consecutive_io_errors must be at least 1",
            ));
        }
        if config.http.timeout_secs == 0 {
            return Err(TagCrawlError::config("http.timeout_secs must be at least 1"));
        }
        if crawl.root.trim().is_empty() {
            return Err(TagCrawlError::config("root directory must not be empty"));
        }

        let base_tag_url = Url::parse(&crawl.base_tag_url).map_err(|e| {
            TagCrawlError::config(format!("invalid base_tag_url '{}': {e}", crawl.base_tag_url))
        })?;

        let only_tags: Vec<String> = crawl
            .only_tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        let root = PathBuf::from(&crawl.root);
        let ledger_db_path = config
            .ledger
            .db_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| root.join(".ledger.db"));

        Ok(Self {
            root,
            base_tag_url,
            delay,
            threads,
            retries: crawl.retries,
            only_tags: (!only_tags.is_empty()).then_some(only_tags),
            resume: crawl.resume,
            max_consecutive_io_errors: crawl.max_consecutive_io_errors,
            timeout: Duration::from_secs(config.http.timeout_secs),
            user_agent: config.http.user_agent.clone(),
            accept_language: config.http.accept_language.clone(),
            referer: config.http.referer.clone(),
            ledger: config.ledger.backend,
            ledger_db_path,
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.tagcrawl/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TagCrawlError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.tagcrawl/tagcrawl.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TagCrawlError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| TagCrawlError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write a default config file to the default location.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    init_config_at(&path)?;
    Ok(path)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| TagCrawlError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| TagCrawlError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| TagCrawlError::io(path, e))?;
    tracing::info!(?path, "created default config file");
    Ok(())
}
