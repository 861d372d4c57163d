//! Shared types, error model, configuration, and capability traits for tagcrawl.
//!
//! This crate is the foundation depended on by all other tagcrawl crates.
//! It provides:
//! - [`TagCrawlError`]: the unified error type, plus the fetch failure taxonomy
//! - Domain types ([`Tag`], [`ArticleId`], [`ArticleRef`], [`TagSource`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)
//! - Injected capabilities ([`Fetcher`], [`ContentConverter`])

pub mod capability;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use capability::{ContentConverter, ConvertedArticle, FetchResponse, Fetcher};
pub use config::{
    AppConfig, CrawlConfig, CrawlSection, DelayWindow, HttpSection, LedgerBackend,
    LedgerSection, MAX_THREADS, TidySection, config_dir, config_file_path, init_config,
    init_config_at, load_config, load_config_from,
};
pub use error::{FailureCause, FetchError, NetworkError, Result, TagCrawlError};
pub use types::{ArticleId, ArticleRef, Tag, TagSource, UNTITLED, sanitize_filename};
