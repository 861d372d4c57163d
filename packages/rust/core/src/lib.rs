//! Core orchestration for tagcrawl.
//!
//! This crate ties discovery, fetching, conversion, and the completion
//! ledger together into the `crawl` run, and hosts the `tidy`
//! post-processing passes over a finished article tree.

pub mod persist;
pub mod pipeline;
pub mod scheduler;
pub mod tidy;

pub use persist::{ArticlePersister, article_file_name};
pub use pipeline::{
    CrawlComponents, ProgressReporter, SilentProgress, crawl, retrying_fetcher, run_crawl,
};
pub use scheduler::{ArticleFailure, RunSummary, Scheduler, TagFailure, UnitOutcome};
