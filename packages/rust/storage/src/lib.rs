//! Completion ledger.
//!
//! The [`CompletionLedger`] records which `(tag, article)` pairs have been
//! saved and answers the resume/skip question. The markers themselves live in
//! a [`KeySetStore`]; two backends exist:
//!
//! - [`FileMarkerStore`]: empty `<root>/<tag>/.done/p<ID>.done` files
//! - [`SqliteMarkerStore`]: a local libSQL database
//!
//! The ledger is the only writer of markers.

mod files;
mod migrations;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use tagcrawl_shared::{ArticleId, CrawlConfig, LedgerBackend, Result, Tag};

pub use files::{FileMarkerStore, MARKER_DIR};
pub use sqlite::SqliteMarkerStore;

/// A set of `(tag, id)` keys with existence checks.
///
/// `insert` must be idempotent and safe to call concurrently, including for
/// the same key.
#[async_trait]
pub trait KeySetStore: Send + Sync {
    async fn exists(&self, tag: &Tag, id: &ArticleId) -> Result<bool>;

    async fn insert(&self, tag: &Tag, id: &ArticleId) -> Result<()>;

    /// Remove every key of `tag`, returning how many were removed.
    async fn clear_tag(&self, tag: &Tag) -> Result<u64>;
}

/// Resume/skip decisions backed by a [`KeySetStore`].
#[derive(Clone)]
pub struct CompletionLedger {
    store: Arc<dyn KeySetStore>,
    resume: bool,
}

impl CompletionLedger {
    pub fn new(store: Arc<dyn KeySetStore>, resume: bool) -> Self {
        Self { store, resume }
    }

    /// Open the backend selected in `config`.
    pub async fn open(config: &CrawlConfig) -> Result<Self> {
        let store: Arc<dyn KeySetStore> = match config.ledger {
            LedgerBackend::Files => Arc::new(FileMarkerStore::new(&config.root)),
            LedgerBackend::Sqlite => {
                Arc::new(SqliteMarkerStore::open(&config.ledger_db_path).await?)
            }
        };
        info!(backend = ?config.ledger, resume = config.resume, "completion ledger ready");
        Ok(Self::new(store, config.resume))
    }

    /// Whether `(tag, id)` was completed by an earlier run.
    ///
    /// Always `false`, without consulting the store, when resume is disabled.
    pub async fn is_done(&self, tag: &Tag, id: &ArticleId) -> Result<bool> {
        if !self.resume {
            return Ok(false);
        }
        self.store.exists(tag, id).await
    }

    /// Record `(tag, id)` as complete. Marking twice is a no-op.
    pub async fn mark_done(&self, tag: &Tag, id: &ArticleId) -> Result<()> {
        self.store.insert(tag, id).await?;
        debug!(%tag, article_id = %id, "marked done");
        Ok(())
    }

    /// Forget every marker of `tag` so its articles are fetched again.
    pub async fn clear_tag(&self, tag: &Tag) -> Result<u64> {
        let removed = self.store.clear_tag(tag).await?;
        info!(%tag, removed, "cleared completion markers");
        Ok(removed)
    }
}
