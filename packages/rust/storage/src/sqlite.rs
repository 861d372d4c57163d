//! libSQL backend: completion markers as rows of a local database.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};

use tagcrawl_shared::{ArticleId, Result, Tag, TagCrawlError};

use crate::{KeySetStore, migrations};

/// Stores markers in the `completion_markers` table.
pub struct SqliteMarkerStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl SqliteMarkerStore {
    /// Open or create the database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TagCrawlError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| TagCrawlError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| TagCrawlError::Storage(e.to_string()))?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying ledger migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    TagCrawlError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 on a fresh database.
    async fn schema_version(&self) -> u32 {
        let Ok(mut rows) = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await
        else {
            return 0;
        };

        match rows.next().await {
            Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
            _ => 0,
        }
    }

    /// Number of markers recorded for `tag`.
    pub async fn count(&self, tag: &Tag) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM completion_markers WHERE tag = ?1",
                params![tag.as_str()],
            )
            .await
            .map_err(|e| TagCrawlError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map(|n| n.max(0) as u64)
                .map_err(|e| TagCrawlError::Storage(e.to_string())),
            Ok(None) => Ok(0),
            Err(e) => Err(TagCrawlError::Storage(e.to_string())),
        }
    }
}

#[async_trait]
impl KeySetStore for SqliteMarkerStore {
    async fn exists(&self, tag: &Tag, id: &ArticleId) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM completion_markers WHERE tag = ?1 AND article_id = ?2",
                params![tag.as_str(), id.as_str()],
            )
            .await
            .map_err(|e| TagCrawlError::Storage(e.to_string()))?;

        let row = rows
            .next()
            .await
            .map_err(|e| TagCrawlError::Storage(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn insert(&self, tag: &Tag, id: &ArticleId) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT OR IGNORE INTO completion_markers (tag, article_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![tag.as_str(), id.as_str(), now.as_str()],
            )
            .await
            .map_err(|e| TagCrawlError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn clear_tag(&self, tag: &Tag) -> Result<u64> {
        self.conn
            .execute(
                "DELETE FROM completion_markers WHERE tag = ?1",
                params![tag.as_str()],
            )
            .await
            .map_err(|e| TagCrawlError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    async fn test_store() -> SqliteMarkerStore {
        let tmp = std::env::temp_dir().join(format!("tagcrawl_ledger_{}.db", Uuid::now_v7()));
        SqliteMarkerStore::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.schema_version().await, 1);
        // Re-running migrations on an up-to-date database is a no-op.
        store.run_migrations().await.expect("second migration pass");
        assert_eq!(store.schema_version().await, 1);
    }

    #[tokio::test]
    async fn insert_is_idempotent() {
        let store = test_store().await;
        let tag = Tag::new("Linux");
        let id = ArticleId::new("7");

        assert!(!store.exists(&tag, &id).await.unwrap());
        store.insert(&tag, &id).await.unwrap();
        store.insert(&tag, &id).await.unwrap();
        assert!(store.exists(&tag, &id).await.unwrap());
        assert_eq!(store.count(&tag).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn markers_are_scoped_by_tag() {
        let store = test_store().await;
        let id = ArticleId::new("1");
        store.insert(&Tag::new("A"), &id).await.unwrap();

        assert!(!store.exists(&Tag::new("B"), &id).await.unwrap());
        assert_eq!(store.clear_tag(&Tag::new("A")).await.unwrap(), 1);
        assert!(!store.exists(&Tag::new("A"), &id).await.unwrap());
    }
}
