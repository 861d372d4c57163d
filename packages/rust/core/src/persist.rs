//! Article persister: `<root>/<tag>/<Title> [p<ID>].md`.

use std::path::PathBuf;

use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use tagcrawl_shared::{ArticleRef, Result, TagCrawlError, UNTITLED, sanitize_filename};

/// Writes converted articles below the output root.
#[derive(Debug, Clone)]
pub struct ArticlePersister {
    root: PathBuf,
}

impl ArticlePersister {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write `markdown` for `article`, replacing any earlier copy.
    ///
    /// The content goes to a temporary file in the same directory first and
    /// is renamed into place, so readers never see a partial file.
    pub async fn save(&self, article: &ArticleRef, title: &str, markdown: &str) -> Result<PathBuf> {
        let dir = self.root.join(article.tag.dir_name());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| TagCrawlError::io(&dir, e))?;

        // The ID suffix keeps equal titles apart.
        let path = dir.join(article_file_name(article, title));
        let tmp = dir.join(format!(".{}.{}.tmp", article.id.prefixed(), Uuid::now_v7()));

        if let Err(e) = fs::write(&tmp, markdown).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(TagCrawlError::io(&tmp, e));
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(TagCrawlError::io(&path, e));
        }

        debug!(path = %path.display(), bytes = markdown.len(), "article saved");
        Ok(path)
    }
}

/// `<sanitized title> [p<ID>].md`
pub fn article_file_name(article: &ArticleRef, title: &str) -> String {
    let mut name = sanitize_filename(title);
    if name.is_empty() {
        name = UNTITLED.to_string();
    }
    format!("{name} [{}].md", article.id.prefixed())
}
