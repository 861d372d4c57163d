//! Marker-file backend: one empty file per completed article.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use tagcrawl_shared::{ArticleId, Result, Tag, TagCrawlError};

use crate::KeySetStore;

/// Directory (inside each tag directory) holding the markers.
pub const MARKER_DIR: &str = ".done";

const MARKER_EXT: &str = "done";

/// Stores markers as `<root>/<tag>/.done/p<ID>.done`.
#[derive(Debug, Clone)]
pub struct FileMarkerStore {
    root: PathBuf,
}

impl FileMarkerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn marker_dir(&self, tag: &Tag) -> PathBuf {
        self.root.join(tag.dir_name()).join(MARKER_DIR)
    }

    /// Path of the marker for `(tag, id)`.
    pub fn marker_path(&self, tag: &Tag, id: &ArticleId) -> PathBuf {
        self.marker_dir(tag)
            .join(format!("{}.{MARKER_EXT}", id.prefixed()))
    }
}

#[async_trait]
impl KeySetStore for FileMarkerStore {
    async fn exists(&self, tag: &Tag, id: &ArticleId) -> Result<bool> {
        let path = self.marker_path(tag, id);
        fs::try_exists(&path)
            .await
            .map_err(|e| TagCrawlError::io(&path, e))
    }

    async fn insert(&self, tag: &Tag, id: &ArticleId) -> Result<()> {
        let dir = self.marker_dir(tag);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| TagCrawlError::io(&dir, e))?;

        let path = self.marker_path(tag, id);
        // create_new makes concurrent inserts of the same marker race-free
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(TagCrawlError::io(&path, e)),
        }
    }

    async fn clear_tag(&self, tag: &Tag) -> Result<u64> {
        let dir = self.marker_dir(tag);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(TagCrawlError::io(&dir, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TagCrawlError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == MARKER_EXT) {
                fs::remove_file(&path)
                    .await
                    .map_err(|e| TagCrawlError::io(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
