//! Post-processing of a crawled article tree.
//!
//! - [`clean_lines`]: drop lines containing any of a set of substrings
//! - [`localize_images`]: download remote images next to each article
//! - [`strip_ids`]: rename files to drop the ` [p<ID>]` suffix
//!
//! All of them walk the tree recursively, skipping hidden directories (the
//! completion markers live in `.done`).

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, instrument, warn};
use url::Url;

use tagcrawl_crawler::RetryingFetcher;
use tagcrawl_shared::{Result, TagCrawlError};

/// Extensions kept when naming a localized image.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg"];

/// Extensions `strip-ids` considers by default.
pub const DEFAULT_STRIP_EXTENSIONS: &[&str] = &[".md", ".html", ".txt"];

static REMOTE_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[([^\]]*)\]\((https?://[^)\s]+)\)").expect("valid regex")
});

static ID_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\[p\d+\]\s*").expect("valid regex"));

// ---------------------------------------------------------------------------
// Tree walking
// ---------------------------------------------------------------------------

/// Every regular file below `root` accepted by `keep`, sorted by path.
async fn walk_files(root: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let mut pending = vec![root.to_path_buf()];
    let mut files = Vec::new();

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| TagCrawlError::io(&dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TagCrawlError::io(&dir, e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| TagCrawlError::io(&path, e))?;
            let hidden = entry.file_name().to_string_lossy().starts_with('.');

            if file_type.is_dir() && !hidden {
                pending.push(path);
            } else if file_type.is_file() && keep(&path) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
}

async fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .map_err(|e| TagCrawlError::io(path, e))
}

async fn write_text(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content)
        .await
        .map_err(|e| TagCrawlError::io(path, e))
}

// ---------------------------------------------------------------------------
// clean-lines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub files_scanned: usize,
    pub files_changed: usize,
    pub lines_removed: usize,
}

/// Delete every line of every `*.md` file that contains one of `patterns`.
#[instrument(skip_all, fields(root = %root.display(), patterns = patterns.len()))]
pub async fn clean_lines(root: &Path, patterns: &[String]) -> Result<CleanReport> {
    let patterns: Vec<&str> = patterns
        .iter()
        .map(String::as_str)
        .filter(|p| !p.is_empty())
        .collect();
    let mut report = CleanReport::default();

    for path in walk_files(root, |p| has_extension(p, "md")).await? {
        report.files_scanned += 1;
        let content = read_text(&path).await?;

        let mut removed = 0;
        let kept: String = content
            .split_inclusive('\n')
            .filter(|line| {
                let drop = patterns.iter().any(|p| line.contains(p));
                removed += usize::from(drop);
                !drop
            })
            .collect();

        if removed > 0 {
            write_text(&path, &kept).await?;
            report.files_changed += 1;
            report.lines_removed += removed;
            debug!(path = %path.display(), removed, "lines removed");
        }
    }

    info!(
        files = report.files_scanned,
        changed = report.files_changed,
        lines = report.lines_removed,
        "clean-lines finished"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// localize-images
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageReport {
    pub files_scanned: usize,
    pub files_changed: usize,
    pub downloaded: usize,
    /// Images already present locally from an earlier pass.
    pub reused: usize,
    pub failed: usize,
}

/// Local file name for the `index`-th image link of a document.
pub fn local_image_name(url: &str, index: usize) -> String {
    let hash = format!("{:x}", Sha256::digest(url.as_bytes()));
    let ext = Url::parse(url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
        })
        .filter(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
        .unwrap_or_else(|| "jpg".to_string());

    if index > 0 {
        format!("image_{}_{index}.{ext}", &hash[..8])
    } else {
        format!("image_{}.{ext}", &hash[..8])
    }
}

/// Download remote images of every `*.md` file into `<file dir>/<images_dir>/`
/// and point the links at the local copies.
///
/// Downloads go through `fetcher`, so they share the crawl's politeness
/// delay and retry policy. A failed download leaves its link untouched.
#[instrument(skip_all, fields(root = %root.display(), images_dir = %images_dir))]
pub async fn localize_images(
    root: &Path,
    images_dir: &str,
    fetcher: &RetryingFetcher,
) -> Result<ImageReport> {
    let mut report = ImageReport::default();

    for path in walk_files(root, |p| has_extension(p, "md")).await? {
        report.files_scanned += 1;
        let content = read_text(&path).await?;
        let urls: Vec<String> = REMOTE_IMAGE_RE
            .captures_iter(&content)
            .map(|caps| caps[2].to_string())
            .collect();
        if urls.is_empty() {
            continue;
        }

        let local_dir = path
            .parent()
            .map(|p| p.join(images_dir))
            .unwrap_or_else(|| PathBuf::from(images_dir));

        let mut targets: Vec<Option<String>> = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            let name = local_image_name(url, index);
            let target = local_dir.join(&name);
            let ok = match fs::try_exists(&target).await {
                Ok(true) => {
                    report.reused += 1;
                    true
                }
                _ => match download(fetcher, url, &local_dir, &target).await {
                    Ok(()) => {
                        report.downloaded += 1;
                        true
                    }
                    Err(e) => {
                        warn!(%url, error = %e, "image download failed, keeping remote link");
                        report.failed += 1;
                        false
                    }
                },
            };
            targets.push(ok.then(|| format!("{images_dir}/{name}")));
        }

        let mut index = 0;
        let rewritten = REMOTE_IMAGE_RE.replace_all(&content, |caps: &Captures| {
            let replacement = match targets.get(index) {
                Some(Some(local)) => format!("![{}]({local})", &caps[1]),
                _ => caps[0].to_string(),
            };
            index += 1;
            replacement
        });

        if rewritten != content {
            write_text(&path, &rewritten).await?;
            report.files_changed += 1;
        }
    }

    info!(
        files = report.files_scanned,
        changed = report.files_changed,
        downloaded = report.downloaded,
        failed = report.failed,
        "localize-images finished"
    );
    Ok(report)
}

async fn download(fetcher: &RetryingFetcher, url: &str, dir: &Path, target: &Path) -> Result<()> {
    let url = Url::parse(url).map_err(|e| TagCrawlError::parse(format!("bad image url {url}: {e}")))?;
    let response = fetcher.fetch(&url).await?;
    fs::create_dir_all(dir)
        .await
        .map_err(|e| TagCrawlError::io(dir, e))?;
    fs::write(target, &response.body)
        .await
        .map_err(|e| TagCrawlError::io(target, e))
}

// ---------------------------------------------------------------------------
// strip-ids
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenameStatus {
    /// Dry run: would be renamed.
    Planned,
    Renamed,
    /// Left alone because the target name is taken.
    TargetExists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rename {
    pub from: PathBuf,
    pub to: PathBuf,
    pub status: RenameStatus,
}

/// File name with every ` [p<ID>]` marker removed.
pub fn strip_id_suffix(file_name: &str) -> String {
    ID_SUFFIX_RE.replace_all(file_name, "").into_owned()
}

/// Normalize user-supplied extensions to lowercase `.ext`.
pub fn normalize_extensions<S: AsRef<str>>(extensions: &[S]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| {
            let e = e.as_ref().trim().to_lowercase();
            if e.starts_with('.') { e } else { format!(".{e}") }
        })
        .collect()
}

/// Rename files below `root` whose names carry an article ID suffix.
///
/// Nothing is renamed unless `execute` is set. Existing files are never
/// overwritten.
#[instrument(skip_all, fields(root = %root.display(), execute = execute))]
pub async fn strip_ids(root: &Path, extensions: &[String], execute: bool) -> Result<Vec<Rename>> {
    let wanted = normalize_extensions(extensions);
    let files = walk_files(root, |p| {
        let ext = p
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        wanted.is_empty() || wanted.contains(&ext)
    })
    .await?;

    let mut renames = Vec::new();
    for from in files {
        let Some(name) = from.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let stripped = strip_id_suffix(&name);
        if stripped == name || stripped.is_empty() {
            continue;
        }
        let to = from.with_file_name(&stripped);

        let status = if fs::try_exists(&to).await.unwrap_or(true) {
            warn!(from = %from.display(), to = %to.display(), "target exists, not renaming");
            RenameStatus::TargetExists
        } else if execute {
            fs::rename(&from, &to)
                .await
                .map_err(|e| TagCrawlError::io(&from, e))?;
            info!(from = %from.display(), to = %to.display(), "renamed");
            RenameStatus::Renamed
        } else {
            info!(from = %from.display(), to = %to.display(), "would rename");
            RenameStatus::Planned
        };
        renames.push(Rename { from, to, status });
    }
    Ok(renames)
}
