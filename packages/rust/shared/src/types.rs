//! Core domain types for tagcrawl runs.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Byte budget of a sanitized name. Leaves room for the ` [p<ID>].md`
/// suffix inside the usual 255-byte file name limit.
const MAX_NAME_BYTES: usize = 200;

/// Stand-in for a missing title or an unusable name.
pub const UNTITLED: &str = "untitled";

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

/// A catalog category. Articles are grouped, and directoried, by tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(String);

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory name used for this tag under the output root.
    pub fn dir_name(&self) -> String {
        let name = sanitize_filename(&self.0);
        if name.is_empty() || name.chars().all(|c| c == '.') {
            return UNTITLED.to_string();
        }
        name
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ArticleId
// ---------------------------------------------------------------------------

/// Stable article identifier taken from the article URL (`/p/<id>.html`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArticleId(String);

impl ArticleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `p<ID>` form used in filenames and marker names.
    pub fn prefixed(&self) -> String {
        format!("p{}", self.0)
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ArticleRef / TagSource
// ---------------------------------------------------------------------------

/// One crawl target. `(tag, id)` is unique within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRef {
    pub tag: Tag,
    pub id: ArticleId,
    pub url: Url,
}

impl fmt::Display for ArticleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.tag, self.id.prefixed())
    }
}

/// A tag together with the first page of its article listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSource {
    pub tag: Tag,
    pub listing_url: Url,
}

// ---------------------------------------------------------------------------
// Filenames
// ---------------------------------------------------------------------------

/// Make a human title safe to use as a single path component.
///
/// Replaces `\ / : * ? " < > |` with `_`, collapses whitespace runs, trims,
/// and truncates to at most 200 bytes on a character boundary. May return an
/// empty string.
pub fn sanitize_filename(name: &str) -> String {
    static FORBIDDEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|]"#).expect("valid regex"));
    static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    let replaced = FORBIDDEN_RE.replace_all(name, "_");
    let collapsed = WS_RE.replace_all(replaced.trim(), " ");
    truncate_bytes(&collapsed, MAX_NAME_BYTES).trim_end().to_string()
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a character.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_forbidden_characters() {
        assert_eq!(sanitize_filename("a/b:c*d?"), "a_b_c_d_");
        assert_eq!(sanitize_filename(r#"x"<y>|z\"#), "x__y__z_");
    }

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize_filename("  Rust \t  async\n book "), "Rust async book");
    }

    #[test]
    fn sanitize_truncates_to_byte_budget() {
        let ascii = sanitize_filename(&"a".repeat(300));
        assert_eq!(ascii.len(), 200);

        // Three bytes per character: 66 characters fit, the 67th would not.
        let cjk = sanitize_filename(&"异步编程".repeat(30));
        assert_eq!(cjk.chars().count(), 66);
        assert_eq!(cjk.len(), 198);
        assert!(format!("{cjk} [p123456789].md").len() <= 255);
    }

    #[test]
    fn article_ref_display() {
        let r = ArticleRef {
            tag: Tag::new("Linux"),
            id: ArticleId::new("42"),
            url: Url::parse("https://example.com/p/42.html").unwrap(),
        };
        assert_eq!(r.to_string(), "[Linux] p42");
        assert_eq!(r.id.prefixed(), "p42");
    }

    #[test]
    fn tag_dir_name_is_sanitized() {
        assert_eq!(Tag::new(" C/C++ ").dir_name(), "C_C++");
        assert_eq!(Tag::new("..").dir_name(), "untitled");
        assert_eq!(Tag::new("   ").dir_name(), "untitled");
    }
}
