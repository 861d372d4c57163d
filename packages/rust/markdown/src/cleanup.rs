//! Post-conversion cleanup pipeline for article Markdown.
//!
//! Each pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

/// Run every cleanup pass over raw converter output.
pub(crate) fn run_pipeline(md: &str, base_url: &Url) -> String {
    let mut result = replace_nbsp(md);

    result = fix_code_fence_languages(&result);
    result = strip_layout_tags(&result);
    result = resolve_relative_links(&result, base_url);
    result = trim_line_ends(&result);
    result = collapse_blank_lines(&result);

    let trimmed = result.trim_matches('\n');
    if trimmed.trim().is_empty() {
        return String::new();
    }
    format!("{trimmed}\n")
}

/// Non-breaking spaces are everywhere in the catalog's editor output.
fn replace_nbsp(md: &str) -> String {
    md.replace('\u{a0}', " ")
}

/// Turn ```` ```language-js ```` style fences into ```` ```js ````.
fn fix_code_fence_languages(md: &str) -> String {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^(\s*)```(?:language-|lang-|hljs[ \t]+|brush:[ \t]*)([\w+#-]+)\S*")
            .expect("valid regex")
    });

    FENCE_RE.replace_all(md, "$1```$2").into_owned()
}

/// Drop layout-only tags that survived conversion, outside code fences.
fn strip_layout_tags(md: &str) -> String {
    static LAYOUT_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?(?:div|span|section|article|header|figure|figcaption|font|center)(?:\s[^>]*)?>")
            .expect("valid regex")
    });

    let mut in_fence = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                return line.to_string();
            }
            if in_fence {
                line.to_string()
            } else {
                LAYOUT_TAG_RE.replace_all(line, "").into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Resolve relative link and image targets against the article URL.
fn resolve_relative_links(md: &str, base: &Url) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    LINK_RE
        .replace_all(md, |caps: &Captures| {
            let href = &caps[3];
            let absolute = href.starts_with('#')
                || href.contains("://")
                || href.starts_with("mailto:")
                || href.starts_with("data:");
            if absolute {
                return caps[0].to_string();
            }
            match base.join(href) {
                Ok(resolved) => format!("{}[{}]({resolved})", &caps[1], &caps[2]),
                Err(_) => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn trim_line_ends(md: &str) -> String {
    md.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

/// At most one blank line between blocks.
fn collapse_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://blog.example.com/me/p/7.html").unwrap()
    }

    #[test]
    fn fence_language_prefixes_are_stripped() {
        let md = "```language-rust\nfn main() {}\n```\n\n```lang-py\nx = 1\n```";
        let out = fix_code_fence_languages(md);
        assert!(out.contains("```rust\n"));
        assert!(out.contains("```py\n"));
    }

    #[test]
    fn layout_tags_removed_outside_fences_only() {
        let md = "<div class=\"x\">Text</div>\n```\n<div>code</div>\n```";
        let out = strip_layout_tags(md);
        assert_eq!(out, "Text\n```\n<div>code</div>\n```");
    }

    #[test]
    fn relative_links_and_images_resolved() {
        let md = "[a](/p/1.html) ![i](img/x.png) [b](https://other.com/) [c](#top)";
        let out = resolve_relative_links(md, &base());
        assert!(out.contains("[a](https://blog.example.com/p/1.html)"));
        assert!(out.contains("![i](https://blog.example.com/me/p/img/x.png)"));
        assert!(out.contains("[b](https://other.com/)"));
        assert!(out.contains("[c](#top)"));
    }

    #[test]
    fn blank_runs_collapse() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn pipeline_ends_with_single_newline() {
        let out = run_pipeline("\n\n# Title\u{a0}here   \n\n\n\nBody\n\n\n", &base());
        assert_eq!(out, "# Title here\n\nBody\n");
    }

    #[test]
    fn whitespace_only_input_becomes_empty() {
        assert_eq!(run_pipeline(" \n\u{a0}\n\n", &base()), "");
    }
}
