//! Error types for tagcrawl.
//!
//! Library crates use [`TagCrawlError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::fmt;
use std::path::PathBuf;

/// A failure reported by the transport before any HTTP status was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// The request did not complete within the transport timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection could not be established or was reset.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other transport-level failure (body read, redirect loop, ...).
    #[error("transport error: {0}")]
    Other(String),
}

/// Why a single fetch attempt did not produce usable content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Transport failure, no response.
    Network(NetworkError),
    /// The server answered with a non-2xx status.
    Status(u16),
    /// The server answered 2xx with an empty body.
    EmptyBody,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(e) => write!(f, "{e}"),
            Self::Status(code) => write!(f, "HTTP {code}"),
            Self::EmptyBody => f.write_str("empty response body"),
        }
    }
}

/// Terminal outcome of the fetch-retry wrapper.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Every allowed attempt failed with a retryable cause.
    #[error("gave up on {url} after {attempts} attempts, last failure: {last_cause}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_cause: FailureCause,
    },
}

/// Top-level error type for all tagcrawl operations.
#[derive(Debug, thiserror::Error)]
pub enum TagCrawlError {
    /// Configuration loading or validation error. Fatal before any work starts.
    #[error("config error: {message}")]
    Config { message: String },

    /// A single transport failure (only surfaces outside the retry wrapper).
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Fetching gave up after exhausting its retries.
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// The fetched page could not be turned into an article. Never retried.
    #[error("extraction error: {message}")]
    Extraction { message: String },

    /// A listing or tag index page did not have the expected structure.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Completion ledger backend error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A processing unit panicked. Recorded against its article only.
    #[error("processing unit panicked: {message}")]
    Panicked { message: String },

    /// A per-article failure kept recurring and the run was aborted.
    #[error("run aborted: {message}")]
    Systemic { message: String },

    /// The run was cancelled before completion.
    #[error("interrupted")]
    Interrupted,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TagCrawlError>;

impl TagCrawlError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create an extraction error from any displayable message.
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction {
            message: msg.into(),
        }
    }

    /// Create a systemic (run-aborting) error.
    pub fn systemic(msg: impl Into<String>) -> Self {
        Self::Systemic {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this is a filesystem failure (counts toward I/O escalation).
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Short machine-friendly label for summaries and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Network(_) => "network",
            Self::Fetch(_) => "fetch",
            Self::Extraction { .. } => "extraction",
            Self::Parse { .. } => "parse",
            Self::Storage(_) => "storage",
            Self::Io { .. } => "io",
            Self::Panicked { .. } => "panic",
            Self::Systemic { .. } => "systemic",
            Self::Interrupted => "interrupted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = TagCrawlError::config("delay_min must not exceed delay_max");
        assert_eq!(
            err.to_string(),
            "config error: delay_min must not exceed delay_max"
        );

        let err = TagCrawlError::from(FetchError::Exhausted {
            url: "https://example.com/p/1.html".into(),
            attempts: 4,
            last_cause: FailureCause::Status(503),
        });
        assert!(err.to_string().contains("after 4 attempts"));
        assert!(err.to_string().contains("HTTP 503"));
        assert_eq!(err.kind(), "fetch");
    }

    #[test]
    fn io_errors_are_classified() {
        let err = TagCrawlError::io(
            "/root/nope",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.is_io());
        assert!(!TagCrawlError::extraction("no body").is_io());
    }
}
