//! Top-level error types for the download engine.
//!
//! These are the "programmer bug" / transport-level errors that the retry
//! executor (§4.3) classifies into an [`crate::category::ErrorCategory`] and
//! converts into a typed `Failure` action before they ever reach the gallery
//! processor. Nothing here crosses a component boundary as a raw exception;
//! see `crate::category` for the classification step.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fetching gallery metadata or image bytes.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// File system error during image write (create file, write, rename, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Downloaded file size does not match the server-reported `Content-Length`.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Download path that failed verification.
        path: PathBuf,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },

    /// The gallery or image page HTML did not contain the expected structure
    /// (no `<img>` tag, missing gallery metadata table, etc.)
    #[error("failed to parse {what} at {url}")]
    Parse {
        /// What was being parsed (e.g. "gallery metadata", "image page").
        what: &'static str,
        /// The URL whose response failed to parse.
        url: String,
    },

    /// A headless-browser (fallback) operation failed.
    #[error("headless browser {stage} failed: {message}")]
    Browser {
        /// Which stage failed: "driver", "navigate", or "extract".
        stage: &'static str,
        /// Human-readable detail.
        message: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a parse error.
    pub fn parse(what: &'static str, url: impl Into<String>) -> Self {
        Self::Parse {
            what,
            url: url.into(),
        }
    }

    /// Creates a headless-browser error.
    pub fn browser(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Browser {
            stage,
            message: message.into(),
        }
    }
}

// Note on From trait implementations:
// We intentionally do NOT implement `From<reqwest::Error>` or `From<std::io::Error>`
// because our error variants require context (url, path) that the source errors
// don't provide. The helper constructor methods (network(), io(), etc.) are the
// correct pattern here as they allow callers to provide necessary context.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_contains_url() {
        let error = DownloadError::timeout("https://example.com/g/1/p1");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://example.com/g/1/p1"));
    }

    #[test]
    fn http_status_display_contains_status_and_url() {
        let error = DownloadError::http_status("https://example.com/g/1/p1", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "expected 404 in: {msg}");
        assert!(msg.contains("https://example.com/g/1/p1"));
    }

    #[test]
    fn io_display_contains_path() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error = DownloadError::io(PathBuf::from("/tmp/img.jpg"), io_error);
        assert!(error.to_string().contains("/tmp/img.jpg"));
    }

    #[test]
    fn invalid_url_display() {
        let error = DownloadError::invalid_url("not-a-url");
        assert!(error.to_string().contains("invalid URL"));
        assert!(error.to_string().contains("not-a-url"));
    }

    #[test]
    fn parse_display_names_what_and_url() {
        let error = DownloadError::parse("gallery metadata", "https://example.com/g/1");
        let msg = error.to_string();
        assert!(msg.contains("gallery metadata"));
        assert!(msg.contains("https://example.com/g/1"));
    }

    #[test]
    fn browser_display_names_stage() {
        let error = DownloadError::browser("navigate", "navigation timed out");
        let msg = error.to_string();
        assert!(msg.contains("navigate"));
        assert!(msg.contains("navigation timed out"));
    }
}
