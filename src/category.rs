//! Error classifier & policy (C2).
//!
//! Maps a raw [`crate::error::DownloadError`] (plus its HTTP status, when
//! relevant) to an [`ErrorCategory`], and exposes the per-category policy the
//! retry executor (C3) drives: retry count, backoff shape, session-refresh
//! and fallback triggers, and the action to take once retries are exhausted.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::DownloadError;

/// A closed enum of error categories (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    #[serde(rename = "net.timeout")]
    NetTimeout,
    #[serde(rename = "net.conn")]
    NetConn,
    #[serde(rename = "net.rate_limit")]
    NetRateLimit,
    #[serde(rename = "net.server_error")]
    NetServerError,
    #[serde(rename = "net.client_error")]
    NetClientError,
    #[serde(rename = "net.ssl")]
    NetSsl,
    #[serde(rename = "fs.permission")]
    FsPermission,
    #[serde(rename = "fs.not_found")]
    FsNotFound,
    #[serde(rename = "fs.disk_full")]
    FsDiskFull,
    #[serde(rename = "fs.locked")]
    FsLocked,
    #[serde(rename = "fs.corrupt")]
    FsCorrupt,
    #[serde(rename = "parsing")]
    Parsing,
    #[serde(rename = "validation")]
    Validation,
    #[serde(rename = "sel.driver")]
    SelDriver,
    #[serde(rename = "sel.timeout")]
    SelTimeout,
    #[serde(rename = "sel.script")]
    SelScript,
    #[serde(rename = "unknown")]
    Unknown,
}

/// Severity, orthogonal to category (§7). Governs log level and escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Backoff shape attached to a category's [`RetryStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffKind {
    Immediate,
    Fixed,
    Linear,
    Exponential,
    Random,
}

/// What the gallery processor does once a category's retries are exhausted
/// (or the category forbids retry outright).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalAction {
    Continue,
    SkipImage,
    SkipUrl,
    Pause,
    Abort,
    Manual,
}

impl FinalAction {
    /// Parses a `retry_limit_action` value, including legacy non-enum strings.
    ///
    /// Open Question 2 (pinned): any value that is not one of the canonical
    /// six names maps to `Manual` rather than being guessed at, since it
    /// requires operator attention. This is the one function the mapping
    /// lives in, so the table stays auditable.
    #[must_use]
    pub fn from_legacy_str(value: &str) -> Self {
        match value {
            "continue" => Self::Continue,
            "skip_image" => Self::SkipImage,
            "skip_url" => Self::SkipUrl,
            "pause" => Self::Pause,
            "abort" => Self::Abort,
            "manual" => Self::Manual,
            _ => Self::Manual,
        }
    }
}

/// Per-category retry configuration (§4.2, §3).
#[derive(Debug, Clone, Copy)]
pub struct RetryStrategy {
    pub retry: bool,
    pub max_retries: u32,
    pub backoff: BackoffKind,
    pub base_delay_secs: f64,
    pub session_refresh_at: Option<u32>,
    pub selenium_fallback: bool,
    pub selenium_fallback_at: Option<u32>,
    pub final_action: FinalAction,
}

const NO_RETRY: RetryStrategy = RetryStrategy {
    retry: false,
    max_retries: 0,
    backoff: BackoffKind::Immediate,
    base_delay_secs: 0.0,
    session_refresh_at: None,
    selenium_fallback: false,
    selenium_fallback_at: None,
    final_action: FinalAction::SkipImage,
};

impl ErrorCategory {
    /// Classifies an HTTP status code into a network category (§4.2, §6).
    #[must_use]
    pub fn from_http_status(status: u16) -> Self {
        match status {
            429 => Self::NetRateLimit,
            400..=499 => Self::NetClientError,
            500..=599 => Self::NetServerError,
            _ => Self::Unknown,
        }
    }

    /// Classifies a [`DownloadError`] into its category.
    #[must_use]
    pub fn classify(error: &DownloadError) -> Self {
        match error {
            DownloadError::Timeout { .. } => Self::NetTimeout,
            DownloadError::Network { source, .. } => {
                if source.is_connect() {
                    Self::NetConn
                } else if source.is_timeout() {
                    Self::NetTimeout
                } else {
                    Self::NetConn
                }
            }
            DownloadError::HttpStatus { status, .. } => Self::from_http_status(*status),
            DownloadError::Io { source, .. } => match source.kind() {
                std::io::ErrorKind::PermissionDenied => Self::FsPermission,
                std::io::ErrorKind::NotFound => Self::FsNotFound,
                std::io::ErrorKind::AlreadyExists => Self::FsLocked,
                _ if source.raw_os_error() == Some(28) => Self::FsDiskFull,
                _ => Self::FsCorrupt,
            },
            DownloadError::InvalidUrl { .. } => Self::Validation,
            DownloadError::Integrity { .. } => Self::FsCorrupt,
            DownloadError::Parse { .. } => Self::Parsing,
            DownloadError::Browser { stage, .. } => match *stage {
                "driver" => Self::SelDriver,
                "navigate" => Self::SelTimeout,
                _ => Self::SelScript,
            },
        }
    }

    /// The default retry policy for this category (§4.2 table).
    #[must_use]
    pub fn policy(self) -> RetryStrategy {
        use BackoffKind::{Exponential, Fixed, Immediate, Linear};
        use FinalAction::{Abort, SkipImage};
        match self {
            Self::NetTimeout => RetryStrategy {
                retry: true,
                max_retries: 5,
                backoff: Exponential,
                base_delay_secs: 5.0,
                session_refresh_at: Some(3),
                selenium_fallback: false,
                selenium_fallback_at: None,
                final_action: SkipImage,
            },
            Self::NetConn => RetryStrategy {
                retry: true,
                max_retries: 5,
                backoff: Exponential,
                base_delay_secs: 5.0,
                session_refresh_at: Some(2),
                selenium_fallback: false,
                selenium_fallback_at: None,
                final_action: SkipImage,
            },
            Self::NetRateLimit => RetryStrategy {
                retry: true,
                max_retries: 10,
                backoff: Exponential,
                base_delay_secs: 60.0,
                session_refresh_at: None,
                selenium_fallback: false,
                selenium_fallback_at: None,
                final_action: SkipImage,
            },
            Self::NetServerError => RetryStrategy {
                retry: true,
                max_retries: 5,
                backoff: Exponential,
                base_delay_secs: 10.0,
                session_refresh_at: Some(2),
                selenium_fallback: true,
                selenium_fallback_at: Some(3),
                final_action: SkipImage,
            },
            Self::NetClientError => RetryStrategy {
                retry: true,
                max_retries: 1,
                backoff: Immediate,
                base_delay_secs: 1.0,
                session_refresh_at: None,
                selenium_fallback: true,
                selenium_fallback_at: Some(0),
                final_action: SkipImage,
            },
            Self::NetSsl => RetryStrategy {
                retry: true,
                max_retries: 3,
                backoff: Fixed,
                base_delay_secs: 5.0,
                session_refresh_at: Some(1),
                selenium_fallback: false,
                selenium_fallback_at: None,
                final_action: SkipImage,
            },
            Self::FsPermission => RetryStrategy {
                final_action: SkipImage,
                ..NO_RETRY
            },
            Self::FsNotFound => RetryStrategy {
                retry: true,
                max_retries: 2,
                backoff: Immediate,
                base_delay_secs: 1.0,
                session_refresh_at: None,
                selenium_fallback: false,
                selenium_fallback_at: None,
                final_action: SkipImage,
            },
            Self::FsDiskFull => RetryStrategy {
                final_action: Abort,
                ..NO_RETRY
            },
            Self::FsLocked => RetryStrategy {
                retry: true,
                max_retries: 5,
                backoff: Linear,
                base_delay_secs: 2.0,
                session_refresh_at: None,
                selenium_fallback: false,
                selenium_fallback_at: None,
                final_action: SkipImage,
            },
            Self::FsCorrupt => RetryStrategy {
                retry: true,
                max_retries: 2,
                backoff: Immediate,
                base_delay_secs: 1.0,
                session_refresh_at: Some(1),
                selenium_fallback: false,
                selenium_fallback_at: None,
                final_action: SkipImage,
            },
            Self::Parsing => RetryStrategy {
                retry: true,
                max_retries: 2,
                backoff: Immediate,
                base_delay_secs: 1.0,
                session_refresh_at: None,
                selenium_fallback: true,
                selenium_fallback_at: Some(1),
                final_action: SkipImage,
            },
            Self::Validation => RetryStrategy {
                retry: true,
                max_retries: 1,
                backoff: Immediate,
                base_delay_secs: 1.0,
                session_refresh_at: None,
                selenium_fallback: false,
                selenium_fallback_at: None,
                final_action: SkipImage,
            },
            Self::SelDriver => RetryStrategy {
                retry: true,
                max_retries: 3,
                backoff: Exponential,
                base_delay_secs: 10.0,
                session_refresh_at: None,
                selenium_fallback: false,
                selenium_fallback_at: None,
                final_action: SkipImage,
            },
            Self::SelTimeout => RetryStrategy {
                retry: true,
                max_retries: 3,
                backoff: Linear,
                base_delay_secs: 10.0,
                session_refresh_at: None,
                selenium_fallback: false,
                selenium_fallback_at: None,
                final_action: SkipImage,
            },
            Self::SelScript => RetryStrategy {
                retry: true,
                max_retries: 2,
                backoff: Immediate,
                base_delay_secs: 5.0,
                session_refresh_at: None,
                selenium_fallback: false,
                selenium_fallback_at: None,
                final_action: SkipImage,
            },
            Self::Unknown => RetryStrategy {
                retry: true,
                max_retries: 3,
                backoff: Linear,
                base_delay_secs: 5.0,
                session_refresh_at: Some(2),
                selenium_fallback: true,
                selenium_fallback_at: Some(3),
                final_action: SkipImage,
            },
        }
    }

    #[must_use]
    pub fn should_retry(self) -> bool {
        self.policy().retry
    }

    /// Clamps a user-supplied max-retry override to `[1, 1.2 · default]` (§4.2).
    #[must_use]
    pub fn max_retries(self, user_override: Option<u32>) -> u32 {
        let default = self.policy().max_retries;
        match user_override {
            None => default,
            Some(0) => 0,
            Some(n) => {
                let ceiling = ((f64::from(default) * 1.2).round() as u32).max(1);
                n.clamp(1, ceiling)
            }
        }
    }

    #[must_use]
    pub fn should_refresh_session(self, retry_count: u32) -> bool {
        matches!(self.policy().session_refresh_at, Some(at) if retry_count >= at)
    }

    #[must_use]
    pub fn should_try_fallback(self, retry_count: u32) -> bool {
        let policy = self.policy();
        policy.selenium_fallback
            && matches!(policy.selenium_fallback_at, Some(at) if retry_count >= at)
    }

    /// Raw backoff seconds before jitter/cap/floor (applied by the executor, §4.3).
    #[must_use]
    pub fn raw_backoff_secs(self, retry_count: u32) -> f64 {
        let policy = self.policy();
        let base = policy.base_delay_secs;
        match policy.backoff {
            BackoffKind::Exponential => base * 2f64.powi(retry_count.saturating_sub(1) as i32),
            BackoffKind::Linear => base * f64::from(retry_count.max(1)),
            BackoffKind::Fixed => base,
            BackoffKind::Immediate => 0.5,
            BackoffKind::Random => base * (1.0 + rand::random::<f64>()),
        }
    }

    #[must_use]
    pub fn final_action(self) -> FinalAction {
        self.policy().final_action
    }

    /// User-facing log line for a retry decision (fed to the log sink, not the event bus).
    #[must_use]
    pub fn user_message(self, retry_count: u32, max: u32, delay_secs: f64) -> String {
        format!(
            "{self:?}: retry {retry_count}/{max} in {delay_secs:.1}s",
            self = self
        )
    }
}

/// Parses a `Retry-After` header value per RFC 7231: either delta-seconds or
/// an HTTP-date. Returns `None` when `error` carries no such header, or the
/// header's value is neither form.
#[must_use]
pub fn retry_after_duration(error: &DownloadError) -> Option<Duration> {
    let DownloadError::HttpStatus {
        retry_after: Some(value),
        ..
    } = error
    else {
        return None;
    };
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(value.trim()).ok()?;
    when.duration_since(SystemTime::now()).ok()
}

/// Immutable record attached to one error occurrence (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub url: String,
    pub stage: Stage,
    pub absolute_page: Option<u32>,
    pub relative_page: Option<u32>,
    pub retry_count: u32,
    pub last_successful_page: Option<u32>,
    #[serde(default)]
    pub stage_data: HashMap<String, String>,
}

/// Which pipeline stage an [`ErrorContext`] was recorded at (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Metadata,
    PageList,
    ImagePage,
    ImageFetch,
    ImageWrite,
}

impl ErrorContext {
    #[must_use]
    pub fn new(url: impl Into<String>, stage: Stage) -> Self {
        Self {
            url: url.into(),
            stage,
            absolute_page: None,
            relative_page: None,
            retry_count: 0,
            last_successful_page: None,
            stage_data: HashMap::new(),
        }
    }
}

/// Derives severity from category, consecutive-error count and stage (§7).
#[must_use]
pub fn severity_for(
    category: ErrorCategory,
    consecutive_errors: u32,
    stage: Stage,
    retry_count: u32,
) -> Severity {
    if consecutive_errors >= 3 {
        return Severity::Medium;
    }
    let critical_stage = matches!(stage, Stage::ImageWrite | Stage::Metadata);
    if critical_stage && retry_count >= category.policy().max_retries {
        return Severity::High;
    }
    Severity::Low
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_classification_matches_table() {
        assert_eq!(ErrorCategory::from_http_status(429), ErrorCategory::NetRateLimit);
        assert_eq!(ErrorCategory::from_http_status(404), ErrorCategory::NetClientError);
        assert_eq!(ErrorCategory::from_http_status(500), ErrorCategory::NetServerError);
        assert_eq!(ErrorCategory::from_http_status(503), ErrorCategory::NetServerError);
    }

    #[test]
    fn fs_permission_never_retries() {
        let policy = ErrorCategory::FsPermission.policy();
        assert!(!policy.retry);
        assert_eq!(policy.final_action, FinalAction::SkipImage);
    }

    #[test]
    fn fs_disk_full_aborts() {
        assert_eq!(ErrorCategory::FsDiskFull.policy().final_action, FinalAction::Abort);
    }

    #[test]
    fn max_retries_clamps_user_override() {
        // net.server_error default max is 5; ceiling = round(5 * 1.2) = 6.
        assert_eq!(ErrorCategory::NetServerError.max_retries(Some(100)), 6);
        assert_eq!(ErrorCategory::NetServerError.max_retries(Some(0)), 0);
        assert_eq!(ErrorCategory::NetServerError.max_retries(None), 5);
    }

    #[test]
    fn backoff_formulas_match_spec() {
        // exponential: base * 2^(retry_count - 1)
        assert!((ErrorCategory::NetTimeout.raw_backoff_secs(1) - 5.0).abs() < f64::EPSILON);
        assert!((ErrorCategory::NetTimeout.raw_backoff_secs(2) - 10.0).abs() < f64::EPSILON);
        assert!((ErrorCategory::NetTimeout.raw_backoff_secs(3) - 20.0).abs() < f64::EPSILON);
        // linear: base * retry_count
        assert!((ErrorCategory::FsLocked.raw_backoff_secs(3) - 6.0).abs() < f64::EPSILON);
        // fixed
        assert!((ErrorCategory::NetSsl.raw_backoff_secs(4) - 5.0).abs() < f64::EPSILON);
        // immediate
        assert!((ErrorCategory::FsNotFound.raw_backoff_secs(1) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn from_legacy_str_unknown_maps_to_manual() {
        assert_eq!(FinalAction::from_legacy_str("abort"), FinalAction::Abort);
        assert_eq!(
            FinalAction::from_legacy_str("SeleniumをONにしてリトライ"),
            FinalAction::Manual
        );
        assert_eq!(FinalAction::from_legacy_str("bogus"), FinalAction::Manual);
    }

    #[test]
    fn should_try_fallback_respects_selenium_fallback_at() {
        assert!(!ErrorCategory::NetServerError.should_try_fallback(2));
        assert!(ErrorCategory::NetServerError.should_try_fallback(3));
        assert!(ErrorCategory::NetServerError.should_try_fallback(5));
    }

    #[test]
    fn retry_after_duration_parses_delta_seconds() {
        let error = DownloadError::http_status_with_retry_after(
            "https://e/x",
            429,
            Some("120".to_string()),
        );
        assert_eq!(retry_after_duration(&error), Some(Duration::from_secs(120)));
    }

    #[test]
    fn retry_after_duration_parses_http_date() {
        let future = SystemTime::now() + Duration::from_secs(60);
        let formatted = httpdate::fmt_http_date(future);
        let error = DownloadError::http_status_with_retry_after("https://e/x", 429, Some(formatted));
        let parsed = retry_after_duration(&error).expect("http-date parses");
        // Allow a little slack for the round trip through string formatting.
        assert!(parsed.as_secs() >= 58 && parsed.as_secs() <= 61);
    }

    #[test]
    fn retry_after_duration_is_none_without_header() {
        let error = DownloadError::http_status("https://e/x", 429);
        assert_eq!(retry_after_duration(&error), None);
    }
}
