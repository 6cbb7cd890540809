//! Event kinds published on the bus (§4.7).

use crate::category::{ErrorCategory, Severity};
use crate::session::SessionState;

/// The closed set of event kinds the bus transports (§4.7).
#[derive(Debug, Clone)]
pub enum Event {
    DownloadStarted {
        urls: Vec<String>,
    },
    DownloadProgress {
        url: String,
        current: u32,
        total: u32,
    },
    DownloadCompleted,
    DownloadError {
        url: String,
        category: ErrorCategory,
        severity: Severity,
        message: String,
    },
    DownloadPaused {
        url: String,
    },
    DownloadResumed {
        url: String,
    },
    UrlStarted {
        url: String,
    },
    UrlCompleted {
        url: String,
    },
    UrlSkipped {
        url: String,
        reason: String,
    },
    ProgressBarCreated {
        url: String,
        total: u32,
    },
    ProgressBarUpdated {
        url: String,
        current: u32,
        total: u32,
    },
    ProgressBarRemoved {
        url: String,
    },
    GuiUpdateRequired,
    StatusChanged {
        url: String,
        state: SessionState,
    },
    CircuitOpened {
        url: String,
        consecutive_failures: u32,
        open_until_secs: u64,
    },
}

impl Event {
    /// The URL this event pertains to, when applicable (used by ordering tests, §8).
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::DownloadProgress { url, .. }
            | Self::DownloadError { url, .. }
            | Self::DownloadPaused { url }
            | Self::DownloadResumed { url }
            | Self::UrlStarted { url }
            | Self::UrlCompleted { url }
            | Self::UrlSkipped { url, .. }
            | Self::ProgressBarCreated { url, .. }
            | Self::ProgressBarUpdated { url, .. }
            | Self::ProgressBarRemoved { url }
            | Self::StatusChanged { url, .. }
            | Self::CircuitOpened { url, .. } => Some(url),
            Self::DownloadStarted { .. } | Self::DownloadCompleted | Self::GuiUpdateRequired => {
                None
            }
        }
    }
}
