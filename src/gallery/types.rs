//! Data model shared by the gallery processor and its collaborators (§3).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One of the six statuses a URL can hold (§3). C10 owns the authoritative
/// copy; this type is also what [`crate::session::SessionState`] projects
/// onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    Pending,
    Downloading,
    Completed,
    Skipped,
    Error,
    Paused,
}

/// The page range the user applied to a gallery, if any (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRange {
    pub start: u32,
    pub end: u32,
}

impl DownloadRange {
    /// Converts an absolute page number into this range's relative page
    /// number (1-based), per Property 5 (§8): `relative = absolute - start + 1`.
    #[must_use]
    pub fn relative_of(self, absolute_page: u32) -> Option<u32> {
        if absolute_page < self.start || absolute_page > self.end {
            return None;
        }
        Some(absolute_page - self.start + 1)
    }

    /// Inverse of [`Self::relative_of`]: `absolute = relative + start - 1`.
    #[must_use]
    pub fn absolute_of(self, relative_page: u32) -> u32 {
        relative_page + self.start - 1
    }

    #[must_use]
    pub fn total(self) -> u32 {
        self.end - self.start + 1
    }
}

/// A single queued gallery (§3). Exclusively owned by the orchestrator until
/// dispatched to the gallery processor, which owns it for the lifetime of
/// processing.
#[derive(Debug, Clone)]
pub struct GalleryTask {
    pub url: String,
    pub queue_index: usize,
    pub save_folder: PathBuf,
    pub applied_range: Option<DownloadRange>,
    pub user_max_retries: Option<u32>,
}

impl GalleryTask {
    #[must_use]
    pub fn new(url: impl Into<String>, queue_index: usize, save_folder: PathBuf) -> Self {
        Self {
            url: url.into(),
            queue_index,
            save_folder,
            applied_range: None,
            user_max_retries: None,
        }
    }
}

/// Metadata about the gallery itself, fetched once per task (§4.4 step 2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GalleryMetadata {
    pub title: String,
    pub artist: Option<String>,
    pub total_pages: u32,
    pub page_urls: Vec<String>,
}

/// One page within a gallery (§3). Enumerated lazily as the processor walks
/// the gallery.
#[derive(Debug, Clone)]
pub struct ImagePageRef {
    pub relative_page: u32,
    pub absolute_page: u32,
    pub image_page_url: String,
    pub target_path: PathBuf,
}
