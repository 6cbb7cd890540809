//! Resume store (C8, §4.8): durable per-URL checkpoints.
//!
//! A single JSON document mapping normalized URL to [`ResumePoint`], written
//! by one dedicated async task consuming a coalescing queue (most-recent
//! write per URL wins, matching §4.8's "if the queue already contains an
//! entry for URL U, it is replaced"). Reads are synchronous and
//! lock-protected; every write is an atomic file replace so a reader never
//! observes a half-written document.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{info, warn};

use crate::category::Stage;
use crate::gallery::types::GalleryMetadata;

#[derive(Debug, Error)]
pub enum ResumeError {
    #[error("failed to read resume file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write resume file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed resume document: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubStage {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Progress,
    Pause,
    Error,
}

/// Mirrors `download_range_info` in §3/§6.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DownloadRangeInfo {
    pub enabled: bool,
    pub start: u32,
    pub end: u32,
    pub relative_page: u32,
    pub relative_total: u32,
    pub absolute_page: u32,
}

/// Durable checkpoint per URL (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePoint {
    pub url: String,
    pub stage: Stage,
    pub sub_stage: SubStage,
    pub absolute_page_number: Option<u32>,
    pub relative_page: Option<u32>,
    pub download_range_info: Option<DownloadRangeInfo>,
    pub save_folder: PathBuf,
    pub gallery_metadata: Option<GalleryMetadata>,
    #[serde(default)]
    pub stage_data: HashMap<String, String>,
    pub retry_count: u32,
    pub reason: Reason,
    pub timestamp: u64,
    #[serde(default)]
    pub success: bool,
}

impl ResumePoint {
    #[must_use]
    pub fn new(url: impl Into<String>, stage: Stage, save_folder: PathBuf, now: u64) -> Self {
        Self {
            url: url.into(),
            stage,
            sub_stage: SubStage::Before,
            absolute_page_number: None,
            relative_page: None,
            download_range_info: None,
            save_folder,
            gallery_metadata: None,
            stage_data: HashMap::new(),
            retry_count: 0,
            reason: Reason::Progress,
            timestamp: now,
            success: false,
        }
    }
}

/// On-disk document shape (§6): the canonical `resume_points` map plus an
/// optional `current_resume_point` pointer (Open Question 3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeDocument {
    #[serde(default)]
    pub resume_points: HashMap<String, ResumePoint>,
    #[serde(default)]
    pub current_resume_point: Option<ResumePoint>,
    #[serde(default)]
    pub error_config: serde_json::Value,
    #[serde(default)]
    pub last_updated: u64,
}

/// Accepts either the canonical map shape or a legacy single `resume_point`
/// object, promoting the latter to a one-entry map keyed by its own URL
/// (Open Question 3, pinned decision).
fn decode_document(bytes: &[u8]) -> Result<ResumeDocument, ResumeError> {
    if let Ok(doc) = serde_json::from_slice::<ResumeDocument>(bytes) {
        if !doc.resume_points.is_empty() || doc.current_resume_point.is_some() {
            return Ok(doc);
        }
    }
    #[derive(Deserialize)]
    struct Legacy {
        resume_point: ResumePoint,
    }
    if let Ok(legacy) = serde_json::from_slice::<Legacy>(bytes) {
        let mut resume_points = HashMap::new();
        resume_points.insert(legacy.resume_point.url.clone(), legacy.resume_point.clone());
        return Ok(ResumeDocument {
            resume_points,
            current_resume_point: Some(legacy.resume_point),
            error_config: serde_json::Value::Null,
            last_updated: 0,
        });
    }
    serde_json::from_slice::<ResumeDocument>(bytes).map_err(ResumeError::Decode)
}

const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_MAX_ENTRIES: usize = 100;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Durable per-URL checkpoint store (C8).
pub struct ResumeStore {
    path: PathBuf,
    doc: Arc<Mutex<ResumeDocument>>,
    pending: Arc<Mutex<HashMap<String, ResumePoint>>>,
    notify: Arc<Notify>,
    max_age: Duration,
    max_entries: usize,
}

impl ResumeStore {
    /// Loads (or initializes) the store at `path` and spawns its writer task.
    ///
    /// # Errors
    /// Returns [`ResumeError`] if an existing file cannot be read or decoded.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, ResumeError> {
        let path = path.into();
        let mut doc = if path.exists() {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| ResumeError::Read {
                    path: path.clone(),
                    source,
                })?;
            decode_document(&bytes)?
        } else {
            ResumeDocument::default()
        };

        let store = Self {
            path,
            doc: Arc::new(Mutex::new(ResumeDocument::default())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            notify: Arc::new(Notify::new()),
            max_age: DEFAULT_MAX_AGE,
            max_entries: DEFAULT_MAX_ENTRIES,
        };
        store.prune(&mut doc);
        *store.doc.lock().await = doc;
        store.spawn_writer();
        Ok(store)
    }

    fn prune(&self, doc: &mut ResumeDocument) {
        let now = now_unix();
        let max_age_secs = self.max_age.as_secs();
        doc.resume_points
            .retain(|_, point| now.saturating_sub(point.timestamp) <= max_age_secs);
        if doc.resume_points.len() > self.max_entries {
            let mut by_age: Vec<(String, u64)> = doc
                .resume_points
                .iter()
                .map(|(url, point)| (url.clone(), point.timestamp))
                .collect();
            by_age.sort_by_key(|(_, ts)| *ts);
            let excess = doc.resume_points.len() - self.max_entries;
            for (url, _) in by_age.into_iter().take(excess) {
                doc.resume_points.remove(&url);
            }
        }
    }

    fn spawn_writer(&self) {
        let path = self.path.clone();
        let doc = Arc::clone(&self.doc);
        let pending = Arc::clone(&self.pending);
        let notify = Arc::clone(&self.notify);
        tokio::spawn(async move {
            loop {
                notify.notified().await;
                let drained: HashMap<String, ResumePoint> = {
                    let mut guard = pending.lock().await;
                    std::mem::take(&mut *guard)
                };
                if drained.is_empty() {
                    continue;
                }
                let mut guard = doc.lock().await;
                for (url, point) in drained {
                    guard.resume_points.insert(url, point);
                }
                guard.last_updated = now_unix();
                if let Err(error) = write_atomic(&path, &guard).await {
                    warn!(%error, "resume store write failed");
                }
            }
        });
    }

    /// Enqueues a coalescing write. Most-recent write for a URL wins;
    /// repeated calls before the writer drains simply overwrite the pending
    /// entry (§4.8).
    pub async fn enqueue(&self, point: ResumePoint) {
        self.pending.lock().await.insert(point.url.clone(), point);
        self.notify.notify_one();
    }

    pub async fn create(&self, url: &str, stage: Stage, save_folder: PathBuf) {
        let point = ResumePoint::new(url, stage, save_folder, now_unix());
        self.enqueue(point).await;
    }

    pub async fn update(&self, mut point: ResumePoint) {
        point.timestamp = now_unix().max(point.timestamp);
        self.enqueue(point).await;
    }

    /// Flags `url`'s checkpoint as successfully completed and flushes it to
    /// disk immediately, rather than going through the coalescing `pending`
    /// queue — this is the durable terminal marker (§3/§4.8), so it must
    /// survive a crash even if no other write happens to follow it.
    pub async fn mark_success(&self, url: &str) {
        let mut guard = self.doc.lock().await;
        let Some(point) = guard.resume_points.get_mut(url) else {
            return;
        };
        point.success = true;
        point.timestamp = now_unix();
        guard.last_updated = now_unix();
        if let Err(error) = write_atomic(&self.path, &guard).await {
            warn!(%error, "resume store mark_success write failed");
        }
    }

    /// Synchronous, lock-protected read (§4.8).
    pub async fn get(&self, url: &str) -> Option<ResumePoint> {
        self.doc.lock().await.resume_points.get(url).cloned()
    }

    pub async fn is_resumable(&self, url: &str) -> bool {
        self.get(url).await.is_some_and(|point| !point.success)
    }

    pub async fn resume_from(&self, url: &str) -> bool {
        self.is_resumable(url).await
    }

    /// Drops entries older than `max_age` or beyond `max_entries`, returning
    /// how many were removed.
    pub async fn cleanup_old(&self) -> usize {
        let mut guard = self.doc.lock().await;
        let before = guard.resume_points.len();
        self.prune(&mut guard);
        let removed = before - guard.resume_points.len();
        if removed > 0 {
            info!(removed, "pruned stale resume points");
            guard.last_updated = now_unix();
            if let Err(error) = write_atomic(&self.path, &guard).await {
                warn!(%error, "resume store prune write failed");
            }
        }
        removed
    }
}

async fn write_atomic(path: &Path, doc: &ResumeDocument) -> Result<(), ResumeError> {
    let bytes = serde_json::to_vec_pretty(doc).map_err(ResumeError::Decode)?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &bytes)
        .await
        .map_err(|source| ResumeError::Write {
            path: tmp_path.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|source| ResumeError::Write {
            path: path.to_path_buf(),
            source,
        })
}
