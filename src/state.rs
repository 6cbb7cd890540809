//! State store & observers (C10, §4.9).
//!
//! A single mutex protects every field; mutator methods acquire it only for
//! the duration of one mutation and dispatch bus notifications after
//! releasing it, per §4.9 and §9's "consolidate into one `StateStore`"
//! guidance.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::events::{Event, EventBus};
use crate::gallery::types::{DownloadRange, UrlStatus};

/// Per-URL live progress (§3). Held only in memory; never persisted by
/// itself (Open Question 4, SPEC_FULL §2.4) — only a [`crate::resume::ResumePoint`]
/// survives a restart.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub current_page: u32,
    pub total_pages: u32,
    pub title: String,
    pub effective_range: Option<DownloadRange>,
}

struct Inner {
    running: bool,
    paused: bool,
    pause_requested: bool,
    stop: bool,
    active_index: Option<usize>,
    statuses: HashMap<String, UrlStatus>,
    ranges: HashMap<String, DownloadRange>,
    progress: HashMap<String, ProgressSnapshot>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            running: false,
            paused: false,
            pause_requested: false,
            stop: false,
            active_index: None,
            statuses: HashMap::new(),
            ranges: HashMap::new(),
            progress: HashMap::new(),
        }
    }
}

/// Shared download state: flags, per-URL status, progress snapshots (C10).
pub struct StateStore {
    inner: Mutex<Inner>,
    bus: EventBus,
}

impl StateStore {
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            bus,
        }
    }

    /// Property 1 (§8): at any instant, at most one URL is active.
    #[must_use]
    pub fn active_count(&self) -> usize {
        let inner = self.inner.lock().expect("state store mutex poisoned");
        inner
            .statuses
            .values()
            .filter(|status| matches!(status, UrlStatus::Downloading))
            .count()
    }

    /// Records a status transition for `url`. The session machine publishes
    /// `StatusChanged` itself (§4.1); this call is the store's own
    /// bookkeeping and does not re-publish it.
    pub fn set_status(&self, url: &str, status: UrlStatus) {
        let mut inner = self.inner.lock().expect("state store mutex poisoned");
        inner.statuses.insert(url.to_string(), status);
    }

    #[must_use]
    pub fn status(&self, url: &str) -> Option<UrlStatus> {
        self.inner
            .lock()
            .expect("state store mutex poisoned")
            .statuses
            .get(url)
            .copied()
    }

    pub fn set_range(&self, url: &str, range: DownloadRange) {
        self.inner
            .lock()
            .expect("state store mutex poisoned")
            .ranges
            .insert(url.to_string(), range);
    }

    #[must_use]
    pub fn range(&self, url: &str) -> Option<DownloadRange> {
        self.inner
            .lock()
            .expect("state store mutex poisoned")
            .ranges
            .get(url)
            .copied()
    }

    /// Updates progress and publishes `DownloadProgress` (outside the lock).
    pub fn update_progress(&self, url: &str, current: u32, total: u32, title: &str) {
        let snapshot = ProgressSnapshot {
            current_page: current,
            total_pages: total,
            title: title.to_string(),
            effective_range: self.range(url),
        };
        {
            let mut inner = self.inner.lock().expect("state store mutex poisoned");
            inner.progress.insert(url.to_string(), snapshot);
        }
        self.bus.publish(Event::DownloadProgress {
            url: url.to_string(),
            current,
            total,
        });
    }

    #[must_use]
    pub fn progress(&self, url: &str) -> Option<ProgressSnapshot> {
        self.inner
            .lock()
            .expect("state store mutex poisoned")
            .progress
            .get(url)
            .cloned()
    }

    pub fn set_active_index(&self, index: Option<usize>) {
        self.inner
            .lock()
            .expect("state store mutex poisoned")
            .active_index = index;
    }

    #[must_use]
    pub fn active_index(&self) -> Option<usize> {
        self.inner.lock().expect("state store mutex poisoned").active_index
    }

    pub fn set_running(&self, running: bool) {
        self.inner.lock().expect("state store mutex poisoned").running = running;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lock().expect("state store mutex poisoned").running
    }

    /// The GUI sets this; workers observe it within 500ms (§5).
    pub fn request_pause(&self, requested: bool) {
        self.inner
            .lock()
            .expect("state store mutex poisoned")
            .pause_requested = requested;
    }

    #[must_use]
    pub fn is_pause_requested(&self) -> bool {
        self.inner
            .lock()
            .expect("state store mutex poisoned")
            .pause_requested
    }

    pub fn set_paused(&self, paused: bool) {
        self.inner.lock().expect("state store mutex poisoned").paused = paused;
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.lock().expect("state store mutex poisoned").paused
    }

    pub fn request_stop(&self) {
        self.inner.lock().expect("state store mutex poisoned").stop = true;
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.lock().expect("state store mutex poisoned").stop
    }

    pub fn reset(&self) {
        *self.inner.lock().expect("state store mutex poisoned") = Inner::default();
    }
}
