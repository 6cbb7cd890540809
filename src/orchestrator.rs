//! Orchestrator (C9 half, §4.7): owns the gallery queue, enforces the
//! at-most-one-active invariant, and serializes "proceed to next" so that a
//! double-fired completion event never dispatches two galleries at once.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::DownloadOptions;
use crate::events::{Event, EventBus};
use crate::gallery::{GalleryProcessor, GalleryTask};
use crate::http::HttpClient;
use crate::state::StateStore;

/// Drives a queue of [`GalleryTask`]s one at a time through a
/// [`GalleryProcessor`], enforcing Property 1 (§8): at most one gallery in
/// `INITIALIZING|DOWNLOADING|RETRYING`.
pub struct Orchestrator {
    queue: Mutex<VecDeque<GalleryTask>>,
    processor: Arc<GalleryProcessor>,
    bus: EventBus,
    state: Arc<StateStore>,
    /// Re-entrancy guard for "proceed to next" (§4.7): a double-fired
    /// completion event observes this already `true` and returns instead of
    /// dispatching a second gallery.
    proceeding: Mutex<bool>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(processor: Arc<GalleryProcessor>, bus: EventBus, state: Arc<StateStore>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            processor,
            bus,
            state,
            proceeding: Mutex::new(false),
        }
    }

    pub async fn enqueue(&self, task: GalleryTask) {
        self.queue.lock().await.push_back(task);
    }

    /// Runs every queued task to completion, serially. Cookies (if any) are
    /// forwarded to each task's HTTP session (§1, §6); the core performs no
    /// authentication of its own.
    ///
    /// # Errors
    /// Returns an error only if the underlying HTTP client cannot be built;
    /// per-gallery failures are handled inside the processor and never
    /// propagate here.
    pub async fn run_all(
        self: &Arc<Self>,
        options: &DownloadOptions,
        pause: &impl crate::retry::PauseSignal,
    ) -> Result<(), crate::error::DownloadError> {
        self.state.set_running(true);
        self.bus.publish(Event::DownloadStarted {
            urls: self
                .queue
                .lock()
                .await
                .iter()
                .map(|task| task.url.clone())
                .collect(),
        });

        loop {
            let next = self.queue.lock().await.pop_front();
            let Some(task) = next else { break };
            if self.state.is_stopped() {
                warn!("stop requested, abandoning remaining queue");
                break;
            }

            self.state.set_active_index(Some(task.queue_index));
            let http = HttpClient::new(options.cookies.as_deref())
                .map_err(|_| crate::error::DownloadError::invalid_url("<client-build>"))?;
            self.processor.run(task, options, &http, pause).await?;
            // This is the real "a gallery just finished" trigger point; once
            // the processor gains its own completion-event subscriber this
            // call moves there instead.
            self.proceed_to_next().await;
        }

        // Covers the queue-was-already-empty case (no task ever ran the
        // in-loop call above); a no-op otherwise since `is_running()` is
        // already false by the time the last task's call runs.
        self.proceed_to_next().await;
        if self.state.is_running() {
            // Stopped early with tasks still queued: not a completion.
            self.state.set_running(false);
        }
        info!("queue exhausted, orchestration complete");
        Ok(())
    }

    /// Triggered after each gallery finishes (§4.7): idempotent under
    /// concurrent double-fires via `proceeding`, and only publishes
    /// `DownloadCompleted` once per run (`state.is_running()` guards against a
    /// second call re-firing it after the queue is already drained).
    pub async fn proceed_to_next(self: &Arc<Self>) {
        let mut guard = self.proceeding.lock().await;
        if *guard {
            return;
        }
        *guard = true;
        drop(guard);

        let remaining_empty = self.queue.lock().await.is_empty();
        if remaining_empty && self.state.is_running() {
            self.state.set_running(false);
            self.bus.publish(Event::DownloadCompleted);
        }

        *self.proceeding.lock().await = false;
    }

    #[must_use]
    pub fn queue_len_hint(&self) -> usize {
        self.queue.try_lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resume::ResumeStore;
    use crate::retry::{CircuitBreaker, RetryExecutor};
    use crate::traits::{DefaultNamingProvider, NullUiSink, TokioFileSystem};
    use std::path::PathBuf;

    async fn test_orchestrator(dir: &tempfile::TempDir) -> Arc<Orchestrator> {
        let bus = EventBus::new();
        let state = Arc::new(StateStore::new(bus.clone()));
        let resume = Arc::new(ResumeStore::load(dir.path().join("resume.json")).await.unwrap());
        let processor = Arc::new(GalleryProcessor::new(
            RetryExecutor::new(CircuitBreaker::with_defaults(), bus.clone()),
            resume,
            Arc::clone(&state),
            bus.clone(),
            Arc::new(DefaultNamingProvider),
            Arc::new(TokioFileSystem),
            Arc::new(NullUiSink),
        ));
        Arc::new(Orchestrator::new(processor, bus, state))
    }

    #[tokio::test]
    async fn enqueue_then_run_all_with_empty_queue_publishes_completed() {
        let dir = tempfile::TempDir::new().unwrap();
        let orchestrator = test_orchestrator(&dir).await;
        let mut rx = orchestrator.bus.subscribe();
        orchestrator
            .run_all(&DownloadOptions::default(), &|| false)
            .await
            .unwrap();
        let mut saw_completed = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, Event::DownloadCompleted) {
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn proceed_to_next_is_idempotent_under_concurrent_calls() {
        let dir = tempfile::TempDir::new().unwrap();
        let orchestrator = test_orchestrator(&dir).await;
        orchestrator
            .enqueue(GalleryTask::new("u", 0, PathBuf::from("/tmp")))
            .await;
        let a = Arc::clone(&orchestrator);
        let b = Arc::clone(&orchestrator);
        let (_, _) = tokio::join!(
            async move { a.proceed_to_next().await },
            async move { b.proceed_to_next().await },
        );
        assert!(!*orchestrator.proceeding.lock().await);
    }
}
