//! Typed pub/sub event bus (C9, §4.7).
//!
//! Grounded in the broadcast-channel event bus pattern used elsewhere in the
//! retrieval pack for crawl-event fan-out (`broadcast::Sender` + `Notify` +
//! atomic pressure counters). `publish` never blocks the publisher on
//! subscriber execution; `publish_sync` is reserved for the one call site
//! (the session state machine, §4.7) that must know every currently
//! subscribed observer has had a chance to run before it proceeds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use super::types::Event;

/// Channel capacity backing the bus. `tokio::sync::broadcast` requires a
/// bound; this is sized generously so normal operation never lags a
/// subscriber (the closest practical analogue to the source's unbounded
/// queue, §4.7).
const CHANNEL_CAPACITY: usize = 4096;

#[derive(Default)]
struct Metrics {
    published: AtomicU64,
    lagged: AtomicU64,
}

/// In-process typed event bus.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    metrics: Arc<Metrics>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            metrics: Arc::new(Metrics::default()),
        }
    }

    /// Subscribe to the bus. Thread-safe; may be called concurrently.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish without waiting on subscribers (fire-and-forget, §4.7).
    pub fn publish(&self, event: Event) {
        self.metrics.published.fetch_add(1, Ordering::Relaxed);
        // Err(SendError) only when there are zero subscribers, which is not
        // a failure for a fire-and-forget publish.
        let _ = self.sender.send(event);
    }

    /// Publish and yield once so subscribers that are ready to run get a
    /// turn before the caller continues. Used only by the session state
    /// machine (§4.7), which must observe `StatusChanged` side effects
    /// (e.g. the state store write) before it proceeds past a transition.
    pub async fn publish_sync(&self, event: Event) {
        self.publish(event);
        tokio::task::yield_now().await;
    }

    /// Current number of events published since construction.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.metrics.published.load(Ordering::Relaxed)
    }

    /// Records that a subscriber's receiver lagged (missed events). The
    /// dispatcher loop (one per subscriber task) calls this instead of
    /// propagating the lag as an error, so one slow subscriber never drops
    /// another's stream.
    pub fn record_lag(&self, skipped: u64) {
        self.metrics.lagged.fetch_add(skipped, Ordering::Relaxed);
        warn!(skipped, "event bus subscriber lagged, events were dropped for it");
    }

    #[must_use]
    pub fn lagged_count(&self) -> u64 {
        self.metrics.lagged.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains a subscriber's receiver, invoking `handler` for each event and
/// recording (rather than propagating) lag so a single bad subscriber never
/// takes down the bus (§4.7: "Dispatcher catches and logs subscriber
/// exceptions; one bad subscriber does not drop other subscribers").
pub async fn run_subscriber<F>(bus: EventBus, mut receiver: broadcast::Receiver<Event>, mut handler: F)
where
    F: FnMut(Event) + Send,
{
    loop {
        match receiver.recv().await {
            Ok(event) => handler(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => bus.record_lag(skipped),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
