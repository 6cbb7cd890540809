//! Circuit breaker half of the retry executor (C3, §4.3).
//!
//! Tracks consecutive failures per URL and trips `CLOSED -> OPEN -> HALF_OPEN`
//! so a consistently failing target stops being hammered. Adapted from the
//! per-domain health table pattern (`DashMap<String, DomainHealth>`) used for
//! crawl-target health tracking in the wider retrieval pack, generalized here
//! to key on gallery/image URL rather than domain, per §4.3's "all state
//! changes logged" requirement.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, warn};

use crate::events::bus::EventBus;
use crate::events::types::Event;

/// Three-state guard (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct Health {
    state: CircuitState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            open_until: None,
        }
    }
}

/// Whether the breaker currently allows an attempt for a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed with the call.
    Allowed,
    /// Still OPEN; caller should return `Failure{action: pause}`.
    Rejected,
}

/// Per-URL circuit breaker (§4.3).
pub struct CircuitBreaker {
    health: DashMap<String, Health>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            health: DashMap::new(),
            failure_threshold,
            recovery_timeout,
        }
    }

    /// Default breaker per §4.3: `failure_threshold = 5`, `recovery_timeout = 60s`.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(5, Duration::from_secs(60))
    }

    /// Step 1 of §4.3's executor loop: check (and possibly transition) the circuit.
    pub fn admit(&self, url: &str) -> Admission {
        let mut entry = self.health.entry(url.to_string()).or_default();
        match entry.state {
            CircuitState::Closed | CircuitState::HalfOpen => Admission::Allowed,
            CircuitState::Open => {
                let now = Instant::now();
                if entry.open_until.is_some_and(|until| now >= until) {
                    entry.state = CircuitState::HalfOpen;
                    info!(url, "circuit half-open, admitting trial request");
                    Admission::Allowed
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    /// Step 2: a call succeeded.
    pub fn record_success(&self, url: &str, bus: Option<&EventBus>) {
        let mut entry = self.health.entry(url.to_string()).or_default();
        let was_half_open = entry.state == CircuitState::HalfOpen;
        entry.consecutive_failures = 0;
        entry.state = CircuitState::Closed;
        entry.open_until = None;
        let _ = bus;
        if was_half_open {
            info!(url, "circuit closed after successful half-open trial");
        }
    }

    /// Step 3: a call failed. Returns the resulting state so the executor can
    /// decide whether to short-circuit the remaining retry budget.
    pub fn record_failure(&self, url: &str, bus: Option<&EventBus>) -> CircuitState {
        let mut entry = self.health.entry(url.to_string()).or_default();
        if entry.state == CircuitState::HalfOpen {
            entry.state = CircuitState::Open;
            entry.open_until = Some(Instant::now() + self.recovery_timeout);
            warn!(url, "half-open trial failed, circuit re-opened");
            if let Some(bus) = bus {
                bus.publish(Event::CircuitOpened {
                    url: url.to_string(),
                    consecutive_failures: entry.consecutive_failures,
                    open_until_secs: self.recovery_timeout.as_secs(),
                });
            }
            return entry.state;
        }
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.failure_threshold {
            entry.state = CircuitState::Open;
            entry.open_until = Some(Instant::now() + self.recovery_timeout);
            warn!(
                url,
                consecutive_failures = entry.consecutive_failures,
                "circuit tripped to OPEN"
            );
            if let Some(bus) = bus {
                bus.publish(Event::CircuitOpened {
                    url: url.to_string(),
                    consecutive_failures: entry.consecutive_failures,
                    open_until_secs: self.recovery_timeout.as_secs(),
                });
            }
        }
        entry.state
    }

    #[must_use]
    pub fn state(&self, url: &str) -> CircuitState {
        self.health.get(url).map_or(CircuitState::Closed, |h| h.state)
    }
}
