//! Session state machine (C7, §4.1).
//!
//! Per-gallery lifecycle, observable externally via the event bus. The
//! transition table below is transcribed directly from §4.1; any action not
//! listed for the current state is rejected and logged rather than panicking
//! — a malformed or duplicate command from the GUI must never crash the
//! engine.

use tracing::warn;

use crate::events::{Event, EventBus};
use crate::gallery::types::UrlStatus;

/// Per-gallery lifecycle state (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initializing,
    Downloading,
    Paused,
    Error,
    Retrying,
    Completed,
    Aborted,
}

/// An action requested of the state machine (by the orchestrator, the retry
/// executor, or the GUI via the orchestrator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Start,
    Error,
    Abort,
    Pause,
    Complete,
    Resume,
    Retry,
    Skip,
}

/// Returned when an action is not defined for the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("action {action:?} is not valid in state {state:?}")]
pub struct TransitionRejected {
    pub state: SessionState,
    pub action: SessionAction,
}

impl SessionState {
    /// Looks up the next state for `action`, per the §4.1 transition table.
    fn next(self, action: SessionAction) -> Option<SessionState> {
        use SessionAction::{Abort, Complete, Error, Pause, Resume, Retry, Skip, Start};
        use SessionState::{
            Aborted, Completed, Downloading, Error as ErrState, Idle, Initializing, Paused,
            Retrying,
        };
        match (self, action) {
            (Idle, Start) => Some(Initializing),
            (Initializing, Start) => Some(Downloading),
            (Initializing, Error) => Some(ErrState),
            (Initializing, Abort) => Some(Aborted),
            (Downloading, Pause) => Some(Paused),
            (Downloading, Error) => Some(ErrState),
            (Downloading, Complete) => Some(Completed),
            (Downloading, Abort) => Some(Aborted),
            (Paused, Resume) => Some(Downloading),
            (Paused, Abort) => Some(Aborted),
            (ErrState, Retry) => Some(Retrying),
            (ErrState, Skip) => Some(Downloading),
            (ErrState, Resume) => Some(Downloading),
            (ErrState, Abort) => Some(Aborted),
            (Retrying, Start) => Some(Downloading),
            (Retrying, Error) => Some(ErrState),
            (Retrying, Abort) => Some(Aborted),
            (Completed, Start) => Some(Initializing),
            (Aborted, Start) => Some(Initializing),
            _ => None,
        }
    }

    /// Whether this state counts toward the "at most one active gallery"
    /// invariant (§4.1, Property 1 in §8).
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Initializing | SessionState::Downloading | SessionState::Retrying
        )
    }

    /// Maps this session state onto the coarser [`UrlStatus`] the state store
    /// exposes to observers (§3, §4.9).
    #[must_use]
    pub fn as_url_status(self) -> UrlStatus {
        match self {
            SessionState::Idle => UrlStatus::Pending,
            SessionState::Initializing | SessionState::Downloading | SessionState::Retrying => {
                UrlStatus::Downloading
            }
            SessionState::Paused => UrlStatus::Paused,
            SessionState::Error | SessionState::Aborted => UrlStatus::Error,
            SessionState::Completed => UrlStatus::Completed,
        }
    }
}

/// One gallery's session state machine.
pub struct SessionMachine {
    url: String,
    state: SessionState,
}

impl SessionMachine {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: SessionState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Applies `action`. On success, publishes `StatusChanged` via
    /// `publish_sync` so the caller can rely on the state store having been
    /// notified before this call returns (§4.1: "the state store is updated
    /// and the event bus publishes `StatusChanged`").
    ///
    /// # Errors
    /// Returns [`TransitionRejected`] if `action` is not valid from the
    /// current state; the machine's state is left unchanged.
    pub async fn apply(
        &mut self,
        action: SessionAction,
        bus: &EventBus,
    ) -> Result<SessionState, TransitionRejected> {
        match self.state.next(action) {
            Some(next) => {
                self.state = next;
                bus.publish_sync(Event::StatusChanged {
                    url: self.url.clone(),
                    state: next,
                })
                .await;
                Ok(next)
            }
            None => {
                let rejected = TransitionRejected {
                    state: self.state,
                    action,
                };
                warn!(url = %self.url, ?rejected, "rejected session transition");
                Err(rejected)
            }
        }
    }
}
