//! Retry executor (C3, §4.3): runs a fallible operation inside a bounded
//! retry loop with exponential backoff, jitter, and a per-URL circuit
//! breaker. The three numbered steps below are the same three steps named in
//! §4.3.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use crate::category::{self, ErrorCategory, FinalAction};
use crate::error::DownloadError;
use crate::events::{Event, EventBus};

use super::circuit_breaker::{Admission, CircuitBreaker};

/// Why a [`Failure`] was returned, carried alongside `action` so the gallery
/// processor (C4) can tell a circuit-open pause from a user-initiated one,
/// and so the orchestrator knows when to invoke the fallback executor (C6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    CircuitOpen,
    SeleniumImmediate,
    FallbackNeeded,
    FallbackEarly,
    UserPaused,
    None,
}

#[derive(Debug, Clone)]
pub struct Failure {
    pub action: FinalAction,
    pub reason: FailureReason,
    pub category: ErrorCategory,
    /// Set when `should_refresh_session` fired; the caller should rotate its
    /// HTTP session (cookies, connection) before retrying.
    pub refresh_session: bool,
}

pub enum Outcome<T> {
    Success { value: T, retry_count: u32 },
    Failure(Failure),
}

/// Checked once per backoff slice (§4.3's "checking the pause flag each
/// slice") and once before sleeping to honour cooperative pause (§5).
pub trait PauseSignal {
    fn is_paused(&self) -> bool;
}

impl<F: Fn() -> bool> PauseSignal for F {
    fn is_paused(&self) -> bool {
        self()
    }
}

/// Largest single backoff sleep slice, so a pause request is observed within
/// 500ms even during a 60s backoff (§5).
const SLICE: Duration = Duration::from_millis(500);
const BACKOFF_CAP_SECS: f64 = 60.0;
const BACKOFF_FLOOR_SECS: f64 = 0.5;

/// Drives `op` to completion, retry, or a terminal `Failure` action (§4.3).
pub struct RetryExecutor {
    breaker: CircuitBreaker,
    bus: EventBus,
}

impl RetryExecutor {
    #[must_use]
    pub fn new(breaker: CircuitBreaker, bus: EventBus) -> Self {
        Self { breaker, bus }
    }

    /// Executes `op`, reclassifying and retrying failures per the policy
    /// attached to the category each failure maps to.
    pub async fn execute<T, F, Fut>(
        &self,
        url: &str,
        user_override: Option<u32>,
        pause: &impl PauseSignal,
        mut op: F,
    ) -> Outcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DownloadError>>,
    {
        let mut retry_count: u32 = 0;
        loop {
            // Step 1: circuit check.
            if self.breaker.admit(url) == Admission::Rejected {
                return Outcome::Failure(Failure {
                    action: FinalAction::Pause,
                    reason: FailureReason::CircuitOpen,
                    category: ErrorCategory::Unknown,
                    refresh_session: false,
                });
            }

            // Step 2: run the operation.
            let error = match op().await {
                Ok(value) => {
                    self.breaker.record_success(url, Some(&self.bus));
                    return Outcome::Success { value, retry_count };
                }
                Err(error) => error,
            };

            // Step 3: classify and decide.
            let category = ErrorCategory::classify(&error);
            debug!(url, ?category, retry_count, "operation failed, classifying");

            if !category.should_retry() {
                return Outcome::Failure(Failure {
                    action: category.final_action(),
                    reason: FailureReason::None,
                    category,
                    refresh_session: false,
                });
            }

            if retry_count == 0 && user_override == Some(0) && category.policy().selenium_fallback
            {
                return Outcome::Failure(Failure {
                    action: FinalAction::Continue,
                    reason: FailureReason::SeleniumImmediate,
                    category,
                    refresh_session: false,
                });
            }

            let max = category.max_retries(user_override);
            if retry_count >= max {
                let circuit_state = self.breaker.record_failure(url, Some(&self.bus));
                let _ = circuit_state;
                if category.should_try_fallback(retry_count) {
                    return Outcome::Failure(Failure {
                        action: FinalAction::Continue,
                        reason: FailureReason::FallbackNeeded,
                        category,
                        refresh_session: false,
                    });
                }
                return Outcome::Failure(Failure {
                    action: category.final_action(),
                    reason: FailureReason::None,
                    category,
                    refresh_session: false,
                });
            }

            let refresh_session = category.should_refresh_session(retry_count);

            if category.should_try_fallback(retry_count) {
                return Outcome::Failure(Failure {
                    action: FinalAction::Continue,
                    reason: FailureReason::FallbackEarly,
                    category,
                    refresh_session,
                });
            }

            let delay = retry_after_delay(category, &error)
                .unwrap_or_else(|| backoff_delay(category, retry_count));
            if self.sleep_sliced(delay, pause).await {
                return Outcome::Failure(Failure {
                    action: FinalAction::Pause,
                    reason: FailureReason::UserPaused,
                    category,
                    refresh_session,
                });
            }

            retry_count += 1;
        }
    }

    /// Sleeps up to `delay`, checking `pause` every [`SLICE`]. Returns `true`
    /// if a pause was observed before the sleep completed.
    async fn sleep_sliced(&self, delay: Duration, pause: &impl PauseSignal) -> bool {
        let mut remaining = delay;
        while remaining > Duration::ZERO {
            if pause.is_paused() {
                return true;
            }
            let slice = remaining.min(SLICE);
            sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
        pause.is_paused()
    }

    /// Current circuit state for `url`, for diagnostics/tests.
    #[must_use]
    pub fn circuit_state(&self, url: &str) -> super::circuit_breaker::CircuitState {
        self.breaker.state(url)
    }
}

/// Applies jitter (uniform in `[0.8, 1.2]`), then the floor and cap, in that
/// order — `original_source`'s `integrated_retry_manager` confirms cap/floor
/// are enforced *after* jitter, not before (§4.3, SPEC_FULL §4).
fn backoff_delay(category: ErrorCategory, retry_count: u32) -> Duration {
    let raw = category.raw_backoff_secs(retry_count.max(1));
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    let jittered = raw * jitter;
    let bounded = jittered.clamp(BACKOFF_FLOOR_SECS, BACKOFF_CAP_SECS);
    Duration::from_secs_f64(bounded)
}

/// Honors a server-supplied `Retry-After` on `net.rate_limit`, clamped to the
/// same floor/cap as the computed backoff; no jitter, the server already gave
/// us an exact value.
fn retry_after_delay(category: ErrorCategory, error: &DownloadError) -> Option<Duration> {
    if category != ErrorCategory::NetRateLimit {
        return None;
    }
    let raw = category::retry_after_duration(error)?;
    let floor = Duration::from_secs_f64(BACKOFF_FLOOR_SECS);
    let cap = Duration::from_secs_f64(BACKOFF_CAP_SECS);
    Some(raw.clamp(floor, cap))
}

/// Publishes a log-worthy `CircuitOpened`-adjacent event for high-severity
/// breaker trips; kept separate from [`RetryExecutor`] so callers that don't
/// need bus access (unit tests) can skip it.
pub fn log_final_failure(url: &str, failure: &Failure) {
    info!(
        url,
        action = ?failure.action,
        reason = ?failure.reason,
        category = ?failure.category,
        "retry executor terminal failure"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration as StdDuration;

    fn never_paused() -> impl Fn() -> bool {
        || false
    }

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let executor = RetryExecutor::new(CircuitBreaker::with_defaults(), EventBus::new());
        let outcome = executor
            .execute("u", None, &never_paused(), || async { Ok::<_, DownloadError>(42) })
            .await;
        match outcome {
            Outcome::Success { value, retry_count } => {
                assert_eq!(value, 42);
                assert_eq!(retry_count, 0);
            }
            Outcome::Failure(_) => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn non_retryable_category_fails_immediately() {
        let executor = RetryExecutor::new(CircuitBreaker::with_defaults(), EventBus::new());
        let outcome = executor
            .execute("u", None, &never_paused(), || async {
                Err::<(), _>(DownloadError::io(
                    "/tmp/x",
                    std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no"),
                ))
            })
            .await;
        match outcome {
            Outcome::Failure(failure) => {
                assert_eq!(failure.category, ErrorCategory::FsPermission);
                assert_eq!(failure.action, FinalAction::SkipImage);
            }
            Outcome::Success { .. } => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn retries_transient_failure_then_succeeds() {
        let executor = RetryExecutor::new(CircuitBreaker::with_defaults(), EventBus::new());
        let attempts = AtomicU32::new(0);
        let outcome = executor
            .execute("u", None, &never_paused(), || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(DownloadError::http_status("https://e/x", 503))
                    } else {
                        Ok(99)
                    }
                }
            })
            .await;
        match outcome {
            Outcome::Success { value, retry_count } => {
                assert_eq!(value, 99);
                assert_eq!(retry_count, 2);
            }
            Outcome::Failure(_) => panic!("expected eventual success"),
        }
    }

    #[tokio::test]
    async fn selenium_immediate_on_first_attempt_with_zero_override() {
        let executor = RetryExecutor::new(CircuitBreaker::with_defaults(), EventBus::new());
        let outcome = executor
            .execute("u", Some(0), &never_paused(), || async {
                Err::<(), _>(DownloadError::http_status("https://e/x", 503))
            })
            .await;
        match outcome {
            Outcome::Failure(failure) => {
                assert_eq!(failure.reason, FailureReason::SeleniumImmediate);
                assert_eq!(failure.action, FinalAction::Continue);
            }
            Outcome::Success { .. } => panic!("expected selenium-immediate failure"),
        }
    }

    #[tokio::test]
    async fn pause_during_backoff_returns_pause_action() {
        let executor = RetryExecutor::new(CircuitBreaker::with_defaults(), EventBus::new());
        let paused = || true;
        let outcome = executor
            .execute("u", None, &paused, || async {
                Err::<(), _>(DownloadError::http_status("https://e/x", 503))
            })
            .await;
        match outcome {
            Outcome::Failure(failure) => {
                assert_eq!(failure.reason, FailureReason::UserPaused);
                assert_eq!(failure.action, FinalAction::Pause);
            }
            Outcome::Success { .. } => panic!("expected pause"),
        }
    }

    #[test]
    fn retry_after_delay_overrides_computed_backoff_for_rate_limit() {
        let error = DownloadError::http_status_with_retry_after(
            "https://e/x",
            429,
            Some("5".to_string()),
        );
        let delay = retry_after_delay(ErrorCategory::NetRateLimit, &error).unwrap();
        assert_eq!(delay, StdDuration::from_secs(5));
    }

    #[test]
    fn retry_after_delay_ignores_non_rate_limit_categories() {
        let error = DownloadError::http_status_with_retry_after(
            "https://e/x",
            503,
            Some("5".to_string()),
        );
        assert!(retry_after_delay(ErrorCategory::NetServerError, &error).is_none());
    }

    #[test]
    fn backoff_delay_respects_floor_and_cap() {
        for retry_count in 0..20 {
            let delay = backoff_delay(ErrorCategory::NetRateLimit, retry_count);
            assert!(delay >= StdDuration::from_millis(500));
            assert!(delay <= StdDuration::from_secs(60));
        }
    }
}
