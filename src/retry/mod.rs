//! Retry executor with circuit breaker (C3, §4.3).

pub mod circuit_breaker;
pub mod executor;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitState};
pub use executor::{Failure, FailureReason, Outcome, PauseSignal, RetryExecutor, log_final_failure};
