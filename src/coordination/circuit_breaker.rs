//! Service Circuit Breaker
//!
//! Implements the circuit breaker pattern for calls to an external service to
//! prevent cascading failures when the service misbehaves.
//!
//! - **Closed**: calls pass through; consecutive failures are counted.
//! - **Open**: calls are rejected until the recovery timeout has elapsed.
//! - **HalfOpen**: every admitted call is a probe. Enough consecutive
//!   successes close the circuit, a single failure reopens it.
//!
//! The Open -> HalfOpen transition is lazy: it happens on the first
//! admission attempt after the timeout, there is no background timer.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,
    /// Failure threshold exceeded - calls rejected
    Open,
    /// Recovery period - calls admitted as probes
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures to trip the circuit
    pub failure_threshold: u32,
    /// Time to wait before transitioning from Open to HalfOpen
    pub recovery_timeout: Duration,
    /// Number of consecutive HalfOpen successes to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
        }
    }
}

impl From<&ServiceConfig> for CircuitBreakerConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            failure_threshold: config.circuit_breaker_threshold,
            recovery_timeout: config.circuit_breaker_timeout(),
            success_threshold: config.circuit_breaker_success_threshold,
        }
    }
}

/// Trip reasons for the circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripReason {
    ConsecutiveFailures(u32),
    HalfOpenProbeFailed,
    Manual(String),
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TripReason::ConsecutiveFailures(n) => write!(f, "{} consecutive failures", n),
            TripReason::HalfOpenProbeFailed => write!(f, "half-open probe failed"),
            TripReason::Manual(reason) => write!(f, "manual: {}", reason),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    last_trip_reason: Option<TripReason>,
    total_trips: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            last_success: None,
            last_failure: None,
            last_trip_reason: None,
            total_trips: 0,
        }
    }
}

/// Circuit breaker for one external service
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// Create with default configuration
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state without side effects.
    ///
    /// An Open circuit whose timeout has elapsed still reports Open until the
    /// next admission attempt moves it to HalfOpen.
    pub fn current_state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Decide whether a call may proceed.
    ///
    /// Returns the remaining wait as the error when the circuit is open.
    pub fn admit(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed())
                    .unwrap_or(self.config.recovery_timeout);

                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    info!(service = %self.name, "Circuit breaker transitioning to HALF-OPEN");
                    Ok(())
                } else {
                    let retry_after = self.config.recovery_timeout - elapsed;
                    debug!(service = %self.name, ?retry_after, "Circuit open, call rejected");
                    Err(retry_after)
                }
            }
        }
    }

    /// Feed the outcome of an admitted call into the state machine
    pub fn record_outcome(&self, success: bool) {
        if success {
            self.record_success();
        } else {
            self.record_failure();
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.last_success = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    Self::close(&mut inner);
                    info!(service = %self.name, "Circuit breaker CLOSED - normal operation resumed");
                }
            }
            // A call admitted before the circuit tripped; it says nothing about recovery.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                let failures = inner.consecutive_failures;
                debug!(service = %self.name, "Call failure #{}", failures);

                if failures >= self.config.failure_threshold {
                    self.open(&mut inner, TripReason::ConsecutiveFailures(failures));
                }
            }
            CircuitState::HalfOpen => {
                inner.consecutive_failures += 1;
                self.open(&mut inner, TripReason::HalfOpenProbeFailed);
            }
            CircuitState::Open => {
                inner.consecutive_failures += 1;
            }
        }
    }

    /// Manually trip the circuit
    pub fn trip(&self, reason: &str) {
        let mut inner = self.inner.lock();
        self.open(&mut inner, TripReason::Manual(reason.to_string()));
    }

    /// Force close the circuit (manual reset)
    pub fn force_reset(&self) {
        let mut inner = self.inner.lock();
        Self::close(&mut inner);
        inner.last_trip_reason = None;
        warn!(service = %self.name, "Circuit breaker force-closed");
    }

    /// Get circuit breaker statistics
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        let retry_after = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => self
                .config
                .recovery_timeout
                .saturating_sub(opened_at.elapsed()),
            _ => Duration::ZERO,
        };

        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            retry_after_secs: retry_after.as_secs_f64(),
            last_success: inner.last_success,
            last_failure: inner.last_failure,
            last_trip_reason: inner.last_trip_reason.clone(),
            total_trips: inner.total_trips,
        }
    }

    fn open(&self, inner: &mut BreakerInner, reason: TripReason) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.consecutive_successes = 0;
        inner.total_trips += 1;
        warn!(service = %self.name, "Circuit breaker TRIPPED: {}", reason);
        inner.last_trip_reason = Some(reason);
    }

    fn close(inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = None;
    }
}

/// Statistics for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Seconds until an open circuit admits a probe, zero otherwise
    pub retry_after_secs: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_trip_reason: Option<TripReason>,
    pub total_trips: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, timeout_ms: u64, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout: Duration::from_millis(timeout_ms),
                success_threshold,
            },
        )
    }

    #[test]
    fn test_circuit_breaker_initial_state() {
        let cb = CircuitBreaker::with_defaults("test");
        assert_eq!(cb.current_state(), CircuitState::Closed);
        assert!(cb.admit().is_ok());
    }

    #[test]
    fn test_circuit_breaker_trip_on_failures() {
        let cb = breaker(3, 60_000, 1);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Open);

        let retry_after = cb.admit().unwrap_err();
        assert!(retry_after > Duration::from_secs(59));
        assert_eq!(
            cb.stats().last_trip_reason,
            Some(TripReason::ConsecutiveFailures(3))
        );
    }

    #[test]
    fn test_circuit_breaker_success_resets_failures() {
        let cb = breaker(3, 60_000, 1);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();

        // Failures should be reset
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Closed);
        assert_eq!(cb.stats().consecutive_failures, 2);
    }

    #[test]
    fn test_open_becomes_half_open_lazily() {
        let cb = breaker(1, 20, 1);
        cb.record_failure();
        assert_eq!(cb.current_state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(30));

        // Pure read does not transition
        assert_eq!(cb.current_state(), CircuitState::Open);

        assert!(cb.admit().is_ok());
        assert_eq!(cb.current_state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let cb = breaker(1, 0, 2);
        cb.record_failure();
        assert!(cb.admit().is_ok());
        assert_eq!(cb.current_state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.current_state(), CircuitState::HalfOpen);
        assert_eq!(cb.stats().consecutive_successes, 1);

        cb.record_success();
        assert_eq!(cb.current_state(), CircuitState::Closed);

        let stats = cb.stats();
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.consecutive_successes, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(2, 0, 3);
        cb.record_failure();
        cb.record_failure();
        assert!(cb.admit().is_ok());

        cb.record_success();
        cb.record_failure();

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.consecutive_successes, 0);
        assert_eq!(stats.last_trip_reason, Some(TripReason::HalfOpenProbeFailed));
        assert_eq!(stats.total_trips, 2);
    }

    #[test]
    fn test_half_open_failure_restarts_timeout() {
        let cb = breaker(1, 40, 1);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(50));
        assert!(cb.admit().is_ok());

        cb.record_failure();
        assert!(cb.admit().is_err());
    }

    #[test]
    fn test_every_half_open_call_is_a_probe() {
        let cb = breaker(1, 0, 3);
        cb.record_failure();

        // Concurrent callers are all admitted while half-open
        assert!(cb.admit().is_ok());
        assert!(cb.admit().is_ok());
        assert!(cb.admit().is_ok());
        assert_eq!(cb.current_state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_circuit_breaker_manual_trip_and_reset() {
        let cb = CircuitBreaker::with_defaults("test");

        cb.trip("maintenance window");
        assert_eq!(cb.current_state(), CircuitState::Open);
        assert_eq!(
            cb.stats().last_trip_reason,
            Some(TripReason::Manual("maintenance window".to_string()))
        );

        cb.force_reset();
        assert_eq!(cb.current_state(), CircuitState::Closed);

        let stats = cb.stats();
        assert_eq!(stats.consecutive_failures, 0);
        assert!(stats.last_trip_reason.is_none());
        assert_eq!(stats.total_trips, 1);
    }

    #[test]
    fn test_record_outcome_dispatches() {
        let cb = breaker(2, 60_000, 1);
        cb.record_outcome(false);
        cb.record_outcome(true);
        cb.record_outcome(false);
        assert_eq!(cb.current_state(), CircuitState::Closed);
        cb.record_outcome(false);
        assert_eq!(cb.current_state(), CircuitState::Open);
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
        assert_eq!(
            TripReason::ConsecutiveFailures(3).to_string(),
            "3 consecutive failures"
        );
    }
}
