//! Circuit Breaker Implementation
//!
//! Per-component failure-counting state machine that gates whether operations
//! against a component may proceed. All transitions happen under one mutex per
//! breaker so a concurrent `allow()` during half-open lets exactly one trial through.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::ComponentId;

/// Circuit breaker errors
#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    #[error("Circuit breaker for '{component}' is open - operation blocked")]
    Open { component: ComponentId },

    #[error("Circuit breaker configuration invalid: {reason}")]
    ConfigurationError { reason: String },
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    /// Circuit is closed, requests flow through normally
    #[default]
    Closed,

    /// Circuit is open, requests are blocked
    Open,

    /// Circuit is half-open, a single trial decides whether to close or re-open
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "closed"),
            CircuitBreakerState::Open => write!(f, "open"),
            CircuitBreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of failures before circuit opens
    pub failure_threshold: u32,

    /// Time since the last failure before a half-open trial is allowed
    #[serde(rename = "reset_timeout_ms", with = "crate::config::duration_ms")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), CircuitBreakerError> {
        if self.failure_threshold == 0 {
            return Err(CircuitBreakerError::ConfigurationError {
                reason: "failure_threshold must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Statistics for circuit breaker operations
#[derive(Debug, Clone, Default, Serialize)]
pub struct CircuitBreakerStats {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub state_transitions: u64,
    pub failure_count: u32,
    pub current_state: CircuitBreakerState,
}

impl CircuitBreakerStats {
    pub fn block_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.blocked_requests as f64 / self.total_requests as f64
        }
    }
}

#[derive(Debug)]
struct BreakerCore {
    state: CircuitBreakerState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    /// Set while the single half-open trial is outstanding
    trial_started: Option<Instant>,
}

/// Circuit breaker for one component
#[derive(Debug)]
pub struct CircuitBreaker {
    component: ComponentId,
    config: CircuitBreakerConfig,
    core: Mutex<BreakerCore>,
    total_requests: AtomicU64,
    blocked_requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    state_transitions: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(component: ComponentId, config: CircuitBreakerConfig) -> Self {
        Self {
            component,
            config,
            core: Mutex::new(BreakerCore {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                last_failure_time: None,
                trial_started: None,
            }),
            total_requests: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
        }
    }

    /// Check if the breaker lets a request through.
    ///
    /// In half-open state only the first caller gets `true`; everyone else is blocked
    /// until that trial reports back via `record_success` / `record_failure`.
    pub fn allow(&self) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut core = self.core.lock();
        let now = Instant::now();

        let allowed = match core.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => {
                let expired = core
                    .last_failure_time
                    .map(|last| now.duration_since(last) > self.config.reset_timeout)
                    .unwrap_or(true);
                if expired {
                    self.transition(&mut core, CircuitBreakerState::HalfOpen);
                    core.trial_started = Some(now);
                    true
                } else {
                    false
                }
            }
            CircuitBreakerState::HalfOpen => match core.trial_started {
                None => {
                    core.trial_started = Some(now);
                    true
                }
                // A trial that never reported back is treated as lost
                Some(started) if now.duration_since(started) > self.config.reset_timeout => {
                    debug!(component = %self.component, "Half-open trial lost, granting a new one");
                    core.trial_started = Some(now);
                    true
                }
                Some(_) => false,
            },
        };

        if !allowed {
            self.blocked_requests.fetch_add(1, Ordering::Relaxed);
        }
        allowed
    }

    /// Record successful operation
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        let mut core = self.core.lock();

        match core.state {
            CircuitBreakerState::Closed => {}
            CircuitBreakerState::HalfOpen => {
                core.failure_count = 0;
                core.trial_started = None;
                self.transition(&mut core, CircuitBreakerState::Closed);
            }
            CircuitBreakerState::Open => {
                warn!(component = %self.component, "Recorded success while circuit is open");
            }
        }
    }

    /// Record failed operation
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let mut core = self.core.lock();
        let now = Instant::now();
        core.failure_count = core.failure_count.saturating_add(1);
        core.last_failure_time = Some(now);

        debug!(
            component = %self.component,
            state = %core.state,
            failure_count = core.failure_count,
            "Recorded failed operation"
        );

        match core.state {
            CircuitBreakerState::Closed => {
                if core.failure_count >= self.config.failure_threshold {
                    self.transition(&mut core, CircuitBreakerState::Open);
                }
            }
            CircuitBreakerState::HalfOpen => {
                core.trial_started = None;
                self.transition(&mut core, CircuitBreakerState::Open);
            }
            CircuitBreakerState::Open => {}
        }
    }

    /// Force the breaker open, isolating the component
    pub fn force_open(&self) {
        let mut core = self.core.lock();
        info!(component = %self.component, "Forcing circuit breaker to open state");
        core.last_failure_time = Some(Instant::now());
        core.trial_started = None;
        self.transition(&mut core, CircuitBreakerState::Open);
    }

    /// Return to closed with a zeroed failure count
    pub fn reset(&self) {
        let mut core = self.core.lock();
        debug!(component = %self.component, "Resetting circuit breaker");
        core.failure_count = 0;
        core.last_failure_time = None;
        core.trial_started = None;
        self.transition(&mut core, CircuitBreakerState::Closed);
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.core.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.core.lock().failure_count
    }

    pub fn component(&self) -> &ComponentId {
        &self.component
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let core = self.core.lock();
        CircuitBreakerStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
            failure_count: core.failure_count,
            current_state: core.state,
        }
    }

    fn transition(&self, core: &mut BreakerCore, to: CircuitBreakerState) {
        if core.state == to {
            return;
        }
        match to {
            CircuitBreakerState::Open => warn!(
                component = %self.component,
                failure_count = core.failure_count,
                "Circuit breaker opening - blocking requests"
            ),
            CircuitBreakerState::HalfOpen => info!(
                component = %self.component,
                "Circuit breaker transitioning to half-open - testing recovery"
            ),
            CircuitBreakerState::Closed => info!(
                component = %self.component,
                "Circuit breaker closing - component recovered"
            ),
        }
        core.state = to;
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            ComponentId::from("renderer"),
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: reset,
            },
        )
    }

    #[test]
    fn test_circuit_breaker_initial_state() {
        let cb = breaker(3, Duration::from_secs(30));
        assert_eq!(cb.state(), CircuitBreakerState::Closed);
        assert!(cb.allow());
    }

    #[test]
    fn test_circuit_opens_on_failures() {
        let cb = breaker(3, Duration::from_secs(30));

        cb.record_failure();
        cb.record_failure();
        assert!(cb.allow());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitBreakerState::Open);
        assert!(!cb.allow());
        assert_eq!(cb.failure_count(), 3);
    }

    #[test]
    fn test_open_half_open_close_cycle() {
        let cb = breaker(3, Duration::from_millis(50));
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(!cb.allow());

        thread::sleep(Duration::from_millis(70));

        // Exactly one trial
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitBreakerState::HalfOpen);
        assert!(!cb.allow());

        cb.record_success();
        assert_eq!(cb.state(), CircuitBreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
        for _ in 0..5 {
            assert!(cb.allow());
        }
    }

    #[test]
    fn test_half_open_failure_reopens_and_resets_clock() {
        let cb = breaker(2, Duration::from_millis(40));
        cb.record_failure();
        cb.record_failure();
        thread::sleep(Duration::from_millis(60));

        assert!(cb.allow());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitBreakerState::Open);
        assert!(!cb.allow());

        thread::sleep(Duration::from_millis(60));
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitBreakerState::HalfOpen);
    }

    #[test]
    fn test_concurrent_half_open_allows_single_trial() {
        let cb = Arc::new(breaker(1, Duration::from_millis(20)));
        cb.record_failure();
        thread::sleep(Duration::from_millis(40));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cb = cb.clone();
                thread::spawn(move || cb.allow())
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(granted, 1);
        assert_eq!(cb.stats().blocked_requests, 15);
    }

    #[test]
    fn test_success_in_closed_does_not_reset_count() {
        let cb = breaker(3, Duration::from_secs(30));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 2);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitBreakerState::Open);
    }

    #[test]
    fn test_force_open_and_reset() {
        let cb = breaker(5, Duration::from_secs(30));
        cb.force_open();
        assert!(!cb.allow());
        cb.reset();
        assert_eq!(cb.state(), CircuitBreakerState::Closed);
        assert!(cb.allow());
        assert_eq!(cb.stats().state_transitions, 2);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_allow_flips_exactly_at_threshold(threshold in 1u32..20, failures in 0u32..40) {
            let cb = breaker(threshold, Duration::from_secs(3600));
            for i in 1..=failures {
                cb.record_failure();
                prop_assert_eq!(cb.allow(), i < threshold);
            }
            prop_assert_eq!(cb.failure_count(), failures);
        }
    }
}
