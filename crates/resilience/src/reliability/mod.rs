//! Reliability primitives: circuit breakers, retry backoff and timeouts.
//!
//! The monitor composes these into `execute_with_resilience`; the recovery executor
//! reuses the timeout helpers for individual actions.

pub mod circuit_breaker;
pub mod retry_policy;
pub mod timeout_manager;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerState,
    CircuitBreakerStats,
};
pub use retry_policy::{BackoffStrategy, RetryConfig};
pub use timeout_manager::{run_with_timeout, spawn_with_timeout, OperationTimeoutError};

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ConfigError;
use crate::types::ComponentId;

/// Error surfaced to callers of `execute_with_resilience`
#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error("Component '{0}' is not registered")]
    UnknownComponent(ComponentId),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitBreakerError),

    #[error(
        "Operation on '{component}' failed after {attempts} attempt(s) \
         (recovery attempted: {recovery_attempted}): {last_error}"
    )]
    RetriesExhausted {
        component: ComponentId,
        attempts: u32,
        recovery_attempted: bool,
        last_error: String,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Lazily populated breaker table shared by the monitor and the recovery executor
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    default_config: CircuitBreakerConfig,
    overrides: DashMap<ComponentId, CircuitBreakerConfig>,
    breakers: DashMap<ComponentId, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            overrides: DashMap::new(),
            breakers: DashMap::new(),
        }
    }

    /// Per-component configuration used when the breaker is first created
    pub fn configure(&self, component: ComponentId, config: CircuitBreakerConfig) {
        self.overrides.insert(component, config);
    }

    pub fn get(&self, component: &ComponentId) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(component).map(|entry| entry.value().clone())
    }

    /// Breaker for `component`, created on first use
    pub fn get_or_create(&self, component: &ComponentId) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(component.clone())
            .or_insert_with(|| {
                let config = self
                    .overrides
                    .get(component)
                    .map(|entry| entry.value().clone())
                    .unwrap_or_else(|| self.default_config.clone());
                Arc::new(CircuitBreaker::new(component.clone(), config))
            })
            .value()
            .clone()
    }

    /// A component without a breaker has never failed and is allowed
    pub fn allow(&self, component: &ComponentId) -> bool {
        self.get(component).map(|cb| cb.allow()).unwrap_or(true)
    }

    pub fn record_success(&self, component: &ComponentId) {
        if let Some(cb) = self.get(component) {
            cb.record_success();
        }
    }

    pub fn record_failure(&self, component: &ComponentId) {
        self.get_or_create(component).record_failure();
    }

    pub fn state(&self, component: &ComponentId) -> Option<CircuitBreakerState> {
        self.get(component).map(|cb| cb.state())
    }

    pub fn reset(&self, component: &ComponentId) {
        if let Some(cb) = self.get(component) {
            cb.reset();
        }
    }

    pub fn stats(&self) -> HashMap<ComponentId, CircuitBreakerStats> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_breakers_created_lazily_on_failure() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default());
        let renderer = ComponentId::from("renderer");

        assert!(registry.allow(&renderer));
        registry.record_success(&renderer);
        assert!(registry.get(&renderer).is_none());

        registry.record_failure(&renderer);
        assert_eq!(registry.state(&renderer), Some(CircuitBreakerState::Closed));
        assert_eq!(registry.stats().len(), 1);
    }

    #[test]
    fn test_component_override_applies() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default());
        let network = ComponentId::from("network");
        registry.configure(
            network.clone(),
            CircuitBreakerConfig {
                failure_threshold: 1,
                reset_timeout: Duration::from_secs(60),
            },
        );

        registry.record_failure(&network);
        assert_eq!(registry.state(&network), Some(CircuitBreakerState::Open));
        assert!(!registry.allow(&network));

        registry.reset(&network);
        assert!(registry.allow(&network));
    }
}
