//! Resilience engine: health monitoring, alerting and automated recovery for the
//! subsystems of a long-running application.
//!
//! Components report [`MetricSample`]s (or register a [`HealthCheck`]); the
//! [`HealthMonitor`] classifies them against per-metric thresholds, raises and
//! resolves deduplicated alerts, trips per-component circuit breakers and runs
//! prioritized [`RecoveryStrategy`]s with retry limits and cooldowns.

pub mod alerts;
pub mod config;
pub mod events;
pub mod health;
pub mod monitor;
pub mod recovery;
pub mod reliability;
pub mod types;

pub use alerts::{Alert, AlertConfig, AlertKind, AlertRegistry, AlertSeverity};
pub use config::{ComponentConfig, ConfigError, ConfigLoader, EngineConfig, RecoveryConfig};
pub use events::{EventPublisher, HealthEvent, HealthTopics};
pub use health::{AnomalyConfig, HealthCheck, HealthEvaluator, MetricHistory};
pub use monitor::{Fallback, HealthMonitor, ResilienceOptions};
pub use recovery::{
    ActionContext, ActionHandler, ActionKind, ComparisonOperator, RecoveryAction,
    RecoveryResult, RecoveryStrategy, SuccessCriterion, TriggerCondition,
};
pub use reliability::{
    BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState,
    ResilienceError, RetryConfig,
};
pub use types::{
    ComponentHealth, ComponentId, HealthStatus, MetricSample, SystemHealth, Threshold,
    ThresholdDirection, ThresholdSet,
};
