//! Health evaluation: metric history, threshold classification, anomaly detection
//! and the health-check seam for components that can report on themselves.

pub mod evaluator;
pub mod history;

pub use evaluator::{
    worst_status, Anomaly, AnomalyConfig, Evaluation, HealthEvaluator, MetricEvaluation,
};
pub use history::{MetricHistory, RollingStats};

use async_trait::async_trait;

use crate::types::ComponentHealth;

/// Active probe registered for a component and run on every evaluation cycle.
///
/// Metrics in the returned health are fed back through the normal sample path, so
/// thresholds and alerts apply to them too. An error or a timeout marks the
/// component unhealthy for that cycle.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> anyhow::Result<ComponentHealth>;
}

#[async_trait]
impl<F> HealthCheck for F
where
    F: Fn() -> anyhow::Result<ComponentHealth> + Send + Sync,
{
    async fn check(&self) -> anyhow::Result<ComponentHealth> {
        self()
    }
}
