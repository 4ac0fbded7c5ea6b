//! Threshold classification and statistical anomaly detection for incoming samples.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

use super::history::MetricHistory;
use crate::config::ConfigError;
use crate::types::{ComponentId, HealthStatus, MetricSample, Threshold, ThresholdSet};

/// Rolling-window anomaly detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Prior samples considered for the rolling mean
    pub window: usize,
    /// Fewer prior samples than this skips the check
    pub min_samples: usize,
    /// Deviations beyond this many standard deviations are anomalous
    pub sigma: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window: 20,
            min_samples: 5,
            sigma: 2.0,
        }
    }
}

impl AnomalyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_samples < 2 {
            return Err(ConfigError::InvalidSetting {
                field: "anomaly.min_samples",
                reason: "at least 2 samples are needed for a standard deviation".to_string(),
            });
        }
        if self.window < self.min_samples {
            return Err(ConfigError::InvalidSetting {
                field: "anomaly.window",
                reason: format!("must be at least min_samples ({})", self.min_samples),
            });
        }
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(ConfigError::InvalidSetting {
                field: "anomaly.sigma",
                reason: "must be a positive number".to_string(),
            });
        }
        Ok(())
    }
}

/// Classification of one metric in one sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEvaluation {
    pub metric: String,
    pub value: f64,
    pub status: HealthStatus,
    /// Level crossed, if any
    pub breached_level: Option<f64>,
    pub threshold: Threshold,
}

/// A value that deviates from its recent history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub metric: String,
    pub value: f64,
    pub mean: f64,
    pub std_dev: f64,
    /// Edge of the tolerated band on the side the value fell
    pub bound: f64,
}

impl Anomaly {
    pub fn deviation_sigmas(&self) -> f64 {
        (self.value - self.mean).abs() / self.std_dev
    }
}

/// Result of evaluating one sample against a component's thresholds and history
#[derive(Debug, Clone, Default, Serialize)]
pub struct Evaluation {
    /// Worst classification among the metrics present in the sample
    pub status: HealthStatus,
    pub metrics: Vec<MetricEvaluation>,
    pub anomalies: Vec<Anomaly>,
}

impl Evaluation {
    pub fn anomaly_for(&self, metric: &str) -> Option<&Anomaly> {
        self.anomalies.iter().find(|a| a.metric == metric)
    }
}

/// Stateless evaluator; history is owned by the caller
#[derive(Debug, Clone, Default)]
pub struct HealthEvaluator {
    config: AnomalyConfig,
}

impl HealthEvaluator {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    /// Evaluate `sample` against `thresholds`, using `prior` (which must not yet
    /// contain `sample`) for anomaly detection. Metrics without a threshold are only
    /// checked for anomalies.
    pub fn evaluate(
        &self,
        component: &ComponentId,
        sample: &MetricSample,
        thresholds: &ThresholdSet,
        prior: &MetricHistory,
    ) -> Evaluation {
        let mut evaluation = Evaluation::default();

        // Sorted so alert and event order is stable for a given sample
        let mut names: Vec<&String> = sample.values.keys().collect();
        names.sort();

        for name in names {
            let value = sample.values[name];
            if !value.is_finite() {
                debug!(component = %component, metric = %name, "Ignoring non-finite metric value");
                continue;
            }

            if let Some(threshold) = thresholds.get(name) {
                let (status, breached_level) = threshold.classify(value);
                evaluation.status = evaluation.status.max(status);
                evaluation.metrics.push(MetricEvaluation {
                    metric: name.clone(),
                    value,
                    status,
                    breached_level,
                    threshold: *threshold,
                });
            }

            if let Some(anomaly) = self.detect_anomaly(name, value, prior) {
                debug!(
                    component = %component,
                    metric = %name,
                    value,
                    mean = anomaly.mean,
                    std_dev = anomaly.std_dev,
                    "Anomalous metric value"
                );
                evaluation.anomalies.push(anomaly);
            }
        }

        trace!(component = %component, status = %evaluation.status, "Evaluated sample");
        evaluation
    }

    /// Flag `value` when it lies more than `sigma` standard deviations from the mean
    /// of the prior window. Skipped on short or flat histories.
    pub fn detect_anomaly(&self, metric: &str, value: f64, prior: &MetricHistory) -> Option<Anomaly> {
        let stats = prior.rolling_stats(metric, self.config.window)?;
        if stats.count < self.config.min_samples || stats.std_dev <= f64::EPSILON {
            return None;
        }

        let band = self.config.sigma * stats.std_dev;
        let upper = stats.mean + band;
        let lower = stats.mean - band;
        let bound = if value > upper {
            upper
        } else if value < lower {
            lower
        } else {
            return None;
        };

        Some(Anomaly {
            metric: metric.to_string(),
            value,
            mean: stats.mean,
            std_dev: stats.std_dev,
            bound,
        })
    }
}

/// Worst status per metric, merged over partial samples
pub fn worst_status(statuses: &HashMap<String, HealthStatus>) -> HealthStatus {
    statuses.values().copied().max().unwrap_or_default()
}
