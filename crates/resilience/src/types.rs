//! Core data model shared by the health, alerting and recovery modules.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::reliability::CircuitBreakerState;

/// Identifier of a monitored subsystem ("renderer", "neural", "network", ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Immutable snapshot of a component's observed metrics at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub component_id: ComponentId,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    pub values: HashMap<String, f64>,
}

impl MetricSample {
    pub fn new(
        component_id: impl Into<ComponentId>,
        timestamp_ms: i64,
        values: HashMap<String, f64>,
    ) -> Self {
        Self {
            component_id: component_id.into(),
            timestamp_ms,
            values,
        }
    }

    /// Sample stamped with the current wall-clock time
    pub fn now(component_id: impl Into<ComponentId>, values: HashMap<String, f64>) -> Self {
        Self::new(component_id, Utc::now().timestamp_millis(), values)
    }

    pub fn value(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_ms)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Component health, ordered by severity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Warning,
    Unhealthy,
    Critical,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Which side of a threshold is the bad side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdDirection {
    /// Trips when the value rises to the threshold (latency, memory)
    #[default]
    Above,
    /// Trips when the value falls to the threshold (fps, throughput)
    Below,
}

impl ThresholdDirection {
    /// Whether `value` is on the bad side of `level`
    pub fn breaches(self, value: f64, level: f64) -> bool {
        match self {
            ThresholdDirection::Above => value >= level,
            ThresholdDirection::Below => value <= level,
        }
    }

    /// Whether `value` has moved clear of a breached `level` by the hysteresis margin
    pub fn clears(self, value: f64, level: f64, margin: f64) -> bool {
        match self {
            ThresholdDirection::Above => value < level * (1.0 - margin),
            ThresholdDirection::Below => value > level * (1.0 + margin),
        }
    }
}

/// Warning/critical levels for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
    #[serde(default)]
    pub direction: ThresholdDirection,
}

impl Threshold {
    pub fn above(warning: f64, critical: f64) -> Self {
        Self {
            warning,
            critical,
            direction: ThresholdDirection::Above,
        }
    }

    pub fn below(warning: f64, critical: f64) -> Self {
        Self {
            warning,
            critical,
            direction: ThresholdDirection::Below,
        }
    }

    /// Checks that warning is strictly less severe than critical
    pub fn validate(&self) -> Result<(), String> {
        if !self.warning.is_finite() || !self.critical.is_finite() {
            return Err("threshold levels must be finite".to_string());
        }
        match self.direction {
            ThresholdDirection::Above if self.warning >= self.critical => Err(format!(
                "warning ({}) must be below critical ({}) for an 'above' threshold",
                self.warning, self.critical
            )),
            ThresholdDirection::Below if self.warning <= self.critical => Err(format!(
                "warning ({}) must be above critical ({}) for a 'below' threshold",
                self.warning, self.critical
            )),
            _ => Ok(()),
        }
    }

    /// Returns the classification and, when breached, the level that was crossed
    pub fn classify(&self, value: f64) -> (HealthStatus, Option<f64>) {
        if self.breaches(value, self.critical) {
            (HealthStatus::Critical, Some(self.critical))
        } else if self.breaches(value, self.warning) {
            (HealthStatus::Warning, Some(self.warning))
        } else {
            (HealthStatus::Healthy, None)
        }
    }

    pub fn breaches(&self, value: f64, level: f64) -> bool {
        self.direction.breaches(value, level)
    }

    pub fn clears(&self, value: f64, level: f64, margin: f64) -> bool {
        self.direction.clears(value, level, margin)
    }
}

/// Thresholds for one component keyed by metric name
pub type ThresholdSet = HashMap<String, Threshold>;

/// Health of one component, either computed by the monitor or returned by a health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component_id: ComponentId,
    pub status: HealthStatus,
    /// Latest metric values
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
    /// Per-metric classification from the last evaluation
    #[serde(default)]
    pub metric_status: HashMap<String, HealthStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaker: Option<CircuitBreakerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sample_at: Option<DateTime<Utc>>,
    pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
    pub fn new(component_id: impl Into<ComponentId>, status: HealthStatus) -> Self {
        Self {
            component_id: component_id.into(),
            status,
            metrics: HashMap::new(),
            metric_status: HashMap::new(),
            breaker: None,
            message: None,
            last_sample_at: None,
            checked_at: Utc::now(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Aggregate health snapshot served to consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub overall: HealthStatus,
    pub components: HashMap<ComponentId, ComponentHealth>,
    pub active_alerts: Vec<crate::alerts::Alert>,
    pub uptime_ms: i64,
    pub generated_at: DateTime<Utc>,
}

impl SystemHealth {
    /// Worst status across components; Healthy when nothing is registered
    pub fn overall_of<'a>(statuses: impl IntoIterator<Item = &'a HealthStatus>) -> HealthStatus {
        statuses
            .into_iter()
            .copied()
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Threshold::below(45.0, 30.0), 60.0, HealthStatus::Healthy)]
    #[case(Threshold::below(45.0, 30.0), 45.0, HealthStatus::Warning)]
    #[case(Threshold::below(45.0, 30.0), 25.0, HealthStatus::Critical)]
    #[case(Threshold::above(100.0, 200.0), 99.9, HealthStatus::Healthy)]
    #[case(Threshold::above(100.0, 200.0), 150.0, HealthStatus::Warning)]
    #[case(Threshold::above(100.0, 200.0), 250.0, HealthStatus::Critical)]
    fn test_direction_aware_classification(
        #[case] threshold: Threshold,
        #[case] value: f64,
        #[case] expected: HealthStatus,
    ) {
        assert_eq!(threshold.classify(value).0, expected);
    }

    #[test]
    fn test_classify_reports_breached_level() {
        let fps = Threshold::below(45.0, 30.0);
        assert_eq!(fps.classify(25.0), (HealthStatus::Critical, Some(30.0)));
        assert_eq!(fps.classify(40.0), (HealthStatus::Warning, Some(45.0)));
        assert_eq!(fps.classify(50.0), (HealthStatus::Healthy, None));
    }

    #[test]
    fn test_threshold_validation_rejects_inverted_levels() {
        assert!(Threshold::above(100.0, 200.0).validate().is_ok());
        assert!(Threshold::above(200.0, 100.0).validate().is_err());
        assert!(Threshold::below(45.0, 30.0).validate().is_ok());
        assert!(Threshold::below(30.0, 45.0).validate().is_err());
        assert!(Threshold::above(f64::NAN, 1.0).validate().is_err());
    }

    #[test]
    fn test_hysteresis_clearance() {
        let latency = Threshold::above(100.0, 200.0);
        assert!(!latency.clears(185.0, 200.0, 0.1));
        assert!(!latency.clears(180.0, 200.0, 0.1));
        assert!(latency.clears(179.9, 200.0, 0.1));

        let fps = Threshold::below(45.0, 30.0);
        assert!(!fps.clears(32.0, 30.0, 0.1));
        assert!(fps.clears(50.0, 30.0, 0.1));
    }

    #[test]
    fn test_status_ordering() {
        assert!(HealthStatus::Critical > HealthStatus::Unhealthy);
        assert!(HealthStatus::Unhealthy > HealthStatus::Warning);
        assert!(HealthStatus::Warning > HealthStatus::Healthy);
        let statuses = [HealthStatus::Warning, HealthStatus::Critical, HealthStatus::Healthy];
        assert_eq!(SystemHealth::overall_of(&statuses), HealthStatus::Critical);
        assert_eq!(SystemHealth::overall_of(&[]), HealthStatus::Healthy);
    }
}
