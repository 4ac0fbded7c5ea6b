//! Alert registry
//!
//! Alerts are deduplicated on (component, metric, kind): a repeated breach refreshes
//! the open alert instead of creating a new one, and a breach shortly after a
//! resolution reopens it. Threshold alerts resolve only once the value has cleared
//! the breached level by the hysteresis margin.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{duration_ms, ConfigError};
use crate::types::{ComponentId, HealthStatus, ThresholdDirection};

/// Alert severity levels
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    /// Next level up; Critical stays Critical
    pub fn escalate(self) -> Self {
        match self {
            AlertSeverity::Info => AlertSeverity::Warning,
            AlertSeverity::Warning => AlertSeverity::Error,
            AlertSeverity::Error | AlertSeverity::Critical => AlertSeverity::Critical,
        }
    }
}

impl From<HealthStatus> for AlertSeverity {
    fn from(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Healthy => AlertSeverity::Info,
            HealthStatus::Warning => AlertSeverity::Warning,
            HealthStatus::Unhealthy => AlertSeverity::Error,
            HealthStatus::Critical => AlertSeverity::Critical,
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "INFO"),
            AlertSeverity::Warning => write!(f, "WARNING"),
            AlertSeverity::Error => write!(f, "ERROR"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// What produced the alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A metric crossed a warning or critical level
    Threshold,
    /// A metric left its rolling statistical band
    Anomaly,
    /// A recovery strategy exhausted its retries
    Recovery,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Threshold => write!(f, "threshold"),
            AlertKind::Anomaly => write!(f, "anomaly"),
            AlertKind::Recovery => write!(f, "recovery"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub component_id: ComponentId,
    pub metric: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    /// Most recently observed value
    pub value: f64,
    /// Level that was crossed
    pub threshold: f64,
    pub direction: ThresholdDirection,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// Last time the alert was raised, refreshed or escalated
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub acknowledged: bool,
    pub resolved: bool,
    /// Number of times this condition was raised while open
    pub occurrences: u32,
}

impl Alert {
    fn describe(
        kind: AlertKind,
        metric: &str,
        value: f64,
        threshold: f64,
        direction: ThresholdDirection,
    ) -> String {
        match kind {
            AlertKind::Threshold => {
                let side = match direction {
                    ThresholdDirection::Above => "at or above",
                    ThresholdDirection::Below => "at or below",
                };
                format!("{metric} = {value:.2} is {side} threshold {threshold:.2}")
            }
            AlertKind::Anomaly => {
                format!("{metric} = {value:.2} is outside its recent range (bound {threshold:.2})")
            }
            AlertKind::Recovery => format!("{metric} exhausted its recovery attempts"),
        }
    }
}

/// Parameters for raising an alert
#[derive(Debug, Clone)]
pub struct AlertRequest {
    pub component_id: ComponentId,
    pub metric: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub value: f64,
    pub threshold: f64,
    pub direction: ThresholdDirection,
    pub message: Option<String>,
}

impl AlertRequest {
    pub fn threshold(
        component_id: ComponentId,
        metric: impl Into<String>,
        value: f64,
        level: f64,
        direction: ThresholdDirection,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            component_id,
            metric: metric.into(),
            kind: AlertKind::Threshold,
            severity,
            value,
            threshold: level,
            direction,
            message: None,
        }
    }

    pub fn with_kind(mut self, kind: AlertKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Outcome of `raise`
#[derive(Debug, Clone, PartialEq)]
pub enum AlertChange {
    Created(Alert),
    /// An open alert for the same condition was updated
    Refreshed(Alert),
    /// As `Refreshed`, and the new breach raised the severity
    Escalated(Alert),
    /// A recently resolved alert for the same condition was opened again
    Reopened(Alert),
}

impl AlertChange {
    pub fn alert(&self) -> &Alert {
        match self {
            AlertChange::Created(a)
            | AlertChange::Refreshed(a)
            | AlertChange::Escalated(a)
            | AlertChange::Reopened(a) => a,
        }
    }

    pub fn into_alert(self) -> Alert {
        match self {
            AlertChange::Created(a)
            | AlertChange::Refreshed(a)
            | AlertChange::Escalated(a)
            | AlertChange::Reopened(a) => a,
        }
    }

    /// Whether the alert went from closed (or absent) to open
    pub fn opened(&self) -> bool {
        matches!(self, AlertChange::Created(_) | AlertChange::Reopened(_))
    }
}

/// Alert lifecycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Fraction of the breached level a value must clear before resolving
    pub hysteresis_margin: f64,

    /// A breach this soon after resolution reopens the old alert
    #[serde(rename = "dedup_window_ms", with = "duration_ms")]
    pub dedup_window: Duration,

    /// Delay before a newly raised alert is re-checked for resolution
    #[serde(rename = "resolution_check_delay_ms", with = "duration_ms")]
    pub resolution_check_delay: Duration,

    /// Open alerts older than this are resolved automatically
    #[serde(rename = "max_age_ms", with = "duration_ms")]
    pub max_age: Duration,

    /// Resolved alerts are kept this long
    #[serde(rename = "retention_ms", with = "duration_ms")]
    pub retention: Duration,

    /// Upper bound on retained resolved alerts
    pub capacity: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            hysteresis_margin: 0.1,
            dedup_window: Duration::from_secs(30),
            resolution_check_delay: Duration::from_secs(60),
            max_age: Duration::from_secs(3600),
            retention: Duration::from_secs(24 * 3600),
            capacity: 1000,
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.hysteresis_margin) {
            return Err(ConfigError::InvalidSetting {
                field: "alerts.hysteresis_margin",
                reason: format!("{} is outside [0, 1)", self.hysteresis_margin),
            });
        }
        if self.max_age.is_zero() {
            return Err(ConfigError::InvalidSetting {
                field: "alerts.max_age_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AlertKey {
    component_id: ComponentId,
    metric: String,
    kind: AlertKind,
}

impl AlertKey {
    fn of(alert: &Alert) -> Self {
        Self {
            component_id: alert.component_id.clone(),
            metric: alert.metric.clone(),
            kind: alert.kind,
        }
    }
}

#[derive(Debug, Default)]
struct AlertStore {
    active: HashMap<AlertKey, Alert>,
    /// Newest at the back
    resolved: VecDeque<Alert>,
}

impl AlertStore {
    fn key_of(&self, id: Uuid) -> Option<AlertKey> {
        self.active
            .iter()
            .find(|(_, alert)| alert.id == id)
            .map(|(key, _)| key.clone())
    }

    fn close(&mut self, key: &AlertKey, now: DateTime<Utc>, reason: &str) -> Option<Alert> {
        let mut alert = self.active.remove(key)?;
        alert.resolved = true;
        alert.resolved_at = Some(now);
        info!(
            alert_id = %alert.id,
            component = %alert.component_id,
            metric = %alert.metric,
            kind = %alert.kind,
            reason,
            "Alert resolved"
        );
        self.resolved.push_back(alert.clone());
        Some(alert)
    }
}

/// Thread-safe registry of open and recently resolved alerts
#[derive(Debug, Default)]
pub struct AlertRegistry {
    config: AlertConfig,
    store: Mutex<AlertStore>,
}

impl AlertRegistry {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            store: Mutex::new(AlertStore::default()),
        }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Raise a threshold alert on the "above" side
    pub fn raise(
        &self,
        component_id: &ComponentId,
        metric: &str,
        value: f64,
        threshold: f64,
        severity: AlertSeverity,
    ) -> AlertChange {
        self.raise_with(AlertRequest::threshold(
            component_id.clone(),
            metric,
            value,
            threshold,
            ThresholdDirection::Above,
            severity,
        ))
    }

    pub fn raise_with(&self, request: AlertRequest) -> AlertChange {
        self.raise_at(request, Utc::now())
    }

    /// Raise, refresh or reopen the alert for the request's condition.
    ///
    /// A refresh never lowers severity; a higher severity replaces the severity and
    /// crossed level.
    pub fn raise_at(&self, request: AlertRequest, now: DateTime<Utc>) -> AlertChange {
        let key = AlertKey {
            component_id: request.component_id.clone(),
            metric: request.metric.clone(),
            kind: request.kind,
        };
        let mut store = self.store.lock();

        if let Some(alert) = store.active.get_mut(&key) {
            alert.value = request.value;
            alert.timestamp = now;
            alert.occurrences = alert.occurrences.saturating_add(1);
            let escalated = request.severity > alert.severity;
            if escalated {
                alert.severity = request.severity;
                alert.threshold = request.threshold;
                alert.acknowledged = false;
            }
            let message = match &request.message {
                Some(message) => message.clone(),
                None => Alert::describe(
                    alert.kind,
                    &alert.metric,
                    alert.value,
                    alert.threshold,
                    alert.direction,
                ),
            };
            alert.message = message;
            debug!(
                alert_id = %alert.id,
                occurrences = alert.occurrences,
                severity = %alert.severity,
                escalated,
                "Refreshed open alert"
            );
            return if escalated {
                AlertChange::Escalated(alert.clone())
            } else {
                AlertChange::Refreshed(alert.clone())
            };
        }

        let dedup_window = ChronoDuration::from_std(self.config.dedup_window)
            .unwrap_or_else(|_| ChronoDuration::zero());
        let reopen_index = store.resolved.iter().rposition(|alert| {
            AlertKey::of(alert) == key
                && alert
                    .resolved_at
                    .map(|at| now.signed_duration_since(at) <= dedup_window)
                    .unwrap_or(false)
        });

        let message = request.message.clone().unwrap_or_else(|| {
            Alert::describe(
                request.kind,
                &request.metric,
                request.value,
                request.threshold,
                request.direction,
            )
        });

        if let Some(index) = reopen_index {
            if let Some(mut alert) = store.resolved.remove(index) {
                alert.resolved = false;
                alert.resolved_at = None;
                alert.acknowledged = false;
                alert.severity = request.severity;
                alert.value = request.value;
                alert.threshold = request.threshold;
                alert.direction = request.direction;
                alert.message = message;
                alert.timestamp = now;
                alert.occurrences = alert.occurrences.saturating_add(1);
                warn!(
                    alert_id = %alert.id,
                    component = %alert.component_id,
                    metric = %alert.metric,
                    severity = %alert.severity,
                    "Alert reopened"
                );
                store.active.insert(key, alert.clone());
                return AlertChange::Reopened(alert);
            }
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            component_id: request.component_id,
            metric: request.metric,
            kind: request.kind,
            severity: request.severity,
            value: request.value,
            threshold: request.threshold,
            direction: request.direction,
            message,
            created_at: now,
            timestamp: now,
            resolved_at: None,
            acknowledged: false,
            resolved: false,
            occurrences: 1,
        };
        warn!(
            alert_id = %alert.id,
            component = %alert.component_id,
            metric = %alert.metric,
            kind = %alert.kind,
            severity = %alert.severity,
            value = alert.value,
            threshold = alert.threshold,
            "Alert raised"
        );
        store.active.insert(key, alert.clone());
        AlertChange::Created(alert)
    }

    /// Mark an open alert as seen. Returns false for unknown or resolved ids.
    pub fn acknowledge(&self, id: Uuid) -> bool {
        let mut store = self.store.lock();
        match store.active.values_mut().find(|alert| alert.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                info!(alert_id = %id, "Alert acknowledged");
                true
            }
            None => false,
        }
    }

    /// Open alerts, most severe first, then oldest first
    pub fn list_active(&self) -> Vec<Alert> {
        let store = self.store.lock();
        let mut alerts: Vec<Alert> = store.active.values().cloned().collect();
        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        alerts
    }

    pub fn active_for(&self, component_id: &ComponentId) -> Vec<Alert> {
        self.list_active()
            .into_iter()
            .filter(|alert| &alert.component_id == component_id)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.store.lock().active.len()
    }

    pub fn get(&self, id: Uuid) -> Option<Alert> {
        let store = self.store.lock();
        store
            .active
            .values()
            .find(|alert| alert.id == id)
            .or_else(|| store.resolved.iter().find(|alert| alert.id == id))
            .cloned()
    }

    /// Resolved alerts still retained, newest first
    pub fn history(&self) -> Vec<Alert> {
        self.store.lock().resolved.iter().rev().cloned().collect()
    }

    pub fn resolve(&self, id: Uuid) -> Option<Alert> {
        let mut store = self.store.lock();
        let key = store.key_of(id)?;
        store.close(&key, Utc::now(), "resolved explicitly")
    }

    pub fn resolve_key(
        &self,
        component_id: &ComponentId,
        metric: &str,
        kind: AlertKind,
    ) -> Option<Alert> {
        let key = AlertKey {
            component_id: component_id.clone(),
            metric: metric.to_string(),
            kind,
        };
        self.store.lock().close(&key, Utc::now(), "condition no longer present")
    }

    /// Resolve the open threshold alert for `metric` if `value` clears its level
    pub fn resolve_cleared(
        &self,
        component_id: &ComponentId,
        metric: &str,
        value: f64,
    ) -> Option<Alert> {
        let key = AlertKey {
            component_id: component_id.clone(),
            metric: metric.to_string(),
            kind: AlertKind::Threshold,
        };
        let mut store = self.store.lock();
        let alert = store.active.get(&key)?;
        if alert
            .direction
            .clears(value, alert.threshold, self.config.hysteresis_margin)
        {
            store.close(&key, Utc::now(), "value cleared threshold")
        } else {
            None
        }
    }

    /// Delayed re-check of one alert against the latest value of its metric
    pub fn check_resolution(&self, id: Uuid, latest: Option<f64>) -> Option<Alert> {
        let mut store = self.store.lock();
        let key = store.key_of(id)?;
        let alert = store.active.get(&key)?;
        if alert.kind != AlertKind::Threshold {
            return None;
        }
        let value = latest?;
        if alert
            .direction
            .clears(value, alert.threshold, self.config.hysteresis_margin)
        {
            store.close(&key, Utc::now(), "cleared at delayed check")
        } else {
            None
        }
    }

    pub fn try_auto_resolve<F>(&self, latest: F) -> Vec<Alert>
    where
        F: Fn(&ComponentId, &str) -> Option<f64>,
    {
        self.try_auto_resolve_at(Utc::now(), latest)
    }

    /// Resolve alerts past their maximum age and threshold alerts whose latest value
    /// has cleared. `latest` is called with the registry locked and must not call
    /// back into it.
    pub fn try_auto_resolve_at<F>(&self, now: DateTime<Utc>, latest: F) -> Vec<Alert>
    where
        F: Fn(&ComponentId, &str) -> Option<f64>,
    {
        let max_age =
            ChronoDuration::from_std(self.config.max_age).unwrap_or_else(|_| ChronoDuration::weeks(52 * 100));
        let margin = self.config.hysteresis_margin;
        let mut store = self.store.lock();

        let mut expired = Vec::new();
        let mut cleared = Vec::new();
        for (key, alert) in &store.active {
            if now.signed_duration_since(alert.created_at) > max_age {
                expired.push(key.clone());
            } else if alert.kind == AlertKind::Threshold {
                if let Some(value) = latest(&alert.component_id, &alert.metric) {
                    if alert.direction.clears(value, alert.threshold, margin) {
                        cleared.push(key.clone());
                    }
                }
            }
        }

        let mut resolved = Vec::new();
        for key in expired {
            resolved.extend(store.close(&key, now, "exceeded maximum age"));
        }
        for key in cleared {
            resolved.extend(store.close(&key, now, "value cleared threshold"));
        }
        resolved
    }

    /// Raise severity one step on the component's open alerts for `metrics`
    /// (all of them when `metrics` is empty)
    pub fn escalate(&self, component_id: &ComponentId, metrics: &[String]) -> Vec<Alert> {
        let now = Utc::now();
        let mut store = self.store.lock();
        let mut escalated = Vec::new();
        for alert in store.active.values_mut() {
            let selected = &alert.component_id == component_id
                && (metrics.is_empty() || metrics.contains(&alert.metric));
            if !selected || alert.severity == AlertSeverity::Critical {
                continue;
            }
            alert.severity = alert.severity.escalate();
            alert.timestamp = now;
            alert.acknowledged = false;
            warn!(
                alert_id = %alert.id,
                component = %alert.component_id,
                metric = %alert.metric,
                severity = %alert.severity,
                "Alert escalated"
            );
            escalated.push(alert.clone());
        }
        escalated
    }

    /// Resolve every open alert of the component for `metrics`
    pub fn resolve_for(&self, component_id: &ComponentId, metrics: &[String]) -> Vec<Alert> {
        let now = Utc::now();
        let mut store = self.store.lock();
        let keys: Vec<AlertKey> = store
            .active
            .keys()
            .filter(|key| &key.component_id == component_id && metrics.contains(&key.metric))
            .cloned()
            .collect();
        keys.iter()
            .filter_map(|key| store.close(key, now, "component recovered"))
            .collect()
    }

    /// Drop resolved alerts past retention and beyond capacity
    pub fn purge(&self, now: DateTime<Utc>) -> usize {
        let retention = ChronoDuration::from_std(self.config.retention)
            .unwrap_or_else(|_| ChronoDuration::weeks(52 * 100));
        let mut store = self.store.lock();
        let before = store.resolved.len();

        store.resolved.retain(|alert| {
            alert
                .resolved_at
                .map(|at| now.signed_duration_since(at) <= retention)
                .unwrap_or(true)
        });
        while store.resolved.len() > self.config.capacity {
            store.resolved.pop_front();
        }

        let purged = before - store.resolved.len();
        if purged > 0 {
            debug!(purged, "Purged resolved alerts");
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> ComponentId {
        ComponentId::from("renderer")
    }

    fn fps_alert(value: f64, level: f64, severity: AlertSeverity) -> AlertRequest {
        AlertRequest::threshold(
            renderer(),
            "fps",
            value,
            level,
            ThresholdDirection::Below,
            severity,
        )
    }

    #[test]
    fn test_severity_escalation_and_mapping() {
        assert_eq!(AlertSeverity::Info.escalate(), AlertSeverity::Warning);
        assert_eq!(AlertSeverity::Error.escalate(), AlertSeverity::Critical);
        assert_eq!(AlertSeverity::Critical.escalate(), AlertSeverity::Critical);
        assert_eq!(AlertSeverity::from(HealthStatus::Unhealthy), AlertSeverity::Error);
        assert!(AlertSeverity::Critical > AlertSeverity::Warning);
    }

    #[test]
    fn test_repeated_raise_is_deduplicated() {
        let registry = AlertRegistry::default();

        let first = registry.raise_with(fps_alert(25.0, 30.0, AlertSeverity::Critical));
        assert!(matches!(first, AlertChange::Created(_)));
        let second = registry.raise_with(fps_alert(24.0, 30.0, AlertSeverity::Critical));
        assert!(matches!(second, AlertChange::Refreshed(_)));

        let active = registry.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, first.alert().id);
        assert_eq!(active[0].occurrences, 2);
        assert_eq!(active[0].value, 24.0);
    }

    #[test]
    fn test_refresh_only_escalates_severity() {
        let registry = AlertRegistry::default();
        registry.raise_with(fps_alert(40.0, 45.0, AlertSeverity::Warning));
        let escalated = registry.raise_with(fps_alert(25.0, 30.0, AlertSeverity::Critical));
        assert!(matches!(escalated, AlertChange::Escalated(_)));
        assert_eq!(escalated.alert().severity, AlertSeverity::Critical);
        assert_eq!(escalated.alert().threshold, 30.0);

        let refreshed = registry.raise_with(fps_alert(40.0, 45.0, AlertSeverity::Warning));
        assert!(matches!(refreshed, AlertChange::Refreshed(_)));
        assert_eq!(refreshed.alert().severity, AlertSeverity::Critical);
        assert_eq!(refreshed.alert().threshold, 30.0);
    }

    #[test]
    fn test_different_kinds_do_not_collide() {
        let registry = AlertRegistry::default();
        registry.raise_with(fps_alert(25.0, 30.0, AlertSeverity::Critical));
        registry.raise_with(
            fps_alert(25.0, 52.0, AlertSeverity::Warning).with_kind(AlertKind::Anomaly),
        );
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn test_hysteresis_resolution() {
        let registry = AlertRegistry::default();
        registry.raise_with(fps_alert(25.0, 30.0, AlertSeverity::Critical));

        // 32 is within 10% of 30
        assert!(registry.resolve_cleared(&renderer(), "fps", 32.0).is_none());
        assert_eq!(registry.active_count(), 1);

        let resolved = registry
            .resolve_cleared(&renderer(), "fps", 50.0)
            .expect("should resolve");
        assert!(resolved.resolved);
        assert!(resolved.resolved_at.is_some());
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.history().len(), 1);
    }

    #[test]
    fn test_breach_within_dedup_window_reopens() {
        let registry = AlertRegistry::default();
        let created = registry.raise_with(fps_alert(25.0, 30.0, AlertSeverity::Critical));
        registry.resolve_cleared(&renderer(), "fps", 50.0);

        let reopened = registry.raise_with(fps_alert(28.0, 30.0, AlertSeverity::Critical));
        assert!(matches!(reopened, AlertChange::Reopened(_)));
        assert!(reopened.opened());
        assert_eq!(reopened.alert().id, created.alert().id);
        assert!(registry.history().is_empty());
    }

    #[test]
    fn test_breach_after_dedup_window_creates_new_alert() {
        let registry = AlertRegistry::new(AlertConfig {
            dedup_window: Duration::from_secs(5),
            ..AlertConfig::default()
        });
        let created = registry.raise_with(fps_alert(25.0, 30.0, AlertSeverity::Critical));
        registry.resolve_cleared(&renderer(), "fps", 50.0);

        let later = Utc::now() + ChronoDuration::seconds(10);
        let fresh = registry.raise_at(fps_alert(25.0, 30.0, AlertSeverity::Critical), later);
        assert!(matches!(fresh, AlertChange::Created(_)));
        assert_ne!(fresh.alert().id, created.alert().id);
    }

    #[test]
    fn test_acknowledge() {
        let registry = AlertRegistry::default();
        let alert = registry
            .raise(&renderer(), "frame_time_ms", 40.0, 33.0, AlertSeverity::Critical)
            .into_alert();

        assert!(registry.acknowledge(alert.id));
        assert!(registry.list_active()[0].acknowledged);
        assert!(!registry.acknowledge(Uuid::new_v4()));
    }

    #[test]
    fn test_auto_resolve_by_value_and_age() {
        let registry = AlertRegistry::new(AlertConfig {
            max_age: Duration::from_secs(60),
            ..AlertConfig::default()
        });
        registry.raise_with(fps_alert(25.0, 30.0, AlertSeverity::Critical));
        registry.raise(&renderer(), "latency_ms", 500.0, 400.0, AlertSeverity::Critical);

        let resolved = registry.try_auto_resolve(|_, metric| match metric {
            "fps" => Some(55.0),
            "latency_ms" => Some(450.0),
            _ => None,
        });
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].metric, "fps");

        let later = Utc::now() + ChronoDuration::seconds(120);
        let expired = registry.try_auto_resolve_at(later, |_, _| None);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].metric, "latency_ms");
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_delayed_resolution_check() {
        let registry = AlertRegistry::default();
        let alert = registry
            .raise_with(fps_alert(25.0, 30.0, AlertSeverity::Critical))
            .into_alert();

        assert!(registry.check_resolution(alert.id, Some(31.0)).is_none());
        assert!(registry.check_resolution(alert.id, None).is_none());
        assert!(registry.check_resolution(alert.id, Some(40.0)).is_some());
        assert!(registry.check_resolution(alert.id, Some(40.0)).is_none());
    }

    #[test]
    fn test_escalate_and_resolve_for() {
        let registry = AlertRegistry::default();
        registry.raise_with(fps_alert(40.0, 45.0, AlertSeverity::Warning));
        registry.raise(&renderer(), "gpu", 90.0, 85.0, AlertSeverity::Warning);

        let escalated = registry.escalate(&renderer(), &["fps".to_string()]);
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].severity, AlertSeverity::Error);

        let resolved = registry.resolve_for(&renderer(), &["fps".to_string()]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_purge_applies_retention_and_capacity() {
        let registry = AlertRegistry::new(AlertConfig {
            retention: Duration::from_secs(60),
            capacity: 2,
            ..AlertConfig::default()
        });
        for metric in ["a", "b", "c"] {
            let alert = registry
                .raise(&renderer(), metric, 10.0, 5.0, AlertSeverity::Warning)
                .into_alert();
            registry.resolve(alert.id);
        }
        assert_eq!(registry.purge(Utc::now()), 1);
        assert_eq!(registry.history().len(), 2);

        assert_eq!(registry.purge(Utc::now() + ChronoDuration::seconds(120)), 2);
        assert!(registry.history().is_empty());
    }
}
