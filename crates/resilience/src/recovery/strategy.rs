//! Recovery strategy definitions and the strategy catalog.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{duration_ms, ConfigError};
use crate::health::MetricHistory;
use crate::types::{ComponentId, ThresholdDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = "gt")]
    GreaterThan,
    #[serde(rename = "ge")]
    GreaterOrEqual,
    #[serde(rename = "lt")]
    LessThan,
    #[serde(rename = "le")]
    LessOrEqual,
    #[serde(rename = "eq")]
    Equal,
}

impl ComparisonOperator {
    pub fn evaluate(self, value: f64, threshold: f64) -> bool {
        match self {
            ComparisonOperator::GreaterThan => value > threshold,
            ComparisonOperator::GreaterOrEqual => value >= threshold,
            ComparisonOperator::LessThan => value < threshold,
            ComparisonOperator::LessOrEqual => value <= threshold,
            ComparisonOperator::Equal => (value - threshold).abs() <= f64::EPSILON,
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::GreaterOrEqual => ">=",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::LessOrEqual => "<=",
            ComparisonOperator::Equal => "==",
        };
        f.write_str(symbol)
    }
}

/// A metric comparison that must hold continuously for `sustained`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub metric: String,
    pub operator: ComparisonOperator,
    pub threshold: f64,
    #[serde(rename = "sustained_ms", with = "duration_ms", default)]
    pub sustained: Duration,
}

impl TriggerCondition {
    pub fn new(
        metric: impl Into<String>,
        operator: ComparisonOperator,
        threshold: f64,
        sustained: Duration,
    ) -> Self {
        Self {
            metric: metric.into(),
            operator,
            threshold,
            sustained,
        }
    }

    pub fn is_met(&self, history: &MetricHistory) -> bool {
        history.holds_for(&self.metric, self.sustained, |value| {
            self.operator.evaluate(value, self.threshold)
        })
    }
}

/// Post-recovery target for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriterion {
    pub metric: String,
    pub target: f64,
    #[serde(default)]
    pub tolerance: f64,
}

impl SuccessCriterion {
    pub fn new(metric: impl Into<String>, target: f64, tolerance: f64) -> Self {
        Self {
            metric: metric.into(),
            target,
            tolerance,
        }
    }

    /// With a known bad direction the target is one-sided (fps of 60 satisfies a
    /// target of 45); without one the value must be within tolerance of the target.
    pub fn is_satisfied(&self, value: f64, direction: Option<ThresholdDirection>) -> bool {
        match direction {
            Some(ThresholdDirection::Below) => value >= self.target - self.tolerance,
            Some(ThresholdDirection::Above) => value <= self.target + self.tolerance,
            None => (value - self.target).abs() <= self.tolerance,
        }
    }
}

/// Action types; anything else is `Custom` and dispatched by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Retry,
    Fallback,
    Restart,
    Isolate,
    Scale,
    ClearCache,
    ReduceQuality,
    Notify,
    Custom(String),
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Retry => write!(f, "retry"),
            ActionKind::Fallback => write!(f, "fallback"),
            ActionKind::Restart => write!(f, "restart"),
            ActionKind::Isolate => write!(f, "isolate"),
            ActionKind::Scale => write!(f, "scale"),
            ActionKind::ClearCache => write!(f, "clear_cache"),
            ActionKind::ReduceQuality => write!(f, "reduce_quality"),
            ActionKind::Notify => write!(f, "notify"),
            ActionKind::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

fn default_action_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(
        rename = "timeout_ms",
        with = "duration_ms",
        default = "default_action_timeout"
    )]
    pub timeout: Duration,
    #[serde(default)]
    pub rollback_on_failure: bool,
    /// A critical action that fails without a successful rollback fails the attempt
    #[serde(default = "default_true")]
    pub critical: bool,
}

impl RecoveryAction {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            parameters: HashMap::new(),
            timeout: default_action_timeout(),
            rollback_on_failure: false,
            critical: true,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn rollback_on_failure(mut self, enabled: bool) -> Self {
        self.rollback_on_failure = enabled;
        self
    }

    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }
}

fn default_priority() -> u32 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_cooldown() -> Duration {
    Duration::from_secs(60)
}

/// Declarative remediation: when every trigger condition holds, run the actions in
/// order, then verify the success criteria
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    pub id: String,
    pub name: String,
    /// Restricts the strategy to one component; unscoped strategies apply to any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<ComponentId>,
    pub trigger_conditions: Vec<TriggerCondition>,
    pub actions: Vec<RecoveryAction>,
    /// Lower runs first
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Failed attempts before the strategy is exhausted
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(rename = "cooldown_ms", with = "duration_ms", default = "default_cooldown")]
    pub cooldown: Duration,
    #[serde(default)]
    pub success_criteria: Vec<SuccessCriterion>,
}

impl RecoveryStrategy {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            component: None,
            trigger_conditions: Vec::new(),
            actions: Vec::new(),
            priority: default_priority(),
            max_retries: default_max_retries(),
            cooldown: default_cooldown(),
            success_criteria: Vec::new(),
        }
    }

    pub fn for_component(mut self, component: impl Into<ComponentId>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn trigger(mut self, condition: TriggerCondition) -> Self {
        self.trigger_conditions.push(condition);
        self
    }

    pub fn action(mut self, action: RecoveryAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn success(mut self, criterion: SuccessCriterion) -> Self {
        self.success_criteria.push(criterion);
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidStrategy {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.trigger_conditions.is_empty() {
            return Err(invalid("at least one trigger condition is required"));
        }
        if self.actions.is_empty() {
            return Err(invalid("at least one action is required"));
        }
        if self.max_retries == 0 {
            return Err(invalid("max_retries must be at least 1"));
        }
        if self
            .trigger_conditions
            .iter()
            .any(|c| c.metric.trim().is_empty() || !c.threshold.is_finite())
        {
            return Err(invalid("trigger conditions need a metric and a finite threshold"));
        }
        if self.actions.iter().any(|a| a.timeout.is_zero()) {
            return Err(invalid("action timeouts must be greater than zero"));
        }
        if self
            .success_criteria
            .iter()
            .any(|c| !c.target.is_finite() || !(c.tolerance.is_finite() && c.tolerance >= 0.0))
        {
            return Err(invalid("success criteria need a finite target and a non-negative tolerance"));
        }
        Ok(())
    }

    pub fn applies_to(&self, component: &ComponentId) -> bool {
        self.component.as_ref().map_or(true, |c| c == component)
    }

    /// All trigger conditions hold over the component's history
    pub fn is_triggered(&self, history: &MetricHistory) -> bool {
        !self.trigger_conditions.is_empty()
            && self.trigger_conditions.iter().all(|c| c.is_met(history))
    }

    /// Metrics named by triggers and success criteria, without duplicates
    pub fn referenced_metrics(&self) -> Vec<String> {
        let mut metrics: Vec<String> = Vec::new();
        let names = self
            .trigger_conditions
            .iter()
            .map(|c| &c.metric)
            .chain(self.success_criteria.iter().map(|c| &c.metric));
        for name in names {
            if !metrics.contains(name) {
                metrics.push(name.clone());
            }
        }
        metrics
    }
}

#[derive(Debug)]
struct CatalogEntry {
    /// Registration order, the tie-breaker for equal priorities
    sequence: u64,
    strategy: Arc<RecoveryStrategy>,
}

/// Registered strategies, queried in priority order
#[derive(Debug, Default)]
pub struct StrategyCatalog {
    entries: RwLock<Vec<CatalogEntry>>,
    next_sequence: AtomicU64,
}

impl StrategyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register; an existing strategy with the same id is replaced in
    /// place. Returns true when a strategy was replaced.
    pub fn register(&self, strategy: RecoveryStrategy) -> Result<bool, ConfigError> {
        strategy.validate()?;
        let mut entries = self.entries.write();

        if let Some(entry) = entries.iter_mut().find(|e| e.strategy.id == strategy.id) {
            info!(strategy_id = %strategy.id, "Replacing recovery strategy");
            entry.strategy = Arc::new(strategy);
            return Ok(true);
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        info!(
            strategy_id = %strategy.id,
            priority = strategy.priority,
            actions = strategy.actions.len(),
            "Registered recovery strategy"
        );
        entries.push(CatalogEntry {
            sequence,
            strategy: Arc::new(strategy),
        });
        Ok(false)
    }

    pub fn get(&self, id: &str) -> Option<Arc<RecoveryStrategy>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.strategy.id == id)
            .map(|e| e.strategy.clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<RecoveryStrategy>> {
        let mut entries = self.entries.write();
        let index = entries.iter().position(|e| e.strategy.id == id)?;
        Some(entries.remove(index).strategy)
    }

    /// All strategies in execution order
    pub fn list(&self) -> Vec<Arc<RecoveryStrategy>> {
        let entries = self.entries.read();
        let mut ordered: Vec<&CatalogEntry> = entries.iter().collect();
        ordered.sort_by_key(|e| (e.strategy.priority, e.sequence));
        ordered.into_iter().map(|e| e.strategy.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Strategies scoped to `component` whose triggers all hold, in execution order
    pub fn find_applicable(
        &self,
        component: &ComponentId,
        history: &MetricHistory,
    ) -> Vec<Arc<RecoveryStrategy>> {
        let applicable: Vec<Arc<RecoveryStrategy>> = self
            .list()
            .into_iter()
            .filter(|s| s.applies_to(component) && s.is_triggered(history))
            .collect();
        if !applicable.is_empty() {
            debug!(
                component = %component,
                strategies = ?applicable.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
                "Applicable recovery strategies"
            );
        }
        applicable
    }
}
