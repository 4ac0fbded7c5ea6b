//! Recovery executor
//!
//! Runs one strategy at a time per strategy id: guards on exhaustion, concurrency
//! and cooldown, executes the actions in order under their timeouts, verifies the
//! success criteria and then settles breakers and alerts for the component.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OperationTimer;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::actions::{ActionContext, ActionError, ActionHandler, ActionRegistry};
use super::strategy::{ActionKind, RecoveryAction, RecoveryStrategy};
use crate::alerts::{AlertKind, AlertRegistry, AlertRequest, AlertSeverity};
use crate::config::RecoveryConfig;
use crate::events::{EventPublisher, HealthEvent};
use crate::reliability::{spawn_with_timeout, BreakerRegistry};
use crate::types::{ComponentId, ThresholdDirection};

/// Where the executor reads metrics from
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Latest recorded values, used as action context
    fn latest_metrics(&self, component: &ComponentId) -> HashMap<String, f64>;

    /// Fresh values for success verification; may run the component's health check
    async fn verification_metrics(&self, component: &ComponentId) -> HashMap<String, f64>;

    /// Bad side of the metric's threshold, if one is registered
    fn direction_of(&self, component: &ComponentId, metric: &str) -> Option<ThresholdDirection>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub index: usize,
    pub kind: ActionKind,
    pub succeeded: bool,
    pub critical: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub rolled_back: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_error: Option<String>,
    pub duration_ms: u64,
}

impl ActionResult {
    /// Failed and not undone
    pub fn is_unrecovered_failure(&self) -> bool {
        !self.succeeded && !self.rolled_back
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriterionResult {
    pub metric: String,
    pub target: f64,
    pub tolerance: f64,
    pub observed: Option<f64>,
    pub satisfied: bool,
}

/// Record of one execution of a strategy
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryAttempt {
    pub strategy_id: String,
    pub component_id: ComponentId,
    /// 1-based position within the current retry budget
    pub attempt_number: u32,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: AttemptStatus,
    pub action_results: Vec<ActionResult>,
    pub criteria_results: Vec<CriterionResult>,
}

/// Why `execute` did not run the strategy
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    Exhausted,
    AlreadyRunning,
    CoolingDown { remaining_ms: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryResult {
    pub strategy_id: String,
    pub component_id: ComponentId,
    /// Whether any action ran
    pub executed: bool,
    pub success: bool,
    /// The strategy has used up its retries and will not run again until reset
    pub exhausted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<RecoveryAttempt>,
}

impl RecoveryResult {
    fn skipped(strategy_id: &str, component_id: &ComponentId, reason: SkipReason) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            component_id: component_id.clone(),
            executed: false,
            success: false,
            exhausted: reason == SkipReason::Exhausted,
            skipped: Some(reason),
            attempt: None,
        }
    }
}

/// Per-strategy bookkeeping
#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyLedger {
    pub running: bool,
    /// Consecutive failed attempts since the last success or reset
    pub failed_attempts: u32,
    pub total_attempts: u32,
    pub exhausted: bool,
    #[serde(skip)]
    last_started: Option<Instant>,
}

/// Clears the running flag if an attempt is abandoned mid-flight
struct RunningGuard<'a> {
    ledgers: &'a Mutex<HashMap<String, StrategyLedger>>,
    strategy_id: &'a str,
    armed: bool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Some(ledger) = self.ledgers.lock().get_mut(self.strategy_id) {
                ledger.running = false;
            }
            warn!(strategy_id = self.strategy_id, "Recovery attempt abandoned");
        }
    }
}

pub struct RecoveryExecutor {
    actions: Arc<ActionRegistry>,
    breakers: Arc<BreakerRegistry>,
    alerts: Arc<AlertRegistry>,
    events: EventPublisher,
    config: RecoveryConfig,
    ledgers: Mutex<HashMap<String, StrategyLedger>>,
    history: Mutex<VecDeque<RecoveryAttempt>>,
}

impl RecoveryExecutor {
    pub fn new(
        actions: Arc<ActionRegistry>,
        breakers: Arc<BreakerRegistry>,
        alerts: Arc<AlertRegistry>,
        events: EventPublisher,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            actions,
            breakers,
            alerts,
            events,
            config,
            ledgers: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Run `strategy` for `component` unless it is exhausted, already running or
    /// cooling down. Concurrent calls for the same strategy run at most one attempt.
    pub async fn execute(
        &self,
        strategy: &RecoveryStrategy,
        component: &ComponentId,
        source: &dyn MetricSource,
    ) -> RecoveryResult {
        let attempt_number = match self.begin(strategy) {
            Ok(number) => number,
            Err(reason) => {
                debug!(
                    strategy_id = %strategy.id,
                    component = %component,
                    reason = ?reason,
                    "Skipping recovery attempt"
                );
                return RecoveryResult::skipped(&strategy.id, component, reason);
            }
        };
        let mut guard = RunningGuard {
            ledgers: &self.ledgers,
            strategy_id: &strategy.id,
            armed: true,
        };

        info!(
            strategy_id = %strategy.id,
            component = %component,
            attempt_number,
            max_retries = strategy.max_retries,
            "Starting recovery attempt"
        );
        self.events.publish(HealthEvent::RecoveryStarted {
            strategy_id: strategy.id.clone(),
            component_id: component.clone(),
            attempt_number,
        });

        let mut attempt = RecoveryAttempt {
            strategy_id: strategy.id.clone(),
            component_id: component.clone(),
            attempt_number,
            start_time: Utc::now(),
            finished_at: None,
            status: AttemptStatus::Running,
            action_results: Vec::with_capacity(strategy.actions.len()),
            criteria_results: Vec::new(),
        };

        let metrics = source.latest_metrics(component);
        let mut fatal = false;
        for (index, action) in strategy.actions.iter().enumerate() {
            let ctx = ActionContext {
                component_id: component.clone(),
                strategy_id: strategy.id.clone(),
                attempt_number,
                action_index: index,
                kind: action.kind.clone(),
                parameters: action.parameters.clone(),
                metrics: metrics.clone(),
            };
            let result = self.run_action(action, ctx).await;
            // Later actions still run after a failure or a failed rollback
            fatal |= action.critical && result.is_unrecovered_failure();
            attempt.action_results.push(result);
        }

        let success = if fatal {
            false
        } else {
            attempt.criteria_results = self.verify(strategy, component, source).await;
            attempt.criteria_results.iter().all(|c| c.satisfied)
        };

        attempt.status = if success {
            AttemptStatus::Succeeded
        } else {
            AttemptStatus::Failed
        };
        attempt.finished_at = Some(Utc::now());

        let exhausted = self.finish(strategy, success);
        guard.armed = false;
        drop(guard);

        self.settle(strategy, component, success, exhausted);
        self.record(attempt.clone());

        let result = RecoveryResult {
            strategy_id: strategy.id.clone(),
            component_id: component.clone(),
            executed: true,
            success,
            exhausted,
            skipped: None,
            attempt: Some(attempt),
        };
        self.events.publish(HealthEvent::RecoveryFinished {
            result: result.clone(),
        });
        result
    }

    fn begin(&self, strategy: &RecoveryStrategy) -> Result<u32, SkipReason> {
        let mut ledgers = self.ledgers.lock();
        let ledger = ledgers.entry(strategy.id.clone()).or_default();

        if ledger.exhausted {
            return Err(SkipReason::Exhausted);
        }
        if ledger.running {
            return Err(SkipReason::AlreadyRunning);
        }
        let now = Instant::now();
        if let Some(started) = ledger.last_started {
            let elapsed = now.duration_since(started);
            if elapsed < strategy.cooldown {
                let remaining = strategy.cooldown - elapsed;
                return Err(SkipReason::CoolingDown {
                    remaining_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }

        ledger.running = true;
        ledger.last_started = Some(now);
        ledger.total_attempts = ledger.total_attempts.saturating_add(1);
        Ok(ledger.failed_attempts.saturating_add(1))
    }

    /// Returns whether the strategy is now exhausted
    fn finish(&self, strategy: &RecoveryStrategy, success: bool) -> bool {
        let mut ledgers = self.ledgers.lock();
        let ledger = ledgers.entry(strategy.id.clone()).or_default();
        ledger.running = false;
        if success {
            ledger.failed_attempts = 0;
        } else {
            ledger.failed_attempts = ledger.failed_attempts.saturating_add(1);
            if ledger.failed_attempts >= strategy.max_retries {
                ledger.exhausted = true;
            }
        }
        ledger.exhausted
    }

    async fn run_action(&self, action: &RecoveryAction, ctx: ActionContext) -> ActionResult {
        let started = Instant::now();
        let mut timer = OperationTimer::new(format!("recovery.action.{}", action.kind));
        timer.add_field("strategy_id", &ctx.strategy_id);
        timer.add_field("component", ctx.component_id.as_str());
        timer.add_field("action_index", ctx.action_index);

        let mut result = ActionResult {
            index: ctx.action_index,
            kind: action.kind.clone(),
            succeeded: false,
            critical: action.critical,
            error: None,
            rolled_back: false,
            rollback_error: None,
            duration_ms: 0,
        };

        let Some(handler) = self.actions.get(&action.kind) else {
            let outcome: Result<(), ActionError> = Err(ActionError::NoHandler(action.kind.clone()));
            timer.finish_with_result(&outcome);
            result.error = outcome.err().map(|e| e.to_string());
            return result;
        };

        let outcome = invoke(handler.clone(), ctx.clone(), action.timeout, Phase::Execute).await;
        timer.finish_with_result(&outcome);

        match outcome {
            Ok(()) => result.succeeded = true,
            Err(e) => {
                result.error = Some(e.to_string());
                if action.rollback_on_failure {
                    match invoke(handler, ctx, action.timeout, Phase::Rollback).await {
                        Ok(()) => {
                            info!(action = %action.kind, "Rolled back failed recovery action");
                            result.rolled_back = true;
                        }
                        Err(rollback_error) => {
                            error!(
                                action = %action.kind,
                                error = %rollback_error,
                                "Rollback of failed recovery action failed"
                            );
                            result.rollback_error = Some(rollback_error.to_string());
                        }
                    }
                }
            }
        }

        result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        result
    }

    async fn verify(
        &self,
        strategy: &RecoveryStrategy,
        component: &ComponentId,
        source: &dyn MetricSource,
    ) -> Vec<CriterionResult> {
        if strategy.success_criteria.is_empty() {
            return Vec::new();
        }
        if !self.config.verification_delay.is_zero() {
            tokio::time::sleep(self.config.verification_delay).await;
        }

        let metrics = source.verification_metrics(component).await;
        strategy
            .success_criteria
            .iter()
            .map(|criterion| {
                let observed = metrics.get(&criterion.metric).copied();
                let direction = source.direction_of(component, &criterion.metric);
                let satisfied = observed
                    .map(|value| criterion.is_satisfied(value, direction))
                    .unwrap_or(false);
                if !satisfied {
                    debug!(
                        strategy_id = %strategy.id,
                        metric = %criterion.metric,
                        observed = ?observed,
                        target = criterion.target,
                        "Success criterion not met"
                    );
                }
                CriterionResult {
                    metric: criterion.metric.clone(),
                    target: criterion.target,
                    tolerance: criterion.tolerance,
                    observed,
                    satisfied,
                }
            })
            .collect()
    }

    /// Apply the attempt's outcome to breakers and alerts
    fn settle(
        &self,
        strategy: &RecoveryStrategy,
        component: &ComponentId,
        success: bool,
        exhausted: bool,
    ) {
        let mut metrics = strategy.referenced_metrics();
        metrics.push(recovery_metric(&strategy.id));

        if success {
            info!(strategy_id = %strategy.id, component = %component, "Recovery succeeded");
            self.breakers.reset(component);
            for alert in self.alerts.resolve_for(component, &metrics) {
                self.events.publish(HealthEvent::AlertResolved { alert });
            }
            return;
        }

        if !exhausted {
            warn!(strategy_id = %strategy.id, component = %component, "Recovery attempt failed");
            return;
        }

        error!(
            strategy_id = %strategy.id,
            component = %component,
            max_retries = strategy.max_retries,
            "Recovery strategy exhausted"
        );
        for alert in self.alerts.escalate(component, &strategy.referenced_metrics()) {
            self.events.publish(HealthEvent::AlertEscalated { alert });
        }
        let request = AlertRequest {
            component_id: component.clone(),
            metric: recovery_metric(&strategy.id),
            kind: AlertKind::Recovery,
            severity: AlertSeverity::Critical,
            value: f64::from(strategy.max_retries),
            threshold: f64::from(strategy.max_retries),
            direction: ThresholdDirection::Above,
            message: None,
        }
        .with_message(format!(
            "recovery strategy '{}' failed {} time(s) on '{}'",
            strategy.name, strategy.max_retries, component
        ));
        let change = self.alerts.raise_with(request);
        if change.opened() {
            self.events.publish(HealthEvent::AlertRaised {
                alert: change.into_alert(),
            });
        }
    }

    fn record(&self, attempt: RecoveryAttempt) {
        let mut history = self.history.lock();
        history.push_back(attempt);
        while history.len() > self.config.history_capacity.max(1) {
            history.pop_front();
        }
    }

    /// Clear the strategy's retry and cooldown state. Returns false if it never ran.
    pub fn reset(&self, strategy_id: &str) -> bool {
        let mut ledgers = self.ledgers.lock();
        match ledgers.get_mut(strategy_id) {
            Some(ledger) => {
                let running = ledger.running;
                *ledger = StrategyLedger {
                    running,
                    ..StrategyLedger::default()
                };
                info!(strategy_id, "Recovery state reset");
                true
            }
            None => false,
        }
    }

    pub fn ledger(&self, strategy_id: &str) -> Option<StrategyLedger> {
        self.ledgers.lock().get(strategy_id).cloned()
    }

    /// Finished attempts, oldest first
    pub fn history(&self) -> Vec<RecoveryAttempt> {
        self.history.lock().iter().cloned().collect()
    }
}

/// Alert metric name used for a strategy's exhaustion alert
pub fn recovery_metric(strategy_id: &str) -> String {
    format!("recovery:{strategy_id}")
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Execute,
    Rollback,
}

async fn invoke(
    handler: Arc<dyn ActionHandler>,
    ctx: ActionContext,
    timeout: Duration,
    phase: Phase,
) -> Result<(), ActionError> {
    let kind = ctx.kind.clone();
    let operation = match phase {
        Phase::Execute => format!("{}:{}", ctx.strategy_id, kind),
        Phase::Rollback => format!("{}:{}:rollback", ctx.strategy_id, kind),
    };

    let outcome = spawn_with_timeout(&operation, timeout, async move {
        match phase {
            Phase::Execute => handler.execute(&ctx).await,
            Phase::Rollback => handler.rollback(&ctx).await,
        }
    })
    .await?;

    outcome.map_err(|e| ActionError::Failed {
        kind,
        reason: format!("{e:#}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertConfig;
    use crate::reliability::{CircuitBreakerConfig, CircuitBreakerState};
    use crate::recovery::strategy::{ComparisonOperator, SuccessCriterion, TriggerCondition};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Handler with scripted outcomes
    #[derive(Default)]
    struct ScriptedHandler {
        fail: bool,
        fail_rollback: bool,
        hang: bool,
        executions: AtomicU32,
        rollbacks: AtomicU32,
    }

    #[async_trait]
    impl ActionHandler for ScriptedHandler {
        async fn execute(&self, _ctx: &ActionContext) -> anyhow::Result<()> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail {
                anyhow::bail!("scripted failure");
            }
            Ok(())
        }

        async fn rollback(&self, _ctx: &ActionContext) -> anyhow::Result<()> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            if self.fail_rollback {
                anyhow::bail!("scripted rollback failure");
            }
            Ok(())
        }
    }

    struct FixedMetrics(HashMap<String, f64>);

    #[async_trait]
    impl MetricSource for FixedMetrics {
        fn latest_metrics(&self, _component: &ComponentId) -> HashMap<String, f64> {
            self.0.clone()
        }

        async fn verification_metrics(&self, _component: &ComponentId) -> HashMap<String, f64> {
            self.0.clone()
        }

        fn direction_of(&self, _component: &ComponentId, metric: &str) -> Option<ThresholdDirection> {
            (metric == "fps").then_some(ThresholdDirection::Below)
        }
    }

    struct Fixture {
        executor: RecoveryExecutor,
        actions: Arc<ActionRegistry>,
        breakers: Arc<BreakerRegistry>,
        alerts: Arc<AlertRegistry>,
    }

    fn fixture() -> Fixture {
        let events = EventPublisher::new(64);
        let breakers = Arc::new(BreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
        }));
        let alerts = Arc::new(AlertRegistry::new(AlertConfig::default()));
        let actions = Arc::new(ActionRegistry::with_builtins(breakers.clone(), events.clone()));
        let executor = RecoveryExecutor::new(
            actions.clone(),
            breakers.clone(),
            alerts.clone(),
            events,
            RecoveryConfig::default(),
        );
        Fixture {
            executor,
            actions,
            breakers,
            alerts,
        }
    }

    fn strategy(kind: ActionKind) -> RecoveryStrategy {
        RecoveryStrategy::new("reduce-quality", "Reduce quality")
            .trigger(TriggerCondition::new(
                "fps",
                ComparisonOperator::LessThan,
                30.0,
                Duration::ZERO,
            ))
            .action(RecoveryAction::new(kind))
            .success(SuccessCriterion::new("fps", 45.0, 0.0))
            .max_retries(2)
            .cooldown(Duration::ZERO)
    }

    fn fps(value: f64) -> FixedMetrics {
        FixedMetrics(HashMap::from([("fps".to_string(), value)]))
    }

    fn renderer() -> ComponentId {
        ComponentId::from("renderer")
    }

    #[tokio::test]
    async fn test_successful_recovery_resets_breaker_and_resolves_alerts() {
        let f = fixture();
        f.actions
            .register(ActionKind::ReduceQuality, Arc::new(ScriptedHandler::default()));
        f.breakers.record_failure(&renderer());
        assert_eq!(f.breakers.state(&renderer()), Some(CircuitBreakerState::Open));
        f.alerts
            .raise_with(AlertRequest::threshold(
                renderer(),
                "fps",
                25.0,
                30.0,
                ThresholdDirection::Below,
                AlertSeverity::Critical,
            ));

        let result = f
            .executor
            .execute(&strategy(ActionKind::ReduceQuality), &renderer(), &fps(58.0))
            .await;

        assert!(result.executed);
        assert!(result.success);
        assert!(!result.exhausted);
        let attempt = result.attempt.expect("attempt recorded");
        assert_eq!(attempt.status, AttemptStatus::Succeeded);
        assert_eq!(attempt.attempt_number, 1);
        assert!(attempt.criteria_results[0].satisfied);
        assert_eq!(f.breakers.state(&renderer()), Some(CircuitBreakerState::Closed));
        assert_eq!(f.alerts.active_count(), 0);
        assert_eq!(f.executor.history().len(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_after_max_retries() {
        let f = fixture();
        f.actions.register(
            ActionKind::ReduceQuality,
            Arc::new(ScriptedHandler {
                fail: true,
                ..ScriptedHandler::default()
            }),
        );
        let strategy = strategy(ActionKind::ReduceQuality);

        let first = f.executor.execute(&strategy, &renderer(), &fps(20.0)).await;
        assert!(first.executed && !first.success && !first.exhausted);

        let second = f.executor.execute(&strategy, &renderer(), &fps(20.0)).await;
        assert!(second.executed && !second.success && second.exhausted);
        assert_eq!(second.attempt.map(|a| a.attempt_number), Some(2));

        let third = f.executor.execute(&strategy, &renderer(), &fps(20.0)).await;
        assert!(!third.executed);
        assert!(third.exhausted);
        assert_eq!(third.skipped, Some(SkipReason::Exhausted));

        let recovery_alerts: Vec<_> = f
            .alerts
            .list_active()
            .into_iter()
            .filter(|a| a.kind == AlertKind::Recovery)
            .collect();
        assert_eq!(recovery_alerts.len(), 1);
        assert_eq!(recovery_alerts[0].severity, AlertSeverity::Critical);

        assert!(f.executor.reset(&strategy.id));
        let after_reset = f.executor.execute(&strategy, &renderer(), &fps(20.0)).await;
        assert!(after_reset.executed);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_second_attempt() {
        let f = fixture();
        let handler = Arc::new(ScriptedHandler::default());
        f.actions.register(ActionKind::ReduceQuality, handler.clone());
        let strategy = strategy(ActionKind::ReduceQuality).cooldown(Duration::from_secs(300));

        let first = f.executor.execute(&strategy, &renderer(), &fps(60.0)).await;
        assert!(first.executed);
        let second = f.executor.execute(&strategy, &renderer(), &fps(60.0)).await;
        assert!(!second.executed);
        assert!(matches!(second.skipped, Some(SkipReason::CoolingDown { .. })));
        assert_eq!(handler.executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_handler_fails_attempt() {
        let f = fixture();
        let result = f
            .executor
            .execute(&strategy(ActionKind::Restart), &renderer(), &fps(60.0))
            .await;
        assert!(result.executed);
        assert!(!result.success);
        let attempt = result.attempt.expect("attempt");
        assert!(attempt.action_results[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("No handler")));
        assert!(attempt.criteria_results.is_empty());
    }

    #[tokio::test]
    async fn test_rolled_back_failure_does_not_fail_attempt() {
        let f = fixture();
        let handler = Arc::new(ScriptedHandler {
            fail: true,
            ..ScriptedHandler::default()
        });
        f.actions.register(ActionKind::ClearCache, handler.clone());
        f.actions
            .register(ActionKind::ReduceQuality, Arc::new(ScriptedHandler::default()));

        let strategy = RecoveryStrategy::new("two-step", "Two step")
            .trigger(TriggerCondition::new(
                "fps",
                ComparisonOperator::LessThan,
                30.0,
                Duration::ZERO,
            ))
            .action(RecoveryAction::new(ActionKind::ClearCache).rollback_on_failure(true))
            .action(RecoveryAction::new(ActionKind::ReduceQuality))
            .cooldown(Duration::ZERO);

        let result = f.executor.execute(&strategy, &renderer(), &fps(60.0)).await;
        assert!(result.success);
        let attempt = result.attempt.expect("attempt");
        assert!(attempt.action_results[0].rolled_back);
        assert!(attempt.action_results[1].succeeded);
        assert_eq!(handler.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_rollback_still_runs_later_actions() {
        let f = fixture();
        let cache = Arc::new(ScriptedHandler {
            fail: true,
            fail_rollback: true,
            ..ScriptedHandler::default()
        });
        let quality = Arc::new(ScriptedHandler::default());
        f.actions.register(ActionKind::ClearCache, cache.clone());
        f.actions.register(ActionKind::ReduceQuality, quality.clone());

        let strategy = RecoveryStrategy::new("two-step", "Two step")
            .trigger(TriggerCondition::new(
                "fps",
                ComparisonOperator::LessThan,
                30.0,
                Duration::ZERO,
            ))
            .action(RecoveryAction::new(ActionKind::ClearCache).rollback_on_failure(true))
            .action(RecoveryAction::new(ActionKind::ReduceQuality))
            .success(SuccessCriterion::new("fps", 45.0, 0.0))
            .cooldown(Duration::ZERO);

        let result = f.executor.execute(&strategy, &renderer(), &fps(60.0)).await;
        assert!(result.executed);
        assert!(!result.success);

        let attempt = result.attempt.expect("attempt");
        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert_eq!(attempt.action_results.len(), 2);
        assert!(!attempt.action_results[0].rolled_back);
        assert!(attempt.action_results[0]
            .rollback_error
            .as_deref()
            .is_some_and(|e| e.contains("scripted rollback failure")));
        assert!(attempt.action_results[1].succeeded);
        assert_eq!(cache.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(quality.executions.load(Ordering::SeqCst), 1);
        assert!(attempt.criteria_results.is_empty());
    }

    #[tokio::test]
    async fn test_critical_failure_without_rollback_runs_remaining_actions() {
        let f = fixture();
        let quality = Arc::new(ScriptedHandler::default());
        f.actions.register(ActionKind::ReduceQuality, quality.clone());

        // Restart has no handler, so it fails without a rollback
        let strategy = RecoveryStrategy::new("restart-then-reduce", "Restart then reduce")
            .trigger(TriggerCondition::new(
                "fps",
                ComparisonOperator::LessThan,
                30.0,
                Duration::ZERO,
            ))
            .action(RecoveryAction::new(ActionKind::Restart))
            .action(RecoveryAction::new(ActionKind::ReduceQuality))
            .cooldown(Duration::ZERO);

        let result = f.executor.execute(&strategy, &renderer(), &fps(60.0)).await;
        assert!(!result.success);
        let attempt = result.attempt.expect("attempt");
        assert_eq!(attempt.action_results.len(), 2);
        assert!(attempt.action_results[1].succeeded);
        assert_eq!(quality.executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_action_times_out() {
        let f = fixture();
        f.actions.register(
            ActionKind::ReduceQuality,
            Arc::new(ScriptedHandler {
                hang: true,
                ..ScriptedHandler::default()
            }),
        );
        let strategy = RecoveryStrategy::new("hung", "Hung")
            .trigger(TriggerCondition::new(
                "fps",
                ComparisonOperator::LessThan,
                30.0,
                Duration::ZERO,
            ))
            .action(
                RecoveryAction::new(ActionKind::ReduceQuality)
                    .with_timeout(Duration::from_millis(100)),
            )
            .cooldown(Duration::ZERO);

        let result = f.executor.execute(&strategy, &renderer(), &fps(60.0)).await;
        assert!(!result.success);
        let attempt = result.attempt.expect("attempt");
        assert!(attempt.action_results[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("timed out")));
    }

    #[tokio::test]
    async fn test_concurrent_execute_runs_once() {
        let f = Arc::new(fixture());
        let handler = Arc::new(ScriptedHandler::default());
        f.actions.register(ActionKind::ReduceQuality, handler.clone());
        let strategy = Arc::new(strategy(ActionKind::ReduceQuality).cooldown(Duration::from_secs(60)));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let f = f.clone();
                let strategy = strategy.clone();
                tokio::spawn(async move {
                    f.executor
                        .execute(&strategy, &renderer(), &fps(60.0))
                        .await
                        .executed
                })
            })
            .collect();

        let mut executed = 0;
        for task in tasks {
            if task.await.expect("task") {
                executed += 1;
            }
        }
        assert_eq!(executed, 1);
        assert_eq!(handler.executions.load(Ordering::SeqCst), 1);
    }
}
