//! Health monitor
//!
//! Owns every component record and ties the pieces together: samples are evaluated
//! and alerted on as they arrive, a periodic loop runs health checks, auto-resolves
//! alerts, refreshes statuses and dispatches recovery, and `execute_with_resilience`
//! wraps caller operations in breaker, timeout, retry, recovery and fallback.
//!
//! Lock order: a component record may be locked before the alert registry or the
//! strategy catalog, never the other way round.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerts::{Alert, AlertChange, AlertKind, AlertRegistry, AlertRequest, AlertSeverity};
use crate::config::{validate_thresholds, ConfigError, EngineConfig};
use crate::events::{EventPublisher, HealthEvent};
use crate::health::{worst_status, Evaluation, HealthCheck, HealthEvaluator, MetricHistory};
use crate::recovery::{
    ActionHandler, ActionKind, ActionRegistry, MetricSource, RecoveryAttempt, RecoveryExecutor,
    RecoveryResult, RecoveryStrategy, StrategyCatalog, StrategyLedger,
};
use crate::reliability::{
    run_with_timeout, spawn_with_timeout, BreakerRegistry, CircuitBreakerConfig,
    CircuitBreakerError, CircuitBreakerState, CircuitBreakerStats, ResilienceError, RetryConfig,
};
use crate::types::{
    ComponentHealth, ComponentId, HealthStatus, MetricSample, SystemHealth, ThresholdDirection,
    ThresholdSet,
};

/// Fallback producing a substitute result when the wrapped operation cannot
pub type Fallback<T> = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// Per-call settings for `execute_with_resilience`
pub struct ResilienceOptions<T> {
    /// Limit for each attempt
    pub timeout: Duration,
    pub retry: RetryConfig,
    fallback: Option<Fallback<T>>,
}

impl<T: Send + 'static> ResilienceOptions<T> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            retry: RetryConfig::default(),
            fallback: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.fallback = Some(Box::new(move || fallback().boxed()));
        self
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

impl<T: Send + 'static> Default for ResilienceOptions<T> {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[derive(Debug, Clone)]
struct CheckOutcome {
    status: HealthStatus,
    message: Option<String>,
}

struct ComponentRecord {
    thresholds: ThresholdSet,
    history: MetricHistory,
    /// Latest classification of every thresholded metric seen so far
    metric_status: HashMap<String, HealthStatus>,
    check: Option<CheckOutcome>,
    status: HealthStatus,
    last_sample_at: Option<DateTime<Utc>>,
}

struct ComponentSlot {
    id: ComponentId,
    record: Mutex<ComponentRecord>,
    health_check: RwLock<Option<Arc<dyn HealthCheck>>>,
}

struct MonitorInner {
    config: EngineConfig,
    components: DashMap<ComponentId, Arc<ComponentSlot>>,
    evaluator: HealthEvaluator,
    alerts: Arc<AlertRegistry>,
    breakers: Arc<BreakerRegistry>,
    catalog: StrategyCatalog,
    actions: Arc<ActionRegistry>,
    executor: RecoveryExecutor,
    events: EventPublisher,
    started_at: Instant,
    /// Cancelled when the monitor is dropped; stops delayed alert checks
    shutdown: CancellationToken,
}

struct LoopHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Continuously evaluates registered components and drives alerting and recovery
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    runner: Mutex<Option<LoopHandle>>,
}

impl HealthMonitor {
    /// Build a monitor and register the components and strategies in `config`
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let events = EventPublisher::new(config.event_channel_capacity);
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let alerts = Arc::new(AlertRegistry::new(config.alerts.clone()));
        let actions = Arc::new(ActionRegistry::with_builtins(breakers.clone(), events.clone()));
        let executor = RecoveryExecutor::new(
            actions.clone(),
            breakers.clone(),
            alerts.clone(),
            events.clone(),
            config.recovery.clone(),
        );

        let components = config.components.clone();
        let strategies = config.strategies.clone();
        let monitor = Self {
            inner: Arc::new(MonitorInner {
                evaluator: HealthEvaluator::new(config.anomaly.clone()),
                config,
                components: DashMap::new(),
                alerts,
                breakers,
                catalog: StrategyCatalog::new(),
                actions,
                executor,
                events,
                started_at: Instant::now(),
                shutdown: CancellationToken::new(),
            }),
            runner: Mutex::new(None),
        };

        for component in components {
            match component.breaker {
                Some(breaker) => monitor.register_component_with_breaker(
                    component.id,
                    component.thresholds,
                    breaker,
                )?,
                None => monitor.register_component(component.id, component.thresholds)?,
            }
        }
        for strategy in strategies {
            monitor.register_recovery_strategy(strategy)?;
        }

        Ok(monitor)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn register_component(
        &self,
        id: impl Into<ComponentId>,
        thresholds: ThresholdSet,
    ) -> Result<(), ConfigError> {
        self.inner.register_component(id.into(), thresholds)
    }

    /// Register with a breaker configuration that overrides the engine default
    pub fn register_component_with_breaker(
        &self,
        id: impl Into<ComponentId>,
        thresholds: ThresholdSet,
        breaker: CircuitBreakerConfig,
    ) -> Result<(), ConfigError> {
        let id = id.into();
        breaker
            .validate()
            .map_err(|e| ConfigError::InvalidSetting {
                field: "breaker",
                reason: format!("{id}: {e}"),
            })?;
        self.inner.register_component(id.clone(), thresholds)?;
        self.inner.breakers.configure(id, breaker);
        Ok(())
    }

    /// Replace a registered component's thresholds; history is kept
    pub fn update_thresholds(
        &self,
        id: &ComponentId,
        thresholds: ThresholdSet,
    ) -> Result<(), ConfigError> {
        validate_thresholds(id, &thresholds)?;
        let slot = self.inner.slot_or_err(id)?;
        let mut record = slot.record.lock();
        record.metric_status.retain(|metric, _| thresholds.contains_key(metric));
        record.thresholds = thresholds;
        info!(component = %id, "Updated component thresholds");
        Ok(())
    }

    pub fn register_health_check(
        &self,
        id: &ComponentId,
        check: Arc<dyn HealthCheck>,
    ) -> Result<(), ConfigError> {
        let slot = self.inner.slot_or_err(id)?;
        *slot.health_check.write() = Some(check);
        info!(component = %id, "Registered health check");
        Ok(())
    }

    /// Register or replace a strategy; replacing clears its retry and cooldown state
    pub fn register_recovery_strategy(&self, strategy: RecoveryStrategy) -> Result<(), ConfigError> {
        if let Some(component) = &strategy.component {
            if !self.inner.components.contains_key(component) {
                return Err(ConfigError::InvalidStrategy {
                    id: strategy.id.clone(),
                    reason: format!("component '{component}' is not registered"),
                });
            }
        }
        let id = strategy.id.clone();
        if self.inner.catalog.register(strategy)? {
            self.inner.executor.reset(&id);
        }
        Ok(())
    }

    pub fn register_action_handler(&self, kind: ActionKind, handler: Arc<dyn ActionHandler>) {
        self.inner.actions.register(kind, handler);
    }

    /// Ingest one sample. Returns false when the component is not registered.
    ///
    /// Spawns the delayed alert resolution check when called inside a tokio runtime.
    pub fn submit_sample(&self, sample: MetricSample) -> bool {
        self.inner.ingest(sample)
    }

    /// Start the periodic evaluation loop. Returns false if it is already running.
    pub fn start(&self, interval: Duration) -> bool {
        let mut runner = self.runner.lock();
        if runner.as_ref().is_some_and(|r| !r.task.is_finished()) {
            warn!("Health monitor already running");
            return false;
        }

        let interval = if interval.is_zero() {
            self.inner.config.evaluation_interval
        } else {
            interval
        };
        let token = self.inner.shutdown.child_token();
        let task = tokio::spawn(run_loop(self.inner.clone(), interval, token.clone()));
        *runner = Some(LoopHandle { token, task });

        info!(
            interval_ms = interval.as_millis() as u64,
            components = self.inner.components.len(),
            "Health monitor started"
        );
        true
    }

    /// Stop the loop and wait for it to exit. Recoveries already dispatched keep running.
    pub async fn stop(&self) {
        let handle = self.runner.lock().take();
        if let Some(handle) = handle {
            handle.token.cancel();
            if let Err(e) = handle.task.await {
                error!(error = %e, "Health monitor loop ended abnormally");
            }
            info!("Health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.runner
            .lock()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Run one evaluation cycle immediately
    pub async fn evaluate_now(&self) {
        self.inner.run_cycle().await;
    }

    pub fn snapshot(&self) -> SystemHealth {
        self.inner.snapshot()
    }

    pub fn component_health(&self, id: &ComponentId) -> Option<ComponentHealth> {
        let slot = self.inner.slot(id)?;
        let record = slot.record.lock();
        Some(self.inner.component_view(&slot.id, &record))
    }

    /// Run `operation` against `component` guarded by its breaker, with a per-attempt
    /// timeout and retries. When retries are exhausted applicable recovery strategies
    /// run, then the fallback if one was given.
    pub async fn execute_with_resilience<T, F, Fut>(
        &self,
        component: &ComponentId,
        options: ResilienceOptions<T>,
        operation: F,
    ) -> Result<T, ResilienceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if !self.inner.components.contains_key(component) {
            return Err(ResilienceError::UnknownComponent(component.clone()));
        }

        let breakers = &self.inner.breakers;
        let operation_name = format!("{component}.operation");
        let total = options.retry.total_attempts();
        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;

        for attempt in 0..total {
            if !breakers.allow(component) {
                warn!(component = %component, attempts, "Operation blocked by open circuit breaker");
                break;
            }
            attempts += 1;

            match run_with_timeout(&operation_name, options.timeout, operation()).await {
                Ok(Ok(value)) => {
                    breakers.record_success(component);
                    if attempts > 1 {
                        info!(component = %component, attempts, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    breakers.record_failure(component);
                    warn!(component = %component, attempt = attempts, error = %e, "Operation attempt failed");
                    last_error = Some(format!("{e:#}"));
                }
                Err(e) => {
                    breakers.record_failure(component);
                    last_error = Some(e.to_string());
                }
            }

            if attempt + 1 < total {
                let delay = options.retry.backoff.calculate_delay(attempt);
                if !delay.is_zero() {
                    debug!(component = %component, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let recovery_attempted = if attempts > 0 {
            self.inner.recover(component).await.is_some()
        } else {
            false
        };

        if let Some(fallback) = &options.fallback {
            match fallback().await {
                Ok(value) => {
                    info!(component = %component, "Served operation from fallback");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(component = %component, error = %e, "Fallback failed");
                    if attempts > 0 {
                        last_error = Some(format!("{}; fallback failed: {e:#}", last_error.unwrap_or_default()));
                    }
                }
            }
        }

        if attempts == 0 {
            return Err(CircuitBreakerError::Open {
                component: component.clone(),
            }
            .into());
        }

        error!(
            component = %component,
            attempts,
            recovery_attempted,
            "Operation failed after retries"
        );
        Err(ResilienceError::RetriesExhausted {
            component: component.clone(),
            attempts,
            recovery_attempted,
            last_error: last_error.unwrap_or_else(|| "circuit breaker opened".to_string()),
        })
    }

    /// Run the first applicable strategy for `component` that is not skipped
    pub async fn recover(&self, component: &ComponentId) -> Option<RecoveryResult> {
        self.inner.recover(component).await
    }

    pub fn acknowledge_alert(&self, id: Uuid) -> bool {
        self.inner.alerts.acknowledge(id)
    }

    pub fn list_active_alerts(&self) -> Vec<Alert> {
        self.inner.alerts.list_active()
    }

    pub fn alert_history(&self) -> Vec<Alert> {
        self.inner.alerts.history()
    }

    pub fn breaker_state(&self, component: &ComponentId) -> Option<CircuitBreakerState> {
        self.inner.breakers.state(component)
    }

    pub fn breaker_stats(&self) -> HashMap<ComponentId, CircuitBreakerStats> {
        self.inner.breakers.stats()
    }

    /// Close the component's breaker and refresh its status
    pub fn reset_breaker(&self, component: &ComponentId) -> Result<(), ConfigError> {
        let slot = self.inner.slot_or_err(component)?;
        self.inner.breakers.reset(component);
        let mut record = slot.record.lock();
        self.inner.refresh_status(&slot.id, &mut record);
        Ok(())
    }

    /// Clear a strategy's retry, exhaustion and cooldown state
    pub fn reset_recovery(&self, strategy_id: &str) -> bool {
        self.inner.executor.reset(strategy_id)
    }

    pub fn strategy_ledger(&self, strategy_id: &str) -> Option<StrategyLedger> {
        self.inner.executor.ledger(strategy_id)
    }

    pub fn recovery_history(&self) -> Vec<RecoveryAttempt> {
        self.inner.executor.history()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.inner.events.subscribe()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

async fn run_loop(inner: Arc<MonitorInner>, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = inner.run_cycle() => {}
                }
            }
        }
    }
    debug!("Health monitor loop exited");
}

impl MonitorInner {
    fn slot(&self, id: &ComponentId) -> Option<Arc<ComponentSlot>> {
        self.components.get(id).map(|entry| entry.value().clone())
    }

    fn slot_or_err(&self, id: &ComponentId) -> Result<Arc<ComponentSlot>, ConfigError> {
        self.slot(id)
            .ok_or_else(|| ConfigError::UnknownComponent(id.clone()))
    }

    fn slots(&self) -> Vec<Arc<ComponentSlot>> {
        let mut slots: Vec<Arc<ComponentSlot>> =
            self.components.iter().map(|e| e.value().clone()).collect();
        slots.sort_by(|a, b| a.id.cmp(&b.id));
        slots
    }

    fn register_component(
        &self,
        id: ComponentId,
        thresholds: ThresholdSet,
    ) -> Result<(), ConfigError> {
        validate_thresholds(&id, &thresholds)?;
        match self.components.entry(id.clone()) {
            Entry::Occupied(_) => Err(ConfigError::DuplicateComponent(id)),
            Entry::Vacant(vacant) => {
                info!(component = %id, metrics = thresholds.len(), "Registered component");
                vacant.insert(Arc::new(ComponentSlot {
                    id,
                    record: Mutex::new(ComponentRecord {
                        thresholds,
                        history: MetricHistory::new(self.config.history_capacity),
                        metric_status: HashMap::new(),
                        check: None,
                        status: HealthStatus::Healthy,
                        last_sample_at: None,
                    }),
                    health_check: RwLock::new(None),
                }));
                Ok(())
            }
        }
    }

    /// Evaluate, record and alert on one sample. Events for a component are
    /// published while its record is locked so subscribers see them in order.
    fn ingest(self: &Arc<Self>, sample: MetricSample) -> bool {
        let Some(slot) = self.slot(&sample.component_id) else {
            warn!(component = %sample.component_id, "Dropping sample for unregistered component");
            return false;
        };

        let mut pending_checks = Vec::new();
        {
            let mut record = slot.record.lock();
            let evaluation =
                self.evaluator
                    .evaluate(&slot.id, &sample, &record.thresholds, &record.history);

            record.last_sample_at = Some(sample.timestamp());
            record.history.push(sample);

            pending_checks.extend(self.apply_threshold_alerts(&slot.id, &mut record, &evaluation));
            self.apply_anomaly_alerts(&slot.id, &record, &evaluation);

            if self.config.trip_breaker_on_critical && evaluation.status == HealthStatus::Critical {
                self.breakers.record_failure(&slot.id);
            }
            self.refresh_status(&slot.id, &mut record);
        }

        for (alert_id, metric) in pending_checks {
            self.schedule_resolution_check(slot.clone(), alert_id, metric);
        }
        true
    }

    /// Resolve-then-raise per metric. Returns newly opened alerts for the delayed check.
    fn apply_threshold_alerts(
        &self,
        component: &ComponentId,
        record: &mut ComponentRecord,
        evaluation: &Evaluation,
    ) -> Vec<(Uuid, String)> {
        let mut opened = Vec::new();
        for metric in &evaluation.metrics {
            record
                .metric_status
                .insert(metric.metric.clone(), metric.status);

            if let Some(alert) = self.alerts.resolve_cleared(component, &metric.metric, metric.value) {
                self.events.publish(HealthEvent::AlertResolved { alert });
            }

            let Some(level) = metric.breached_level else {
                continue;
            };
            let change = self.alerts.raise_with(AlertRequest::threshold(
                component.clone(),
                &metric.metric,
                metric.value,
                level,
                metric.threshold.direction,
                AlertSeverity::from(metric.status),
            ));
            match change {
                AlertChange::Created(alert) | AlertChange::Reopened(alert) => {
                    opened.push((alert.id, alert.metric.clone()));
                    self.events.publish(HealthEvent::AlertRaised { alert });
                }
                AlertChange::Escalated(alert) => {
                    self.events.publish(HealthEvent::AlertEscalated { alert });
                }
                AlertChange::Refreshed(_) => {}
            }
        }
        opened
    }

    fn apply_anomaly_alerts(
        &self,
        component: &ComponentId,
        record: &ComponentRecord,
        evaluation: &Evaluation,
    ) {
        let Some(latest) = record.history.latest() else {
            return;
        };
        let mut metrics: Vec<&String> = latest.values.keys().collect();
        metrics.sort();

        for metric in metrics {
            match evaluation.anomaly_for(metric) {
                Some(anomaly) => {
                    let direction = if anomaly.value < anomaly.mean {
                        ThresholdDirection::Below
                    } else {
                        ThresholdDirection::Above
                    };
                    let change = self.alerts.raise_with(
                        AlertRequest::threshold(
                            component.clone(),
                            metric.as_str(),
                            anomaly.value,
                            anomaly.bound,
                            direction,
                            AlertSeverity::Warning,
                        )
                        .with_kind(AlertKind::Anomaly),
                    );
                    if change.opened() {
                        self.events.publish(HealthEvent::AlertRaised {
                            alert: change.into_alert(),
                        });
                    }
                }
                None => {
                    if let Some(alert) = self.alerts.resolve_key(component, metric, AlertKind::Anomaly) {
                        self.events.publish(HealthEvent::AlertResolved { alert });
                    }
                }
            }
        }
    }

    /// Worst of metric classifications, the last health check and the breaker
    fn compute_status(&self, component: &ComponentId, record: &ComponentRecord) -> HealthStatus {
        let mut status = worst_status(&record.metric_status);
        if let Some(check) = &record.check {
            status = status.max(check.status);
        }
        match self.breakers.state(component) {
            Some(CircuitBreakerState::Open) => status.max(HealthStatus::Unhealthy),
            Some(CircuitBreakerState::HalfOpen) => status.max(HealthStatus::Warning),
            _ => status,
        }
    }

    fn refresh_status(&self, component: &ComponentId, record: &mut ComponentRecord) {
        let status = self.compute_status(component, record);
        if status == record.status {
            return;
        }
        let from = record.status;
        record.status = status;
        if status > from {
            warn!(component = %component, %from, to = %status, "Component health degraded");
        } else {
            info!(component = %component, %from, to = %status, "Component health improved");
        }
        self.events.publish(HealthEvent::StatusChanged {
            component_id: component.clone(),
            from,
            to: status,
        });
    }

    /// Re-check a newly raised alert after the configured delay
    fn schedule_resolution_check(self: &Arc<Self>, slot: Arc<ComponentSlot>, alert_id: Uuid, metric: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = Arc::clone(self);
        let token = self.shutdown.clone();
        let delay = self.config.alerts.resolution_check_delay;

        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let latest = slot.record.lock().history.latest_value(&metric);
            if let Some(alert) = inner.alerts.check_resolution(alert_id, latest) {
                inner.events.publish(HealthEvent::AlertResolved { alert });
            }
        });
    }

    async fn run_cycle(self: &Arc<Self>) {
        let slots = self.slots();

        let checks: Vec<_> = slots
            .iter()
            .filter_map(|slot| {
                let check = slot.health_check.read().clone()?;
                Some(self.run_health_check(slot.clone(), check))
            })
            .collect();
        join_all(checks).await;

        let latest: HashMap<ComponentId, HashMap<String, f64>> = slots
            .iter()
            .map(|slot| (slot.id.clone(), slot.record.lock().history.latest_values()))
            .collect();
        let resolved = self
            .alerts
            .try_auto_resolve(|component, metric| latest.get(component)?.get(metric).copied());
        self.events
            .publish_all(resolved.into_iter().map(|alert| HealthEvent::AlertResolved { alert }));
        self.alerts.purge(Utc::now());

        for slot in &slots {
            let mut record = slot.record.lock();
            self.probe_breaker(&slot.id, &record);
            self.refresh_status(&slot.id, &mut record);
        }

        if self.config.recovery.auto_recover {
            for slot in &slots {
                self.dispatch_recovery(slot);
            }
        }
    }

    async fn run_health_check(self: &Arc<Self>, slot: Arc<ComponentSlot>, check: Arc<dyn HealthCheck>) {
        let operation = format!("health_check.{}", slot.id);
        let outcome =
            spawn_with_timeout(&operation, self.config.health_check_timeout, async move {
                check.check().await
            })
            .await;

        match outcome {
            Ok(Ok(health)) => {
                debug!(component = %slot.id, status = %health.status, "Health check completed");
                slot.record.lock().check = Some(CheckOutcome {
                    status: health.status,
                    message: health.message,
                });
                if !health.metrics.is_empty() {
                    self.ingest(MetricSample::now(slot.id.clone(), health.metrics));
                }
            }
            Ok(Err(e)) => {
                error!(component = %slot.id, error = %e, "Health check failed");
                slot.record.lock().check = Some(CheckOutcome {
                    status: HealthStatus::Unhealthy,
                    message: Some(format!("health check failed: {e:#}")),
                });
            }
            Err(e) => {
                error!(component = %slot.id, error = %e, "Health check did not complete");
                slot.record.lock().check = Some(CheckOutcome {
                    status: HealthStatus::Unhealthy,
                    message: Some(e.to_string()),
                });
            }
        }
    }

    /// A breaker opened by critical samples gets its half-open trial from the
    /// metrics: once the reset timeout has passed and the component is no longer
    /// critical, the trial succeeds and the breaker closes.
    fn probe_breaker(&self, component: &ComponentId, record: &ComponentRecord) {
        if !self.config.trip_breaker_on_critical || record.history.is_empty() {
            return;
        }
        let Some(breaker) = self.breakers.get(component) else {
            return;
        };
        if breaker.state() != CircuitBreakerState::Open {
            return;
        }
        if worst_status(&record.metric_status) < HealthStatus::Critical && breaker.allow() {
            debug!(component = %component, "Metrics recovered, closing breaker after trial");
            breaker.record_success();
        }
    }

    fn dispatch_recovery(self: &Arc<Self>, slot: &Arc<ComponentSlot>) {
        let applicable = {
            let record = slot.record.lock();
            self.catalog.find_applicable(&slot.id, &record.history)
        };
        if applicable.is_empty() {
            return;
        }

        let inner = Arc::clone(self);
        let component = slot.id.clone();
        tokio::spawn(async move {
            inner.recover_with(&component, applicable).await;
        });
    }

    async fn recover(&self, component: &ComponentId) -> Option<RecoveryResult> {
        let slot = self.slot(component)?;
        let applicable = {
            let record = slot.record.lock();
            self.catalog.find_applicable(component, &record.history)
        };
        self.recover_with(component, applicable).await
    }

    async fn recover_with(
        &self,
        component: &ComponentId,
        strategies: Vec<Arc<RecoveryStrategy>>,
    ) -> Option<RecoveryResult> {
        for strategy in strategies {
            let result = self.executor.execute(&strategy, component, self).await;
            if result.executed {
                return Some(result);
            }
        }
        None
    }

    fn component_view(&self, id: &ComponentId, record: &ComponentRecord) -> ComponentHealth {
        ComponentHealth {
            component_id: id.clone(),
            status: self.compute_status(id, record),
            metrics: record.history.latest_values(),
            metric_status: record.metric_status.clone(),
            breaker: self.breakers.state(id),
            message: record.check.as_ref().and_then(|c| c.message.clone()),
            last_sample_at: record.last_sample_at,
            checked_at: Utc::now(),
        }
    }

    fn snapshot(&self) -> SystemHealth {
        let components: HashMap<ComponentId, ComponentHealth> = self
            .slots()
            .into_iter()
            .map(|slot| {
                let record = slot.record.lock();
                let view = self.component_view(&slot.id, &record);
                (slot.id.clone(), view)
            })
            .collect();

        SystemHealth {
            overall: SystemHealth::overall_of(components.values().map(|c| &c.status)),
            components,
            active_alerts: self.alerts.list_active(),
            uptime_ms: i64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(i64::MAX),
            generated_at: Utc::now(),
        }
    }
}

#[async_trait]
impl MetricSource for MonitorInner {
    fn latest_metrics(&self, component: &ComponentId) -> HashMap<String, f64> {
        let Some(slot) = self.slot(component) else {
            return HashMap::new();
        };
        let record = slot.record.lock();
        record.history.latest_values()
    }

    async fn verification_metrics(&self, component: &ComponentId) -> HashMap<String, f64> {
        let mut metrics = self.latest_metrics(component);
        let Some(slot) = self.slot(component) else {
            return metrics;
        };
        let Some(check) = slot.health_check.read().clone() else {
            return metrics;
        };

        let operation = format!("health_check.{component}.verify");
        match spawn_with_timeout(&operation, self.config.health_check_timeout, async move {
            check.check().await
        })
        .await
        {
            Ok(Ok(health)) => metrics.extend(health.metrics),
            Ok(Err(e)) => warn!(component = %component, error = %e, "Verification health check failed"),
            Err(e) => warn!(component = %component, error = %e, "Verification health check did not complete"),
        }
        metrics
    }

    fn direction_of(&self, component: &ComponentId, metric: &str) -> Option<ThresholdDirection> {
        let slot = self.slot(component)?;
        let record = slot.record.lock();
        record.thresholds.get(metric).map(|t| t.direction)
    }
}
