//! Recovery action handlers
//!
//! Actions are dispatched by kind to registered handlers. The engine ships handlers
//! for `isolate` (force the component's breaker open) and `notify` (publish a
//! notification event); everything else is supplied by the embedding application.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::strategy::ActionKind;
use crate::alerts::AlertSeverity;
use crate::events::{EventPublisher, HealthEvent};
use crate::reliability::{BreakerRegistry, OperationTimeoutError};
use crate::types::ComponentId;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("No handler registered for action '{0}'")]
    NoHandler(ActionKind),

    #[error("Action '{kind}' failed: {reason}")]
    Failed { kind: ActionKind, reason: String },

    #[error(transparent)]
    Execution(#[from] OperationTimeoutError),
}

/// Everything a handler knows about the action it is running
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub component_id: ComponentId,
    pub strategy_id: String,
    pub attempt_number: u32,
    /// Position of the action within the strategy
    pub action_index: usize,
    pub kind: ActionKind,
    pub parameters: HashMap<String, serde_json::Value>,
    /// Latest metric values when the attempt started
    pub metrics: HashMap<String, f64>,
}

impl ActionContext {
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(|v| v.as_str())
    }

    pub fn param_f64(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).and_then(|v| v.as_f64())
    }
}

/// Executes one kind of recovery action.
///
/// Handlers run on their own task under the action's timeout; a handler that
/// outlives it is abandoned.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, ctx: &ActionContext) -> anyhow::Result<()>;

    /// Undo a failed `execute`; the default does nothing
    async fn rollback(&self, _ctx: &ActionContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Handler table keyed by action kind
#[derive(Default)]
pub struct ActionRegistry {
    handlers: DashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<String> = self.handlers.iter().map(|e| e.key().to_string()).collect();
        f.debug_struct("ActionRegistry").field("handlers", &kinds).finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the `isolate` and `notify` handlers
    pub fn with_builtins(breakers: Arc<BreakerRegistry>, events: EventPublisher) -> Self {
        let registry = Self::new();
        registry.register(ActionKind::Isolate, Arc::new(IsolateHandler::new(breakers)));
        registry.register(ActionKind::Notify, Arc::new(NotifyHandler::new(events)));
        registry
    }

    /// Register a handler, replacing any previous one for the same kind
    pub fn register(&self, kind: ActionKind, handler: Arc<dyn ActionHandler>) {
        if self.handlers.insert(kind.clone(), handler).is_some() {
            info!(action = %kind, "Replaced action handler");
        } else {
            info!(action = %kind, "Registered action handler");
        }
    }

    pub fn get(&self, kind: &ActionKind) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(kind).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, kind: &ActionKind) -> bool {
        self.handlers.contains_key(kind)
    }
}

/// Opens the component's breaker so callers stop sending it work.
/// Rollback closes it again.
pub struct IsolateHandler {
    breakers: Arc<BreakerRegistry>,
}

impl IsolateHandler {
    pub fn new(breakers: Arc<BreakerRegistry>) -> Self {
        Self { breakers }
    }
}

#[async_trait]
impl ActionHandler for IsolateHandler {
    async fn execute(&self, ctx: &ActionContext) -> anyhow::Result<()> {
        warn!(component = %ctx.component_id, strategy_id = %ctx.strategy_id, "Isolating component");
        self.breakers.get_or_create(&ctx.component_id).force_open();
        Ok(())
    }

    async fn rollback(&self, ctx: &ActionContext) -> anyhow::Result<()> {
        self.breakers.reset(&ctx.component_id);
        Ok(())
    }
}

/// Publishes a `Notification` event. Parameters: `message` (string) and
/// `severity` (info, warning, error or critical; default warning).
pub struct NotifyHandler {
    events: EventPublisher,
}

impl NotifyHandler {
    pub fn new(events: EventPublisher) -> Self {
        Self { events }
    }
}

#[async_trait]
impl ActionHandler for NotifyHandler {
    async fn execute(&self, ctx: &ActionContext) -> anyhow::Result<()> {
        let severity = match ctx.parameters.get("severity") {
            Some(value) => serde_json::from_value::<AlertSeverity>(value.clone())?,
            None => AlertSeverity::Warning,
        };
        let message = ctx
            .param_str("message")
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "recovery strategy '{}' running on '{}' (attempt {})",
                    ctx.strategy_id, ctx.component_id, ctx.attempt_number
                )
            });

        self.events.publish(HealthEvent::Notification {
            component_id: ctx.component_id.clone(),
            severity,
            message,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::{CircuitBreakerConfig, CircuitBreakerState};

    fn context(kind: ActionKind) -> ActionContext {
        ActionContext {
            component_id: ComponentId::from("neural"),
            strategy_id: "isolate-neural".to_string(),
            attempt_number: 1,
            action_index: 0,
            kind,
            parameters: HashMap::new(),
            metrics: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_isolate_opens_breaker_and_rollback_closes_it() {
        let breakers = Arc::new(BreakerRegistry::new(CircuitBreakerConfig::default()));
        let handler = IsolateHandler::new(breakers.clone());
        let ctx = context(ActionKind::Isolate);

        handler.execute(&ctx).await.expect("isolate");
        assert_eq!(
            breakers.state(&ctx.component_id),
            Some(CircuitBreakerState::Open)
        );

        handler.rollback(&ctx).await.expect("rollback");
        assert_eq!(
            breakers.state(&ctx.component_id),
            Some(CircuitBreakerState::Closed)
        );
    }

    #[tokio::test]
    async fn test_notify_publishes_event() {
        let events = EventPublisher::new(8);
        let mut receiver = events.subscribe();
        let handler = NotifyHandler::new(events);

        let mut ctx = context(ActionKind::Notify);
        ctx.parameters
            .insert("message".to_string(), serde_json::json!("switching to cpu"));
        ctx.parameters
            .insert("severity".to_string(), serde_json::json!("critical"));
        handler.execute(&ctx).await.expect("notify");

        match receiver.recv().await.expect("event") {
            HealthEvent::Notification {
                severity, message, ..
            } => {
                assert_eq!(severity, AlertSeverity::Critical);
                assert_eq!(message, "switching to cpu");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_notify_rejects_bad_severity() {
        let handler = NotifyHandler::new(EventPublisher::new(1));
        let mut ctx = context(ActionKind::Notify);
        ctx.parameters
            .insert("severity".to_string(), serde_json::json!("loud"));
        assert!(handler.execute(&ctx).await.is_err());
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ActionRegistry::with_builtins(
            Arc::new(BreakerRegistry::default()),
            EventPublisher::new(1),
        );
        assert!(registry.contains(&ActionKind::Isolate));
        assert!(registry.contains(&ActionKind::Notify));
        assert!(registry.get(&ActionKind::Restart).is_none());
    }
}
