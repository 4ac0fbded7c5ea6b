//! Automated recovery: strategies, action handlers and the executor that runs them.

pub mod actions;
pub mod executor;
pub mod strategy;

pub use actions::{
    ActionContext, ActionError, ActionHandler, ActionRegistry, IsolateHandler, NotifyHandler,
};
pub use executor::{
    recovery_metric, ActionResult, AttemptStatus, CriterionResult, MetricSource,
    RecoveryAttempt, RecoveryExecutor, RecoveryResult, SkipReason, StrategyLedger,
};
pub use strategy::{
    ActionKind, ComparisonOperator, RecoveryAction, RecoveryStrategy, StrategyCatalog,
    SuccessCriterion, TriggerCondition,
};
