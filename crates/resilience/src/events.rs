//! Health event fan-out.
//!
//! Alert lifecycle, status transitions and recovery progress are published on a
//! tokio broadcast channel; a subscriber that falls behind loses the oldest events
//! rather than slowing the monitor down.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::alerts::{Alert, AlertSeverity};
use crate::recovery::RecoveryResult;
use crate::types::{ComponentId, HealthStatus};

/// Event topics, usable as routing keys by subscribers
pub struct HealthTopics;

impl HealthTopics {
    pub const ALERT_RAISED: &'static str = "alert.raised";
    pub const ALERT_RESOLVED: &'static str = "alert.resolved";
    pub const ALERT_ESCALATED: &'static str = "alert.escalated";
    pub const STATUS_CHANGED: &'static str = "component.status_changed";
    pub const RECOVERY_STARTED: &'static str = "recovery.started";
    pub const RECOVERY_FINISHED: &'static str = "recovery.finished";
    pub const NOTIFICATION: &'static str = "notification";
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HealthEvent {
    AlertRaised {
        alert: Alert,
    },
    AlertResolved {
        alert: Alert,
    },
    AlertEscalated {
        alert: Alert,
    },
    StatusChanged {
        component_id: ComponentId,
        from: HealthStatus,
        to: HealthStatus,
    },
    RecoveryStarted {
        strategy_id: String,
        component_id: ComponentId,
        attempt_number: u32,
    },
    RecoveryFinished {
        result: RecoveryResult,
    },
    /// Emitted by the built-in notify action
    Notification {
        component_id: ComponentId,
        severity: AlertSeverity,
        message: String,
    },
}

impl HealthEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            HealthEvent::AlertRaised { .. } => HealthTopics::ALERT_RAISED,
            HealthEvent::AlertResolved { .. } => HealthTopics::ALERT_RESOLVED,
            HealthEvent::AlertEscalated { .. } => HealthTopics::ALERT_ESCALATED,
            HealthEvent::StatusChanged { .. } => HealthTopics::STATUS_CHANGED,
            HealthEvent::RecoveryStarted { .. } => HealthTopics::RECOVERY_STARTED,
            HealthEvent::RecoveryFinished { .. } => HealthTopics::RECOVERY_FINISHED,
            HealthEvent::Notification { .. } => HealthTopics::NOTIFICATION,
        }
    }
}

/// Cheap-to-clone handle to the event channel
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<HealthEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to current subscribers; having none is not an error
    pub fn publish(&self, event: HealthEvent) {
        let topic = event.topic();
        match self.sender.send(event) {
            Ok(receivers) => trace!(topic, receivers, "Published health event"),
            Err(_) => trace!(topic, "No subscribers for health event"),
        }
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = HealthEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
