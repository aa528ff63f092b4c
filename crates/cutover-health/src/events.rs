//! Typed publish/subscribe for monitoring notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{Alert, SystemHealthStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    MonitoringStarted,
    MonitoringStopped,
    HealthChecked(SystemHealthStatus),
    AlertCreated(Alert),
    AutomaticRollback { reason: String, alert: Alert },
}

impl MonitorEvent {
    /// Stable event name for operational tooling.
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::MonitoringStarted => "monitoring.started",
            MonitorEvent::MonitoringStopped => "monitoring.stopped",
            MonitorEvent::HealthChecked(_) => "health.checked",
            MonitorEvent::AlertCreated(_) => "alert.created",
            MonitorEvent::AutomaticRollback { .. } => "rollback.automatic",
        }
    }
}

/// Callback invoked for every published event.
pub type EventCallback = Arc<dyn Fn(&MonitorEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Subscribers registered explicitly on one monitor.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<(SubscriptionId, EventCallback)>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers.write().await.push((id, callback));
        id
    }

    /// Returns false if the subscription was already gone.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    /// Deliver to every current subscriber, in subscription order.
    pub async fn publish(&self, event: MonitorEvent) {
        let subscribers: Vec<EventCallback> = self
            .subscribers
            .read()
            .await
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        debug!(event = event.name(), subscribers = subscribers.len(), "publishing monitor event");
        for callback in subscribers {
            callback(&event);
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}
