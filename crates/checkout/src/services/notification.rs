//! Fire-and-forget notifications on order state transitions.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{Money, PlanType};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{CheckoutError, Result};
use crate::{OrderId, SubscriptionId, UserId};

/// A notification emitted after a transition has committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    OrderPaid {
        order_id: OrderId,
        user_id: UserId,
        total: Money,
    },
    OrderFailed {
        order_id: OrderId,
        user_id: UserId,
    },
    SubscriptionActivated {
        subscription_id: SubscriptionId,
        order_id: OrderId,
        user_id: UserId,
        plan_type: PlanType,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::OrderPaid { .. } => "order_paid",
            Notification::OrderFailed { .. } => "order_failed",
            Notification::SubscriptionActivated { .. } => "subscription_activated",
        }
    }
}

/// Destination for notifications (email, push, ...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Sends a notification and logs any failure instead of returning it.
pub async fn dispatch(sink: &dyn NotificationSink, notification: Notification) {
    if let Err(e) = sink.notify(&notification).await {
        tracing::error!(kind = notification.kind(), error = %e, "notification failed");
    }
}

/// Sink that only writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        tracing::info!(kind = notification.kind(), ?notification, "notification sent");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemorySinkState {
    sent: Vec<Notification>,
    fail: bool,
}

/// Sink that records notifications for inspection in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationSink {
    state: Arc<RwLock<InMemorySinkState>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures every subsequent `notify` to fail.
    pub async fn set_fail(&self, fail: bool) {
        self.state.write().await.fail = fail;
    }

    /// Notifications delivered so far, oldest first.
    pub async fn sent(&self) -> Vec<Notification> {
        self.state.read().await.sent.clone()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail {
            return Err(CheckoutError::Notification("channel unavailable".to_string()));
        }
        state.sent.push(notification.clone());
        Ok(())
    }
}
