//! Operator actions on orders and stock.

use chrono::{DateTime, Utc};
use domain::{
    DomainError, Order, OrderItem, OrderStatus, Subscription, SubscriptionStatus, Transition,
};
use ledger::InventoryRecord;
use serde::Serialize;

use crate::context::{CheckoutContext, stock_items};
use crate::error::{CheckoutError, Result};
use crate::{OrderId, ProductId, UserId};

/// An order with its lines and subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub subscriptions: Vec<Subscription>,
}

#[derive(Clone)]
pub struct OrderOperator {
    ctx: CheckoutContext,
}

impl OrderOperator {
    pub fn new(ctx: CheckoutContext) -> Self {
        Self { ctx }
    }

    pub async fn order_details(&self, order_id: OrderId) -> Result<OrderDetails> {
        let order = self
            .ctx
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| CheckoutError::OrderNotFound(order_id.to_string()))?;
        let items = self.ctx.orders.items_for_order(order_id).await?;
        let subscriptions = self.ctx.orders.subscriptions_for_order(order_id).await?;
        Ok(OrderDetails {
            order,
            items,
            subscriptions,
        })
    }

    /// Marks a paid order as shipped.
    #[tracing::instrument(skip(self))]
    pub async fn fulfill(&self, order_id: OrderId) -> Result<Order> {
        let order = self.transition(order_id, OrderStatus::Fulfilled).await?;
        tracing::info!(%order_id, "order fulfilled");
        Ok(order)
    }

    /// Cancels an open or paid order.
    ///
    /// A `created` order gives its reservation back. A `paid` order keeps
    /// its stock deducted; restocking goes through [`Self::adjust_stock`].
    /// Cancelling an already cancelled order reruns the cleanup, which
    /// finishes a cancellation whose release or subscription update failed.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: OrderId) -> Result<Order> {
        match self.compare_and_set(order_id, OrderStatus::Cancelled).await? {
            Transition::Applied { from, order } => {
                self.after_cancel(&order).await?;
                tracing::info!(%order_id, from = %from, "order cancelled");
                Ok(order)
            }
            Transition::Unchanged {
                current: OrderStatus::Cancelled,
            } => {
                let order = self
                    .ctx
                    .orders
                    .get_order(order_id)
                    .await?
                    .ok_or_else(|| CheckoutError::OrderNotFound(order_id.to_string()))?;
                self.after_cancel(&order).await?;
                tracing::info!(%order_id, "cancellation cleanup rerun");
                Ok(order)
            }
            Transition::Unchanged { current } => Err(DomainError::InvalidTransition {
                order_id,
                from: current,
                to: OrderStatus::Cancelled,
            }
            .into()),
        }
    }

    /// Cancels every `created` order older than `cutoff`.
    ///
    /// Orders that settle concurrently are skipped. An order whose cleanup
    /// fails stays cancelled and is finished by [`Self::cancel`]. Returns the
    /// ids of the orders cancelled.
    #[tracing::instrument(skip(self))]
    pub async fn expire_abandoned(&self, cutoff: DateTime<Utc>) -> Result<Vec<OrderId>> {
        let stale = self.ctx.orders.list_stale_created(cutoff).await?;
        let mut expired = Vec::with_capacity(stale.len());

        for order in stale {
            let transition = self
                .ctx
                .orders
                .transition_status(order.id, OrderStatus::Cancelled, None)
                .await?;
            if let Transition::Applied { order, .. } = transition {
                if let Err(e) = self.after_cancel(&order).await {
                    tracing::error!(order_id = %order.id, error = %e, "expired order cleanup failed");
                }
                expired.push(order.id);
            }
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), %cutoff, "abandoned orders expired");
        }
        Ok(expired)
    }

    /// Operator stock correction.
    #[tracing::instrument(skip(self))]
    pub async fn adjust_stock(
        &self,
        product_id: &ProductId,
        delta: i64,
        reason: &str,
        actor_id: UserId,
    ) -> Result<InventoryRecord> {
        Ok(self
            .ctx
            .ledger
            .adjust_admin(product_id, delta, reason, actor_id)
            .await?)
    }

    /// Returns whatever the order still holds and cancels its pending
    /// subscriptions. Units already deducted for a paid order stay deducted.
    async fn after_cancel(&self, order: &Order) -> Result<()> {
        let items = self.ctx.orders.items_for_order(order.id).await?;
        let stock = stock_items(&items);
        if !stock.is_empty() {
            self.ctx.ledger.release_all(&stock, order.id).await?;
        }
        self.ctx
            .orders
            .set_subscriptions_status(
                order.id,
                SubscriptionStatus::Pending,
                SubscriptionStatus::Cancelled,
            )
            .await?;
        Ok(())
    }

    async fn transition(&self, order_id: OrderId, to: OrderStatus) -> Result<Order> {
        match self.compare_and_set(order_id, to).await? {
            Transition::Applied { order, .. } => Ok(order),
            Transition::Unchanged { current } => Err(DomainError::InvalidTransition {
                order_id,
                from: current,
                to,
            }
            .into()),
        }
    }

    async fn compare_and_set(&self, order_id: OrderId, to: OrderStatus) -> Result<Transition> {
        self.ctx
            .orders
            .transition_status(order_id, to, None)
            .await
            .map_err(|e| match e {
                DomainError::OrderNotFound(id) => CheckoutError::OrderNotFound(id.to_string()),
                other => other.into(),
            })
    }
}
