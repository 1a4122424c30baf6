//! Persistence traits for orders and carts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    CartLine, Order, OrderId, OrderItem, OrderStatus, Result, Subscription, SubscriptionStatus,
    UserId,
};

/// Outcome of a status compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The status changed; `order` is the updated row.
    Applied { from: OrderStatus, order: Order },

    /// The current status does not allow the transition; nothing changed.
    Unchanged { current: OrderStatus },
}

impl Transition {
    /// Returns true if the status changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// Storage for the Order / OrderItem / Subscription aggregate.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persists a new order row.
    async fn create_order(&self, order: &Order) -> Result<()>;

    /// Deletes an order together with its items and subscriptions.
    async fn delete_order(&self, order_id: OrderId) -> Result<()>;

    /// Writes every line and subscription of an order in one transaction.
    ///
    /// Either all rows are stored or none are.
    async fn insert_items(
        &self,
        order_id: OrderId,
        items: &[OrderItem],
        subscriptions: &[Subscription],
    ) -> Result<()>;

    /// Stores the identifiers returned by the payment gateway.
    async fn set_payment_session(
        &self,
        order_id: OrderId,
        invoice_id: &str,
        payment_reference: Option<&str>,
    ) -> Result<()>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    async fn find_by_invoice_id(&self, invoice_id: &str) -> Result<Option<Order>>;

    async fn find_by_payment_reference(&self, payment_reference: &str) -> Result<Option<Order>>;

    /// Lines of an order in insertion order.
    async fn items_for_order(&self, order_id: OrderId) -> Result<Vec<OrderItem>>;

    async fn subscriptions_for_order(&self, order_id: OrderId) -> Result<Vec<Subscription>>;

    /// Moves the order to `to` if its current status allows it.
    ///
    /// The check and the write happen under a lock on the order row, so of
    /// two concurrent callers at most one sees `Applied`. A supplied
    /// `payment_reference` is stored with the transition.
    async fn transition_status(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        payment_reference: Option<&str>,
    ) -> Result<Transition>;

    /// Moves every subscription of the order currently in `from` to `to`.
    ///
    /// Returns the number of subscriptions changed.
    async fn set_subscriptions_status(
        &self,
        order_id: OrderId,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<u64>;

    /// Orders still in `created` status that were created before `cutoff`.
    async fn list_stale_created(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>>;
}

/// Storage for users' active carts.
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Rows of the user's active cart, oldest first.
    async fn active_cart(&self, user_id: UserId) -> Result<Vec<CartLine>>;

    async fn add_line(&self, user_id: UserId, line: CartLine) -> Result<()>;

    /// Removes the given lines from the user's cart. Unknown ids are ignored.
    async fn remove_lines(&self, user_id: UserId, line_ids: &[Uuid]) -> Result<u64>;
}
