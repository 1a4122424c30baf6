//! In-memory repositories for testing and local runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    CartLine, CartRepository, DomainError, Order, OrderId, OrderItem, OrderRepository,
    OrderStatus, Result, Subscription, SubscriptionStatus, Transition, UserId,
};

#[derive(Debug, Default)]
struct OrderTables {
    orders: HashMap<OrderId, Order>,
    items: HashMap<OrderId, Vec<OrderItem>>,
    subscriptions: HashMap<OrderId, Vec<Subscription>>,
    fail_on_insert_items: bool,
}

impl OrderTables {
    fn ensure_open(&self, order_id: OrderId) -> Result<()> {
        let order = self
            .orders
            .get(&order_id)
            .ok_or(DomainError::OrderNotFound(order_id))?;
        if order.status != OrderStatus::Created {
            return Err(DomainError::OrderClosed {
                order_id,
                status: order.status,
            });
        }
        Ok(())
    }
}

/// In-memory order repository.
///
/// One write lock covers all three tables, which gives every method the
/// same all-or-nothing behaviour as a database transaction.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    state: Arc<RwLock<OrderTables>>,
}

impl InMemoryOrderRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures `insert_items` to fail without writing anything.
    pub async fn set_fail_on_insert_items(&self, fail: bool) {
        self.state.write().await.fail_on_insert_items = fail;
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the number of stored subscriptions across all orders.
    pub async fn subscription_count(&self) -> usize {
        self.state
            .read()
            .await
            .subscriptions
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create_order(&self, order: &Order) -> Result<()> {
        self.state
            .write()
            .await
            .orders
            .insert(order.id, order.clone());
        Ok(())
    }

    async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        let mut state = self.state.write().await;
        state.orders.remove(&order_id);
        state.items.remove(&order_id);
        state.subscriptions.remove(&order_id);
        Ok(())
    }

    async fn insert_items(
        &self,
        order_id: OrderId,
        items: &[OrderItem],
        subscriptions: &[Subscription],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.ensure_open(order_id)?;
        if state.fail_on_insert_items {
            return Err(DomainError::InvalidLineItem(
                "simulated storage failure".to_string(),
            ));
        }

        state
            .items
            .entry(order_id)
            .or_default()
            .extend(items.iter().cloned());
        state
            .subscriptions
            .entry(order_id)
            .or_default()
            .extend(subscriptions.iter().cloned());
        Ok(())
    }

    async fn set_payment_session(
        &self,
        order_id: OrderId,
        invoice_id: &str,
        payment_reference: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.ensure_open(order_id)?;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(DomainError::OrderNotFound(order_id))?;
        order.payment_invoice_id = Some(invoice_id.to_string());
        if let Some(reference) = payment_reference {
            order.payment_reference = Some(reference.to_string());
        }
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn find_by_invoice_id(&self, invoice_id: &str) -> Result<Option<Order>> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .find(|o| o.payment_invoice_id.as_deref() == Some(invoice_id))
            .cloned())
    }

    async fn find_by_payment_reference(&self, payment_reference: &str) -> Result<Option<Order>> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .find(|o| o.payment_reference.as_deref() == Some(payment_reference))
            .cloned())
    }

    async fn items_for_order(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        Ok(self
            .state
            .read()
            .await
            .items
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn subscriptions_for_order(&self, order_id: OrderId) -> Result<Vec<Subscription>> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn transition_status(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        payment_reference: Option<&str>,
    ) -> Result<Transition> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(DomainError::OrderNotFound(order_id))?;

        let from = order.status;
        if !from.can_transition_to(to) {
            return Ok(Transition::Unchanged { current: from });
        }

        order.status = to;
        if let Some(reference) = payment_reference {
            order.payment_reference = Some(reference.to_string());
        }
        order.updated_at = Utc::now();

        Ok(Transition::Applied {
            from,
            order: order.clone(),
        })
    }

    async fn set_subscriptions_status(
        &self,
        order_id: OrderId,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut changed = 0;
        if let Some(subscriptions) = state.subscriptions.get_mut(&order_id) {
            for subscription in subscriptions.iter_mut().filter(|s| s.status == from) {
                subscription.status = to;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn list_stale_created(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Created && o.created_at < cutoff)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }
}

/// In-memory cart repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCartRepository {
    carts: Arc<RwLock<HashMap<UserId, Vec<CartLine>>>>,
}

impl InMemoryCartRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartRepository for InMemoryCartRepository {
    async fn active_cart(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        Ok(self
            .carts
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_line(&self, user_id: UserId, line: CartLine) -> Result<()> {
        self.carts
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(line);
        Ok(())
    }

    async fn remove_lines(&self, user_id: UserId, line_ids: &[Uuid]) -> Result<u64> {
        let mut carts = self.carts.write().await;
        let Some(lines) = carts.get_mut(&user_id) else {
            return Ok(0);
        };
        let before = lines.len();
        lines.retain(|line| !line_ids.contains(&line.id));
        Ok((before - lines.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LineItemKind, Money, ProductId};

    fn physical(order_id: OrderId) -> OrderItem {
        OrderItem::new(
            order_id,
            LineItemKind::Physical {
                product_id: ProductId::new("SKU-001"),
            },
            1,
            Money::from_cents(500),
        )
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let repo = InMemoryOrderRepository::new();
        let order = Order::new(UserId::new(), None, None, Money::from_cents(500));
        repo.create_order(&order).await.unwrap();

        let first = repo
            .transition_status(order.id, OrderStatus::Paid, Some("PAY-1"))
            .await
            .unwrap();
        assert!(first.is_applied());

        let second = repo
            .transition_status(order.id, OrderStatus::Paid, Some("PAY-2"))
            .await
            .unwrap();
        assert_eq!(
            second,
            Transition::Unchanged {
                current: OrderStatus::Paid
            }
        );

        let stored = repo.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_reference.as_deref(), Some("PAY-1"));
    }

    #[tokio::test]
    async fn test_transition_unknown_order() {
        let repo = InMemoryOrderRepository::new();
        let result = repo
            .transition_status(OrderId::new(), OrderStatus::Paid, None)
            .await;
        assert!(matches!(result, Err(DomainError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let repo = InMemoryOrderRepository::new();
        let order = Order::new(UserId::new(), None, None, Money::from_cents(500));
        repo.create_order(&order).await.unwrap();
        repo.insert_items(order.id, &[physical(order.id)], &[])
            .await
            .unwrap();

        repo.delete_order(order.id).await.unwrap();

        assert!(repo.get_order(order.id).await.unwrap().is_none());
        assert!(repo.items_for_order(order.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_insert_writes_nothing() {
        let repo = InMemoryOrderRepository::new();
        let order = Order::new(UserId::new(), None, None, Money::from_cents(500));
        repo.create_order(&order).await.unwrap();
        repo.set_fail_on_insert_items(true).await;

        let result = repo.insert_items(order.id, &[physical(order.id)], &[]).await;
        assert!(result.is_err());
        assert!(repo.items_for_order(order.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_order_rejects_checkout_writes() {
        let repo = InMemoryOrderRepository::new();
        let order = Order::new(UserId::new(), None, None, Money::from_cents(500));
        repo.create_order(&order).await.unwrap();
        repo.transition_status(order.id, OrderStatus::Cancelled, None)
            .await
            .unwrap();

        let items = repo.insert_items(order.id, &[physical(order.id)], &[]).await;
        assert!(matches!(
            items,
            Err(DomainError::OrderClosed {
                status: OrderStatus::Cancelled,
                ..
            })
        ));
        let session = repo.set_payment_session(order.id, "INV-1", None).await;
        assert!(matches!(session, Err(DomainError::OrderClosed { .. })));

        assert!(repo.items_for_order(order.id).await.unwrap().is_empty());
        let stored = repo.get_order(order.id).await.unwrap().unwrap();
        assert!(stored.payment_invoice_id.is_none());
    }

    #[tokio::test]
    async fn test_lookup_by_payment_identifiers() {
        let repo = InMemoryOrderRepository::new();
        let order = Order::new(UserId::new(), None, None, Money::from_cents(500));
        repo.create_order(&order).await.unwrap();
        repo.set_payment_session(order.id, "INV-1", Some("REF-1"))
            .await
            .unwrap();

        let by_invoice = repo.find_by_invoice_id("INV-1").await.unwrap().unwrap();
        let by_reference = repo.find_by_payment_reference("REF-1").await.unwrap().unwrap();
        assert_eq!(by_invoice.id, order.id);
        assert_eq!(by_reference.id, order.id);
        assert!(repo.find_by_invoice_id("INV-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_lines_keeps_the_rest() {
        let carts = InMemoryCartRepository::new();
        let user = UserId::new();
        let checked_out = CartLine::product("SKU-001", 1, Money::from_cents(100));
        let added_later = CartLine::product("SKU-002", 1, Money::from_cents(200));
        carts.add_line(user, checked_out.clone()).await.unwrap();
        carts.add_line(user, added_later.clone()).await.unwrap();

        let removed = carts.remove_lines(user, &[checked_out.id]).await.unwrap();
        assert_eq!(removed, 1);

        let remaining = carts.active_cart(user).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, added_later.id);
        assert_eq!(carts.remove_lines(UserId::new(), &[added_later.id]).await.unwrap(), 0);
    }
}
