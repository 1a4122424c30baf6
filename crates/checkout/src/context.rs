//! Shared handles to the stores and collaborators used by every workflow.

use std::sync::Arc;

use domain::{
    CartRepository, InMemoryCartRepository, InMemoryOrderRepository, OrderItem, OrderRepository,
};
use ledger::{InMemoryLedger, InventoryLedger, StockItem};

use crate::services::{
    InMemoryNotificationSink, InMemoryPaymentGateway, NotificationSink, PaymentGateway,
};

/// The backing stores and external collaborators.
///
/// Held behind trait objects so the binary can pick in-memory or PostgreSQL
/// implementations at start-up.
#[derive(Clone)]
pub struct CheckoutContext {
    pub ledger: Arc<dyn InventoryLedger>,
    pub orders: Arc<dyn OrderRepository>,
    pub carts: Arc<dyn CartRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn NotificationSink>,
}

/// In-memory stores and collaborators with handles kept for inspection.
#[derive(Clone, Default)]
pub struct InMemoryBackends {
    pub ledger: InMemoryLedger,
    pub orders: InMemoryOrderRepository,
    pub carts: InMemoryCartRepository,
    pub gateway: InMemoryPaymentGateway,
    pub notifier: InMemoryNotificationSink,
}

impl InMemoryBackends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context sharing state with these backends.
    pub fn context(&self) -> CheckoutContext {
        CheckoutContext {
            ledger: Arc::new(self.ledger.clone()),
            orders: Arc::new(self.orders.clone()),
            carts: Arc::new(self.carts.clone()),
            gateway: Arc::new(self.gateway.clone()),
            notifier: Arc::new(self.notifier.clone()),
        }
    }
}

/// Stock movements implied by an order's lines. Subscription-only lines
/// hold no stock.
pub(crate) fn stock_items(items: &[OrderItem]) -> Vec<StockItem> {
    items
        .iter()
        .filter_map(|item| {
            item.stock_product()
                .map(|product_id| StockItem::new(product_id.clone(), item.quantity))
        })
        .collect()
}
