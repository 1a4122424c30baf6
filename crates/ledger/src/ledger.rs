use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    InventoryMovement, InventoryRecord, LedgerError, OrderId, ProductId, Result, UserId,
};

/// A product quantity inside a batch ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl StockItem {
    /// Creates a new stock item.
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Core trait for inventory ledger implementations.
///
/// Every method is one atomic unit: the product record is locked for the
/// duration of the call, the counters and the movement log change together
/// or not at all. Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Creates the record for a product, or resets its owned quantity and
    /// threshold if it exists. Reservations are kept.
    async fn upsert_product(
        &self,
        product_id: ProductId,
        quantity: i64,
        low_stock_threshold: i64,
    ) -> Result<InventoryRecord>;

    /// Reads the current counters for a product.
    async fn stock(&self, product_id: &ProductId) -> Result<InventoryRecord>;

    /// Holds `quantity` units for an order.
    ///
    /// Fails with `InsufficientStock` and changes nothing when availability
    /// is short. Returns the availability left.
    async fn reserve(&self, product_id: &ProductId, quantity: u32, order_id: OrderId)
    -> Result<i64>;

    /// Turns `quantity` reserved units into a permanent sale.
    ///
    /// Fails with `InsufficientReservedStock` if no matching reservation
    /// exists.
    async fn deduct(
        &self,
        product_id: &ProductId,
        quantity: u32,
        order_id: OrderId,
    ) -> Result<InventoryRecord>;

    /// Returns up to `quantity` reserved units to the pool. Safe to repeat.
    ///
    /// Returns the units actually released.
    async fn release(&self, product_id: &ProductId, quantity: u32, order_id: OrderId)
    -> Result<i64>;

    /// Operator correction of owned stock. Never touches reservations.
    async fn adjust_admin(
        &self,
        product_id: &ProductId,
        delta: i64,
        reason: &str,
        actor_id: UserId,
    ) -> Result<InventoryRecord>;

    /// Reserves every item or none of them.
    ///
    /// On the first failure the whole batch is rolled back and that item's
    /// error is returned.
    async fn reserve_all(&self, items: &[StockItem], order_id: OrderId) -> Result<()>;

    /// Deducts the order's reservation for every item, or for none of them.
    ///
    /// Products the order already deducted are skipped, so settling an order
    /// twice deducts once. Fails with `InsufficientReservedStock` if the
    /// order holds fewer units than requested. Returns the units deducted by
    /// this call.
    async fn deduct_all(&self, items: &[StockItem], order_id: OrderId) -> Result<i64>;

    /// Releases what the order still holds of every item, in one unit.
    ///
    /// Clamped per item to the order's own outstanding reservation, so it is
    /// safe to repeat and never frees units held by other orders. Returns the
    /// units released by this call.
    async fn release_all(&self, items: &[StockItem], order_id: OrderId) -> Result<i64>;

    /// Returns the audit trail for a product, oldest first.
    async fn movements(&self, product_id: &ProductId) -> Result<Vec<InventoryMovement>>;
}

/// Extension trait providing convenience methods for ledgers.
#[async_trait]
pub trait InventoryLedgerExt: InventoryLedger {
    /// Units of a product that can still be reserved.
    async fn available(&self, product_id: &ProductId) -> Result<i64> {
        Ok(self.stock(product_id).await?.available())
    }
}

// Blanket implementation for all InventoryLedger implementations
impl<T: InventoryLedger + ?Sized> InventoryLedgerExt for T {}

/// Prepares a batch for locking.
///
/// Lines for the same product are merged and the result is sorted by
/// product id, so concurrent batches over overlapping products always lock
/// rows in the same order.
pub fn normalize_items(items: &[StockItem]) -> Result<Vec<StockItem>> {
    let mut merged: BTreeMap<ProductId, u32> = BTreeMap::new();
    for item in items {
        if item.quantity == 0 {
            return Err(LedgerError::InvalidQuantity {
                product_id: item.product_id.clone(),
                quantity: 0,
            });
        }
        let entry = merged.entry(item.product_id.clone()).or_insert(0);
        *entry = entry.saturating_add(item.quantity);
    }

    Ok(merged
        .into_iter()
        .map(|(product_id, quantity)| StockItem {
            product_id,
            quantity,
        })
        .collect())
}
