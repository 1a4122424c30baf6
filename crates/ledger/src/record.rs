use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LedgerError, OrderHolding, ProductId, Result};

/// Live stock counters for one product.
///
/// Invariant: `0 <= reserved_quantity <= quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    /// The product these counters belong to.
    pub product_id: ProductId,

    /// Owned stock, including units promised to unconfirmed orders.
    pub quantity: i64,

    /// Units held for orders that have not been paid yet.
    pub reserved_quantity: i64,

    /// Availability at or below this level is reported as low stock.
    pub low_stock_threshold: i64,

    /// Last time any counter changed.
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    /// Creates a record with no reservations.
    pub fn new(product_id: impl Into<ProductId>, quantity: i64, low_stock_threshold: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity: quantity.max(0),
            reserved_quantity: 0,
            low_stock_threshold: low_stock_threshold.max(0),
            updated_at: Utc::now(),
        }
    }

    /// Units that can still be reserved.
    pub fn available(&self) -> i64 {
        self.quantity - self.reserved_quantity
    }

    /// True when availability has dropped to the low-stock threshold.
    pub fn is_low_stock(&self) -> bool {
        self.available() <= self.low_stock_threshold
    }

    /// Moves `quantity` units from available into reserved.
    ///
    /// Returns the availability left after the reservation.
    pub fn reserve(&mut self, quantity: u32) -> Result<i64> {
        let requested = self.checked_amount(quantity)?;
        let available = self.available();
        if available < requested {
            return Err(LedgerError::InsufficientStock {
                product_id: self.product_id.clone(),
                available,
                requested,
            });
        }
        self.reserved_quantity += requested;
        self.touch();
        Ok(self.available())
    }

    /// Converts `quantity` reserved units into a permanent sale.
    ///
    /// Fails when fewer than `quantity` units are reserved, so replaying a
    /// deduction that already happened cannot shrink stock twice.
    pub fn deduct(&mut self, quantity: u32) -> Result<()> {
        let requested = self.checked_amount(quantity)?;
        if self.reserved_quantity < requested {
            return Err(LedgerError::InsufficientReservedStock {
                product_id: self.product_id.clone(),
                reserved: self.reserved_quantity,
                requested,
            });
        }
        self.quantity -= requested;
        self.reserved_quantity -= requested;
        self.touch();
        Ok(())
    }

    /// Returns up to `quantity` reserved units to the available pool.
    ///
    /// Clamped to the current reservation; returns the units released.
    pub fn release(&mut self, quantity: u32) -> Result<i64> {
        let requested = self.checked_amount(quantity)?;
        let released = requested.min(self.reserved_quantity);
        self.reserved_quantity -= released;
        self.touch();
        Ok(released)
    }

    /// Deducts an order's reservation as part of a batch.
    ///
    /// Returns `None` when the order already deducted this product, so a
    /// repeated settlement changes nothing. Fails if the order holds fewer
    /// than `quantity` units.
    pub fn deduct_held(&mut self, quantity: u32, holding: &OrderHolding) -> Result<Option<i64>> {
        let requested = self.checked_amount(quantity)?;
        if holding.is_deducted() {
            return Ok(None);
        }
        let held = holding.outstanding().min(self.reserved_quantity);
        if held < requested {
            return Err(LedgerError::InsufficientReservedStock {
                product_id: self.product_id.clone(),
                reserved: held,
                requested,
            });
        }
        self.deduct(quantity)?;
        Ok(Some(requested))
    }

    /// Releases what an order still holds, up to `quantity`.
    ///
    /// Returns `None` when the order holds nothing, so units reserved by
    /// other orders are never returned to the pool.
    pub fn release_held(&mut self, quantity: u32, holding: &OrderHolding) -> Result<Option<i64>> {
        let requested = self.checked_amount(quantity)?;
        let amount = requested.min(holding.outstanding());
        if amount == 0 {
            return Ok(None);
        }
        let amount = u32::try_from(amount).unwrap_or(quantity);
        self.release(amount).map(Some)
    }

    /// Applies an operator correction to owned stock.
    ///
    /// Owned stock never drops below the reserved count (and so never below
    /// zero). Returns the delta actually applied.
    pub fn adjust(&mut self, delta: i64) -> i64 {
        let target = self.quantity.saturating_add(delta).max(self.reserved_quantity);
        let applied = target - self.quantity;
        self.quantity = target;
        self.touch();
        applied
    }

    fn checked_amount(&self, quantity: u32) -> Result<i64> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity {
                product_id: self.product_id.clone(),
                quantity,
            });
        }
        Ok(i64::from(quantity))
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Emits the advisory low-stock signal if the threshold is crossed.
    pub(crate) fn report_low_stock(&self) {
        if self.is_low_stock() {
            metrics::counter!("inventory_low_stock_total").increment(1);
            tracing::warn!(
                product_id = %self.product_id,
                available = self.available(),
                threshold = self.low_stock_threshold,
                "product at or below low-stock threshold"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_subtracts_reserved() {
        let mut record = InventoryRecord::new("SKU-001", 10, 2);
        record.reserved_quantity = 4;
        assert_eq!(record.available(), 6);
        assert!(!record.is_low_stock());

        record.reserved_quantity = 8;
        assert!(record.is_low_stock());
    }

    #[test]
    fn test_reserve_rejects_when_available_is_short() {
        let mut record = InventoryRecord::new("SKU-001", 3, 0);
        let err = record.reserve(5).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                available: 3,
                requested: 5,
                ..
            }
        ));
        assert_eq!(record.reserved_quantity, 0);
    }

    #[test]
    fn test_reserve_then_deduct() {
        let mut record = InventoryRecord::new("SKU-001", 10, 0);
        assert_eq!(record.reserve(2).unwrap(), 8);
        record.deduct(2).unwrap();
        assert_eq!(record.quantity, 8);
        assert_eq!(record.reserved_quantity, 0);
    }

    #[test]
    fn test_second_deduct_fails() {
        let mut record = InventoryRecord::new("SKU-001", 10, 0);
        record.reserve(2).unwrap();
        record.deduct(2).unwrap();
        let err = record.deduct(2).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientReservedStock { .. }));
        assert_eq!(record.quantity, 8);
    }

    #[test]
    fn test_release_is_clamped() {
        let mut record = InventoryRecord::new("SKU-001", 10, 0);
        record.reserve(3).unwrap();
        assert_eq!(record.release(5).unwrap(), 3);
        assert_eq!(record.release(5).unwrap(), 0);
        assert_eq!(record.reserved_quantity, 0);
    }

    #[test]
    fn test_zero_quantity_is_rejected() {
        let mut record = InventoryRecord::new("SKU-001", 10, 0);
        assert!(matches!(
            record.reserve(0),
            Err(LedgerError::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn test_adjust_floors_at_reserved() {
        let mut record = InventoryRecord::new("SKU-001", 10, 0);
        assert_eq!(record.adjust(-25), -10);
        assert_eq!(record.quantity, 0);

        let mut record = InventoryRecord::new("SKU-001", 10, 0);
        record.reserve(4).unwrap();
        assert_eq!(record.adjust(-25), -6);
        assert_eq!(record.quantity, 4);
        assert_eq!(record.reserved_quantity, 4);

        assert_eq!(record.adjust(6), 6);
        assert_eq!(record.quantity, 10);
    }

    #[test]
    fn test_new_clamps_negative_values() {
        let record = InventoryRecord::new("SKU-001", -5, -1);
        assert_eq!(record.quantity, 0);
        assert_eq!(record.low_stock_threshold, 0);
    }

    #[test]
    fn test_deduct_held_skips_settled_order() {
        let mut record = InventoryRecord::new("SKU-001", 10, 0);
        record.reserve(2).unwrap();
        let holding = OrderHolding {
            reserved: 2,
            ..OrderHolding::default()
        };
        assert_eq!(record.deduct_held(2, &holding).unwrap(), Some(2));

        let settled = OrderHolding {
            reserved: 2,
            deducted: 2,
            ..OrderHolding::default()
        };
        assert_eq!(record.deduct_held(2, &settled).unwrap(), None);
        assert_eq!(record.quantity, 8);
    }

    #[test]
    fn test_deduct_held_requires_own_reservation() {
        let mut record = InventoryRecord::new("SKU-001", 10, 0);
        record.reserve(4).unwrap();
        let err = record
            .deduct_held(2, &OrderHolding::default())
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientReservedStock { reserved: 0, .. }
        ));
        assert_eq!(record.reserved_quantity, 4);
    }

    #[test]
    fn test_release_held_leaves_other_orders_alone() {
        let mut record = InventoryRecord::new("SKU-001", 10, 0);
        record.reserve(5).unwrap();
        let holding = OrderHolding {
            reserved: 2,
            ..OrderHolding::default()
        };
        assert_eq!(record.release_held(5, &holding).unwrap(), Some(2));
        assert_eq!(record.reserved_quantity, 3);

        let released = OrderHolding {
            reserved: 2,
            released: 2,
            ..OrderHolding::default()
        };
        assert_eq!(record.release_held(5, &released).unwrap(), None);
        assert_eq!(record.reserved_quantity, 3);
    }
}
