//! Server-side cart rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{LineItemKind, Money, ProductId, Result};

/// One row of a user's active cart.
///
/// The unit price is set by the server when the row is added; checkout
/// trusts it, never a client-supplied total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: Uuid,
    pub product_id: Option<ProductId>,
    pub quantity: u32,
    pub unit_price: Money,
    /// Raw structured payload, e.g. subscription plan parameters.
    pub meta: Option<serde_json::Value>,
    pub added_at: DateTime<Utc>,
}

impl CartLine {
    /// A plain catalog product line.
    pub fn product(product_id: impl Into<ProductId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id: Some(product_id.into()),
            quantity,
            unit_price,
            meta: None,
            added_at: Utc::now(),
        }
    }

    /// A line carrying a structured payload, with or without a product.
    pub fn with_meta(
        product_id: Option<ProductId>,
        quantity: u32,
        unit_price: Money,
        meta: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            quantity,
            unit_price,
            meta: Some(meta),
            added_at: Utc::now(),
        }
    }

    /// Translates the row into a typed line item kind.
    pub fn line_kind(&self) -> Result<LineItemKind> {
        LineItemKind::from_parts(self.product_id.clone(), self.meta.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_line_kind() {
        let line = CartLine::product("SKU-001", 2, Money::from_cents(500));
        assert!(matches!(
            line.line_kind().unwrap(),
            LineItemKind::Physical { .. }
        ));
    }

    #[test]
    fn test_subscription_line_kind() {
        let line = CartLine::with_meta(
            None,
            1,
            Money::from_cents(4500),
            serde_json::json!({
                "type": "subscription",
                "plan_type": "weekly",
                "daily_grams": 100,
                "pouches_per_day": 2
            }),
        );
        assert!(line.line_kind().unwrap().subscription_plan().is_some());
    }
}
