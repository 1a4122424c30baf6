//! Order and order line records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{LineItemKind, OrderStatus};
use crate::{Money, OrderId, OrderItemId, PetId, ProductId, UserId};

/// An order created at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub pet_id: Option<PetId>,
    /// Contact phone handed to the payment gateway.
    pub phone: Option<String>,
    pub status: OrderStatus,
    /// Computed server-side from line prices.
    pub total_amount: Money,
    pub payment_invoice_id: Option<String>,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new order in `created` status.
    pub fn new(
        user_id: UserId,
        pet_id: Option<PetId>,
        phone: Option<String>,
        total_amount: Money,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::new(),
            user_id,
            pet_id,
            phone,
            status: OrderStatus::Created,
            total_amount,
            payment_invoice_id: None,
            payment_reference: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One line of an order. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub kind: LineItemKind,
    pub quantity: u32,
    /// Price captured at checkout time.
    pub unit_price: Money,
    /// The cart line this order line was built from.
    #[serde(default)]
    pub cart_line_id: Option<Uuid>,
}

impl OrderItem {
    /// Creates a new order line.
    pub fn new(order_id: OrderId, kind: LineItemKind, quantity: u32, unit_price: Money) -> Self {
        Self {
            id: OrderItemId::new(),
            order_id,
            kind,
            quantity,
            unit_price,
            cart_line_id: None,
        }
    }

    /// Records the cart line this order line came from.
    pub fn with_cart_line(mut self, cart_line_id: Uuid) -> Self {
        self.cart_line_id = Some(cart_line_id);
        self
    }

    /// The catalog product whose stock this line consumes, if any.
    pub fn stock_product(&self) -> Option<&ProductId> {
        self.kind.stock_product()
    }

    /// Returns `quantity * unit_price`, or `None` on overflow.
    pub fn total_price(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }
}
