use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{OrderId, ProductId, UserId};

/// Unique identifier for a movement log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(Uuid);

impl MovementId {
    /// Creates a new random movement ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a movement ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MovementId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MovementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a movement did to the stock counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Units moved from available into reserved.
    Reserve,
    /// Reserved units sold: both counters decreased.
    Deduct,
    /// Reserved units returned to the available pool.
    Release,
    /// Operator correction of owned stock.
    Adjust,
}

impl MovementKind {
    /// Returns the kind as stored in the movement log.
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Reserve => "reserve",
            MovementKind::Deduct => "deduct",
            MovementKind::Release => "release",
            MovementKind::Adjust => "adjust",
        }
    }

    /// Parses a stored kind.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reserve" => Some(MovementKind::Reserve),
            "deduct" => Some(MovementKind::Deduct),
            "release" => Some(MovementKind::Release),
            "adjust" => Some(MovementKind::Adjust),
            _ => None,
        }
    }
}

impl std::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable entry in the inventory audit trail.
///
/// Movements are written by the ledger in the same transaction as the
/// counter change they describe. Batch deduct and release read an order's
/// own movements back (see [`OrderHolding`]); nothing else consults them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: MovementId,
    pub product_id: ProductId,
    /// Order that caused the movement; `None` for operator adjustments.
    pub order_id: Option<OrderId>,
    pub kind: MovementKind,
    /// Units moved. Signed for adjustments, positive otherwise.
    pub amount: i64,
    pub reason: Option<String>,
    pub actor_id: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

impl InventoryMovement {
    /// Records a reserve, deduct or release made on behalf of an order.
    pub fn for_order(
        product_id: ProductId,
        order_id: OrderId,
        kind: MovementKind,
        amount: i64,
    ) -> Self {
        Self {
            id: MovementId::new(),
            product_id,
            order_id: Some(order_id),
            kind,
            amount,
            reason: None,
            actor_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Records an operator adjustment.
    pub fn adjustment(
        product_id: ProductId,
        delta: i64,
        reason: impl Into<String>,
        actor_id: UserId,
    ) -> Self {
        Self {
            id: MovementId::new(),
            product_id,
            order_id: None,
            kind: MovementKind::Adjust,
            amount: delta,
            reason: Some(reason.into()),
            actor_id: Some(actor_id),
            timestamp: Utc::now(),
        }
    }
}

/// Running totals of one order's movements on one product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderHolding {
    pub reserved: i64,
    pub released: i64,
    pub deducted: i64,
}

impl OrderHolding {
    /// Sums the reserve, release and deduct movements given.
    pub fn tally<'a>(movements: impl IntoIterator<Item = &'a InventoryMovement>) -> Self {
        movements
            .into_iter()
            .fold(Self::default(), |mut holding, movement| {
                match movement.kind {
                    MovementKind::Reserve => holding.reserved += movement.amount,
                    MovementKind::Release => holding.released += movement.amount,
                    MovementKind::Deduct => holding.deducted += movement.amount,
                    MovementKind::Adjust => {}
                }
                holding
            })
    }

    /// Units the order still holds in reserve.
    pub fn outstanding(&self) -> i64 {
        (self.reserved - self.released - self.deducted).max(0)
    }

    /// True once the order's reservation has been turned into a sale.
    pub fn is_deducted(&self) -> bool {
        self.deducted > 0
    }
}
