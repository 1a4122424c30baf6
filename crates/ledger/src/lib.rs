//! Inventory ledger for the storefront checkout system.
//!
//! The ledger is the only writer of per-product stock counters. Every
//! operation runs as one atomic unit against a locked product record and
//! appends an [`InventoryMovement`] to the audit trail.

pub mod error;
pub mod ledger;
pub mod memory;
pub mod movement;
pub mod postgres;
pub mod record;

pub use common::{OrderId, ProductId, UserId};
pub use error::{LedgerError, Result};
pub use ledger::{InventoryLedger, InventoryLedgerExt, StockItem, normalize_items};
pub use memory::InMemoryLedger;
pub use movement::{InventoryMovement, MovementId, MovementKind, OrderHolding};
pub use postgres::PostgresLedger;
pub use record::InventoryRecord;
