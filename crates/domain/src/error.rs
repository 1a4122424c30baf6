//! Domain error types.

use thiserror::Error;

use crate::{OrderId, OrderStatus};

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order's status does not allow the requested transition.
    #[error("Invalid transition for order {order_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// The order has left `created` and no longer accepts checkout writes.
    #[error("Order {order_id} is {status}, not open for checkout")]
    OrderClosed {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// A cart or order line could not be interpreted.
    #[error("Invalid line item: {0}")]
    InvalidLineItem(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
