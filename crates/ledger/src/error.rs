use thiserror::Error;

use crate::ProductId;

/// Errors returned by inventory ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No inventory record exists for the product.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// Not enough unreserved stock to satisfy a reservation.
    #[error(
        "Insufficient stock for {product_id}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: ProductId,
        available: i64,
        requested: i64,
    },

    /// A deduction was attempted without a matching reservation.
    #[error(
        "Insufficient reserved stock for {product_id}: reserved {reserved}, requested {requested}"
    )]
    InsufficientReservedStock {
        product_id: ProductId,
        reserved: i64,
        requested: i64,
    },

    /// Requested amount was zero.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl LedgerError {
    /// Short machine-readable reason, used as a metrics label.
    pub fn reason(&self) -> &'static str {
        match self {
            LedgerError::ProductNotFound(_) => "product_not_found",
            LedgerError::InsufficientStock { .. } => "insufficient_stock",
            LedgerError::InsufficientReservedStock { .. } => "insufficient_reserved_stock",
            LedgerError::InvalidQuantity { .. } => "invalid_quantity",
            LedgerError::Database(_) => "database",
            LedgerError::Migration(_) => "migration",
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
