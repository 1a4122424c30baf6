//! Checkout error types.

use domain::DomainError;
use ledger::LedgerError;
use thiserror::Error;

use crate::UserId;

/// Errors that can occur during checkout, reconciliation and operator actions.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The user's cart has no lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// The identity layer has not confirmed the user's email.
    #[error("User {0} has not verified their email")]
    UnverifiedIdentity(UserId),

    /// The external payment gateway failed or answered with an unusable
    /// response.
    #[error("Payment gateway error: {0}")]
    PaymentGateway(String),

    /// No order matches the supplied identifier.
    #[error("Order not found for {0}")]
    OrderNotFound(String),

    /// The webhook signature is missing, stale or wrong.
    #[error("Invalid webhook signature: {0}")]
    InvalidWebhookSignature(String),

    /// The notification body or query carries no usable payment identifier.
    #[error("Malformed payment notification: {0}")]
    MalformedNotification(String),

    /// A notification could not be delivered.
    #[error("Notification error: {0}")]
    Notification(String),

    /// Inventory ledger error.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Domain or repository error.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl CheckoutError {
    /// Short label used for the `reason` metric dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            CheckoutError::EmptyCart => "empty_cart",
            CheckoutError::UnverifiedIdentity(_) => "unverified_identity",
            CheckoutError::PaymentGateway(_) => "payment_gateway",
            CheckoutError::OrderNotFound(_) => "order_not_found",
            CheckoutError::InvalidWebhookSignature(_) => "invalid_signature",
            CheckoutError::MalformedNotification(_) => "malformed_notification",
            CheckoutError::Notification(_) => "notification",
            CheckoutError::Ledger(e) => e.reason(),
            CheckoutError::Domain(DomainError::InvalidLineItem(_)) => "invalid_line_item",
            CheckoutError::Domain(DomainError::InvalidTransition { .. }) => "invalid_transition",
            CheckoutError::Domain(DomainError::OrderNotFound(_)) => "order_not_found",
            CheckoutError::Domain(DomainError::OrderClosed { .. }) => "order_closed",
            CheckoutError::Domain(_) => "storage",
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProductId;

    #[test]
    fn test_ledger_reason_passes_through() {
        let err: CheckoutError = LedgerError::InsufficientStock {
            product_id: ProductId::new("SKU-001"),
            available: 3,
            requested: 5,
        }
        .into();
        assert_eq!(err.reason(), "insufficient_stock");
        assert!(err.to_string().contains("SKU-001"));
    }

    #[test]
    fn test_reason_labels() {
        assert_eq!(CheckoutError::EmptyCart.reason(), "empty_cart");
        let closed: CheckoutError = DomainError::OrderClosed {
            order_id: crate::OrderId::new(),
            status: domain::OrderStatus::Cancelled,
        }
        .into();
        assert_eq!(closed.reason(), "order_closed");
        assert_eq!(
            CheckoutError::UnverifiedIdentity(UserId::new()).reason(),
            "unverified_identity"
        );
    }
}
