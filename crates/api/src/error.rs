//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;
use domain::DomainError;
use ledger::LedgerError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Caller identity is missing or unreadable.
    Unauthorized(String),
    /// Checkout, reconciliation or operator error.
    Checkout(CheckoutError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Checkout(err) => (checkout_status(err), err.reason()),
        }
    }
}

fn checkout_status(err: &CheckoutError) -> StatusCode {
    match err {
        CheckoutError::EmptyCart | CheckoutError::MalformedNotification(_) => {
            StatusCode::BAD_REQUEST
        }
        CheckoutError::UnverifiedIdentity(_) => StatusCode::FORBIDDEN,
        CheckoutError::InvalidWebhookSignature(_) => StatusCode::UNAUTHORIZED,
        CheckoutError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        CheckoutError::PaymentGateway(_) => StatusCode::BAD_GATEWAY,
        CheckoutError::Ledger(ledger_err) => match ledger_err {
            LedgerError::ProductNotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::InsufficientStock { .. }
            | LedgerError::InsufficientReservedStock { .. } => StatusCode::CONFLICT,
            LedgerError::InvalidQuantity { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        CheckoutError::Domain(domain_err) => match domain_err {
            DomainError::OrderNotFound(_) => StatusCode::NOT_FOUND,
            DomainError::InvalidTransition { .. } | DomainError::OrderClosed { .. } => {
                StatusCode::CONFLICT
            }
            DomainError::InvalidLineItem(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        CheckoutError::Notification(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match self {
            ApiError::BadRequest(msg) | ApiError::Unauthorized(msg) => msg,
            ApiError::Checkout(err) => err.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, code, "internal server error");
        }

        let body = serde_json::json!({ "error": message, "code": code });
        (status, axum::Json(body)).into_response()
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Checkout(CheckoutError::Ledger(err))
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Checkout(CheckoutError::Domain(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, ProductId, UserId};
    use domain::OrderStatus;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().status_and_code().0
    }

    #[test]
    fn test_client_errors() {
        assert_eq!(status_of(CheckoutError::EmptyCart), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(CheckoutError::UnverifiedIdentity(UserId::new())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(CheckoutError::InvalidWebhookSignature("stale".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(DomainError::InvalidLineItem("zero quantity".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_conflicts_and_missing_resources() {
        let short = LedgerError::InsufficientStock {
            product_id: ProductId::new("SKU-1"),
            requested: 3,
            available: 1,
        };
        assert_eq!(status_of(short), StatusCode::CONFLICT);
        assert_eq!(
            status_of(DomainError::InvalidTransition {
                order_id: OrderId::new(),
                from: OrderStatus::Cancelled,
                to: OrderStatus::Paid,
            }),
            StatusCode::CONFLICT
        );
        let closed = ApiError::from(DomainError::OrderClosed {
            order_id: OrderId::new(),
            status: OrderStatus::Cancelled,
        });
        assert_eq!(closed.status_and_code(), (StatusCode::CONFLICT, "order_closed"));
        assert_eq!(
            status_of(DomainError::OrderNotFound(OrderId::new())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(LedgerError::ProductNotFound(ProductId::new("SKU-1"))),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_gateway_failure_is_bad_gateway() {
        let err = ApiError::from(CheckoutError::PaymentGateway("timeout".into()));
        assert_eq!(err.status_and_code(), (StatusCode::BAD_GATEWAY, "payment_gateway"));
    }
}
