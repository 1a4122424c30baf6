//! Checkout endpoint.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use checkout::{CheckoutRequest, CheckoutSession, Identity};
use serde::Serialize;

use super::{EMAIL_VERIFIED_HEADER, caller_id, header_str, optional_json};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order_id: String,
    pub invoice_id: String,
    pub payment_url: String,
    pub total_cents: i64,
}

impl From<CheckoutSession> for CheckoutResponse {
    fn from(session: CheckoutSession) -> Self {
        Self {
            order_id: session.order_id.to_string(),
            invoice_id: session.invoice_id,
            payment_url: session.payment_url,
            total_cents: session.total.cents(),
        }
    }
}

fn identity(headers: &HeaderMap) -> Result<Identity, ApiError> {
    let user_id = caller_id(headers)?;
    let verified = header_str(headers, EMAIL_VERIFIED_HEADER)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false);
    Ok(Identity {
        user_id,
        email_verified: verified,
    })
}

/// POST /checkout: turn the caller's cart into an order and open a payment
/// session. The body is optional.
#[tracing::instrument(skip(state, headers, body))]
pub async fn begin(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let identity = identity(&headers)?;
    let request: CheckoutRequest = optional_json(&body)?;

    let session = state.orchestrator.begin_checkout(&identity, request).await?;
    Ok((StatusCode::CREATED, Json(session.into())))
}
