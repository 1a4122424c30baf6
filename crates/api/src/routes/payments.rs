//! Payment notification endpoints: the signed webhook and the browser
//! redirect. Both funnel into the same reconciliation.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use checkout::{
    OrderId, PaymentNotification, ReconcileOutcome, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use serde::{Deserialize, Serialize};

use super::header_str;
use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters the gateway appends to the redirect URL.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackQuery {
    pub payment_id: Option<String>,
    pub invoice_id: Option<String>,
    pub order_id: Option<String>,
}

#[derive(Serialize)]
pub struct ReconcileResponse {
    pub order_id: String,
    pub status: String,
    pub applied: bool,
}

impl From<ReconcileOutcome> for ReconcileResponse {
    fn from(outcome: ReconcileOutcome) -> Self {
        Self {
            order_id: outcome.order_id.to_string(),
            status: outcome.status.to_string(),
            applied: outcome.applied,
        }
    }
}

/// POST /payments/webhook: signed server-to-server notification.
///
/// The signature covers the raw body, so it is read as bytes and parsed
/// only after verification.
#[tracing::instrument(skip(state, headers, body))]
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReconcileResponse>, ApiError> {
    let outcome = state
        .reconciler
        .handle_webhook(
            header_str(&headers, TIMESTAMP_HEADER),
            header_str(&headers, SIGNATURE_HEADER),
            &body,
        )
        .await?;
    Ok(Json(outcome.into()))
}

/// GET /payments/callback: unsigned browser redirect.
#[tracing::instrument(skip(state))]
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    let order_id = query
        .order_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse::<OrderId>()
                .map_err(|e| ApiError::BadRequest(format!("Invalid orderId: {e}")))
        })
        .transpose()?;

    let notification = PaymentNotification {
        invoice_id: query.invoice_id,
        payment_id: query.payment_id,
        order_id,
    };
    let outcome = state.reconciler.handle_redirect(notification).await?;
    Ok(Json(outcome.into()))
}
