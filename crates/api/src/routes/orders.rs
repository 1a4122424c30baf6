//! Operator order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use checkout::{OrderDetails, OrderId};
use chrono::{Duration, Utc};
use domain::{LineItemKind, Order, Subscription};
use serde::{Deserialize, Serialize};

use super::optional_json;
use crate::error::ApiError;
use crate::state::AppState;

/// Orders left in `created` longer than this are expired by default.
const DEFAULT_EXPIRY_MINUTES: i64 = 60;

// -- Request types --

#[derive(Debug, Default, Deserialize)]
pub struct ExpireRequest {
    pub older_than_minutes: Option<i64>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub pet_id: Option<String>,
    pub status: String,
    pub total_cents: i64,
    pub payment_invoice_id: Option<String>,
    pub payment_reference: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            user_id: order.user_id.to_string(),
            pet_id: order.pet_id.map(|p| p.to_string()),
            status: order.status.to_string(),
            total_cents: order.total_amount.cents(),
            payment_invoice_id: order.payment_invoice_id,
            payment_reference: order.payment_reference,
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub id: String,
    #[serde(flatten)]
    pub kind: LineItemKind,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Serialize)]
pub struct OrderDetailsResponse {
    #[serde(flatten)]
    pub order: OrderResponse,
    pub items: Vec<OrderItemResponse>,
    pub subscriptions: Vec<Subscription>,
}

impl From<OrderDetails> for OrderDetailsResponse {
    fn from(details: OrderDetails) -> Self {
        let items = details
            .items
            .into_iter()
            .map(|item| OrderItemResponse {
                id: item.id.to_string(),
                kind: item.kind,
                quantity: item.quantity,
                unit_price_cents: item.unit_price.cents(),
            })
            .collect();
        Self {
            order: details.order.into(),
            items,
            subscriptions: details.subscriptions,
        }
    }
}

#[derive(Serialize)]
pub struct ExpireResponse {
    pub expired: Vec<String>,
}

// -- Handlers --

/// GET /orders/{id}: order with its lines and subscriptions.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderDetailsResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let details = state.operator.order_details(order_id).await?;
    Ok(Json(details.into()))
}

/// POST /orders/{id}/fulfill: mark a paid order as shipped.
#[tracing::instrument(skip(state))]
pub async fn fulfill(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.operator.fulfill(order_id).await?;
    Ok(Json(order.into()))
}

/// POST /orders/{id}/cancel: cancel a created or paid order.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.operator.cancel(order_id).await?;
    Ok(Json(order.into()))
}

/// POST /orders/expire: cancel abandoned checkouts and release their stock.
#[tracing::instrument(skip(state, body))]
pub async fn expire(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ExpireResponse>, ApiError> {
    let request: ExpireRequest = optional_json(&body)?;
    let minutes = request.older_than_minutes.unwrap_or(DEFAULT_EXPIRY_MINUTES);
    if minutes < 0 {
        return Err(ApiError::BadRequest(
            "older_than_minutes must not be negative".to_string(),
        ));
    }

    let cutoff = Utc::now() - Duration::minutes(minutes);
    let expired = state.operator.expire_abandoned(cutoff).await?;
    Ok(Json(ExpireResponse {
        expired: expired.iter().map(ToString::to_string).collect(),
    }))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))
}
