//! Operator inventory endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use checkout::ProductId;
use ledger::{InventoryMovement, InventoryRecord};
use serde::{Deserialize, Serialize};

use super::caller_id;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub delta: i64,
    pub reason: String,
}

#[derive(Serialize)]
pub struct StockResponse {
    pub product_id: String,
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub available: i64,
    pub low_stock_threshold: i64,
    pub low_stock: bool,
    pub updated_at: String,
}

impl From<InventoryRecord> for StockResponse {
    fn from(record: InventoryRecord) -> Self {
        Self {
            available: record.available(),
            low_stock: record.is_low_stock(),
            product_id: record.product_id.to_string(),
            quantity: record.quantity,
            reserved_quantity: record.reserved_quantity,
            low_stock_threshold: record.low_stock_threshold,
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

/// GET /inventory/{product_id}: current stock counters.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
) -> Result<Json<StockResponse>, ApiError> {
    let record = state.ledger.stock(&ProductId::new(product_id)).await?;
    Ok(Json(record.into()))
}

/// POST /inventory/{product_id}/adjust: operator correction. The actor is
/// the caller named by the identity headers.
#[tracing::instrument(skip(state, headers, req))]
pub async fn adjust(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AdjustRequest>,
) -> Result<Json<StockResponse>, ApiError> {
    let actor_id = caller_id(&headers)?;
    let reason = req.reason.trim();
    if reason.is_empty() {
        return Err(ApiError::BadRequest("reason is required".to_string()));
    }
    if req.delta == 0 {
        return Err(ApiError::BadRequest("delta must not be zero".to_string()));
    }

    let record = state
        .operator
        .adjust_stock(&ProductId::new(product_id), req.delta, reason, actor_id)
        .await?;
    Ok(Json(record.into()))
}

/// GET /inventory/{product_id}/movements: audit trail, oldest first.
#[tracing::instrument(skip(state))]
pub async fn movements(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
) -> Result<Json<Vec<InventoryMovement>>, ApiError> {
    let movements = state.ledger.movements(&ProductId::new(product_id)).await?;
    Ok(Json(movements))
}
