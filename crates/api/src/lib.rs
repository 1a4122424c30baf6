//! HTTP API server for the storefront checkout engine.
//!
//! Exposes checkout, payment notification and operator endpoints, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use checkout::{InMemoryBackends, WebhookVerifier};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout", post(routes::checkout::begin))
        .route("/payments/webhook", post(routes::payments::webhook))
        .route("/payments/callback", get(routes::payments::callback))
        .route("/orders/expire", post(routes::orders::expire))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/fulfill", post(routes::orders::fulfill))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .route("/inventory/{product_id}", get(routes::inventory::get))
        .route(
            "/inventory/{product_id}/adjust",
            post(routes::inventory::adjust),
        )
        .route(
            "/inventory/{product_id}/movements",
            get(routes::inventory::movements),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state over in-memory stores and collaborators.
///
/// The returned backends share state with the app, so callers can seed
/// stock and carts or script gateway outcomes.
pub fn create_in_memory_state(
    verifier: Option<WebhookVerifier>,
) -> (Arc<AppState>, InMemoryBackends) {
    let backends = InMemoryBackends::new();
    let state = Arc::new(AppState::new(backends.context(), verifier));
    (state, backends)
}
