//! Shared application state.

use std::sync::Arc;

use checkout::{
    CheckoutContext, CheckoutOrchestrator, OrderOperator, PaymentReconciler, WebhookVerifier,
};
use ledger::InventoryLedger;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orchestrator: CheckoutOrchestrator,
    pub reconciler: PaymentReconciler,
    pub operator: OrderOperator,
    pub ledger: Arc<dyn InventoryLedger>,
}

impl AppState {
    /// Wires every workflow to the same stores.
    pub fn new(ctx: CheckoutContext, verifier: Option<WebhookVerifier>) -> Self {
        Self {
            orchestrator: CheckoutOrchestrator::new(ctx.clone()),
            reconciler: PaymentReconciler::new(ctx.clone(), verifier),
            operator: OrderOperator::new(ctx.clone()),
            ledger: ctx.ledger,
        }
    }
}
