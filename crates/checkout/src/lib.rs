//! Checkout and payment reconciliation for the storefront.
//!
//! This crate provides:
//! - [`CheckoutOrchestrator`]: cart to priced order with all-or-nothing
//!   stock reservation and compensating rollback
//! - [`PaymentReconciler`]: signed webhooks and browser redirects funnelled
//!   into one idempotent paid/failed transition
//! - [`OrderOperator`]: fulfil, cancel, expire and stock adjustments
//! - The payment gateway and notification collaborators

pub mod context;
pub mod error;
pub mod identity;
pub mod operator;
pub mod orchestrator;
pub mod reconciler;
pub mod services;
pub mod signature;

pub use common::{OrderId, PetId, ProductId, SubscriptionId, UserId};
pub use context::{CheckoutContext, InMemoryBackends};
pub use error::{CheckoutError, Result};
pub use identity::Identity;
pub use operator::{OrderDetails, OrderOperator};
pub use orchestrator::{CheckoutOrchestrator, CheckoutRequest, CheckoutSession};
pub use reconciler::{NotificationSource, PaymentNotification, PaymentReconciler, ReconcileOutcome};
pub use services::{
    GatewayStatus, HttpGatewayConfig, HttpPaymentGateway, InMemoryNotificationSink,
    InMemoryPaymentGateway, KeyType, Notification, NotificationSink, PaymentGateway,
    PaymentSession, PaymentVerification, TracingNotificationSink,
};
pub use signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER, WebhookVerifier};
