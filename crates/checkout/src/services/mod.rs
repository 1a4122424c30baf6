//! External collaborator traits with in-memory and network implementations.

pub mod notification;
pub mod payment;

pub use notification::{
    InMemoryNotificationSink, Notification, NotificationSink, TracingNotificationSink, dispatch,
};
pub use payment::{
    GatewayStatus, HttpGatewayConfig, HttpPaymentGateway, InMemoryPaymentGateway, KeyType,
    PaymentGateway, PaymentLine, PaymentRequest, PaymentSession, PaymentTransaction,
    PaymentVerification,
};
