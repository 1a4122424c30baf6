//! Payment gateway trait with in-memory and HTTP implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::Money;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{CheckoutError, Result};
use crate::{OrderId, UserId};

/// Which identifier a status lookup is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    InvoiceId,
    PaymentId,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::InvoiceId => "InvoiceId",
            KeyType::PaymentId => "PaymentId",
        }
    }
}

/// Gateway payment status collapsed to what reconciliation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    /// The customer paid.
    Paid,
    /// The payment definitely failed, was cancelled or expired.
    Failed,
    /// Anything else; no decision can be made yet.
    Pending,
}

impl GatewayStatus {
    /// Maps a raw gateway status string. Unknown values are pending.
    pub fn from_gateway(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paid" | "succeeded" | "success" => GatewayStatus::Paid,
            "failed" | "cancelled" | "canceled" | "expired" => GatewayStatus::Failed,
            _ => GatewayStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStatus::Paid => "paid",
            GatewayStatus::Failed => "failed",
            GatewayStatus::Pending => "pending",
        }
    }
}

/// One line shown on the gateway's invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentLine {
    pub description: String,
    pub quantity: u32,
    pub unit_price: Money,
}

/// Everything the gateway needs to open a payment session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub phone: Option<String>,
    pub amount: Money,
    pub lines: Vec<PaymentLine>,
}

/// Identifiers returned when a payment session is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSession {
    pub invoice_id: String,
    pub payment_url: String,
    pub payment_reference: Option<String>,
}

/// One payment attempt reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTransaction {
    pub payment_id: String,
    pub status: String,
}

/// Authoritative status of an invoice as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentVerification {
    pub invoice_id: String,
    pub status: GatewayStatus,
    /// Order reference echoed back by the gateway, if any.
    pub customer_reference: Option<String>,
    pub transactions: Vec<PaymentTransaction>,
}

impl PaymentVerification {
    /// The payment id to record against the order: the successful attempt
    /// if there is one, otherwise the most recent attempt.
    pub fn payment_reference(&self) -> Option<&str> {
        self.transactions
            .iter()
            .find(|t| GatewayStatus::from_gateway(&t.status) == GatewayStatus::Paid)
            .or_else(|| self.transactions.last())
            .map(|t| t.payment_id.as_str())
    }
}

/// External payment gateway. Responses are untrusted network input.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment session for an order.
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentSession>;

    /// Looks up the current status of an invoice or payment.
    async fn verify_payment(&self, key: &str, key_type: KeyType) -> Result<PaymentVerification>;
}

#[derive(Debug)]
struct InMemoryInvoice {
    order_id: OrderId,
    amount: Money,
    status: String,
    transactions: Vec<PaymentTransaction>,
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    invoices: HashMap<String, InMemoryInvoice>,
    next_id: u32,
    fail_on_initiate: bool,
    fail_on_verify: bool,
}

/// In-memory payment gateway for tests and local runs.
///
/// Invoices start in `Pending`; tests script outcomes with
/// [`InMemoryPaymentGateway::complete_payment`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures `initiate_payment` to fail.
    pub async fn set_fail_on_initiate(&self, fail: bool) {
        self.state.write().await.fail_on_initiate = fail;
    }

    /// Configures `verify_payment` to fail.
    pub async fn set_fail_on_verify(&self, fail: bool) {
        self.state.write().await.fail_on_verify = fail;
    }

    /// Records a payment attempt with the given raw status and sets the
    /// invoice status to match.
    pub async fn complete_payment(
        &self,
        invoice_id: &str,
        payment_id: &str,
        status: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let invoice = state
            .invoices
            .get_mut(invoice_id)
            .ok_or_else(|| CheckoutError::PaymentGateway(format!("unknown invoice {invoice_id}")))?;
        invoice.status = status.to_string();
        invoice.transactions.push(PaymentTransaction {
            payment_id: payment_id.to_string(),
            status: status.to_string(),
        });
        Ok(())
    }

    /// Returns the number of opened sessions.
    pub async fn session_count(&self) -> usize {
        self.state.read().await.invoices.len()
    }

    /// Returns the amount charged on an invoice.
    pub async fn invoice_amount(&self, invoice_id: &str) -> Option<Money> {
        self.state
            .read()
            .await
            .invoices
            .get(invoice_id)
            .map(|i| i.amount)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentSession> {
        let mut state = self.state.write().await;

        if state.fail_on_initiate {
            return Err(CheckoutError::PaymentGateway(
                "payment session rejected".to_string(),
            ));
        }

        state.next_id += 1;
        let invoice_id = format!("INV-{:04}", state.next_id);
        state.invoices.insert(
            invoice_id.clone(),
            InMemoryInvoice {
                order_id: request.order_id,
                amount: request.amount,
                status: "Pending".to_string(),
                transactions: Vec::new(),
            },
        );

        Ok(PaymentSession {
            payment_url: format!("https://pay.example.test/{invoice_id}"),
            invoice_id,
            payment_reference: None,
        })
    }

    async fn verify_payment(&self, key: &str, key_type: KeyType) -> Result<PaymentVerification> {
        let state = self.state.read().await;

        if state.fail_on_verify {
            return Err(CheckoutError::PaymentGateway(
                "status lookup unavailable".to_string(),
            ));
        }

        let found = match key_type {
            KeyType::InvoiceId => state.invoices.get_key_value(key),
            KeyType::PaymentId => state
                .invoices
                .iter()
                .find(|(_, invoice)| invoice.transactions.iter().any(|t| t.payment_id == key)),
        };
        let (invoice_id, invoice) = found.ok_or_else(|| {
            CheckoutError::PaymentGateway(format!("no invoice for {} {key}", key_type.as_str()))
        })?;

        Ok(PaymentVerification {
            invoice_id: invoice_id.clone(),
            status: GatewayStatus::from_gateway(&invoice.status),
            customer_reference: Some(invoice.order_id.to_string()),
            transactions: invoice.transactions.clone(),
        })
    }
}

/// Connection settings for [`HttpPaymentGateway`].
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub callback_url: Option<String>,
    pub error_url: Option<String>,
}

/// Response envelope shared by every gateway endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope<T> {
    is_success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self, call: &str) -> Result<T> {
        if !self.is_success {
            return Err(CheckoutError::PaymentGateway(format!(
                "{call} rejected: {}",
                self.message.unwrap_or_else(|| "no message".to_string())
            )));
        }
        self.data
            .ok_or_else(|| CheckoutError::PaymentGateway(format!("{call} returned no data")))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecutePaymentBody<'a> {
    invoice_value: f64,
    customer_reference: String,
    user_defined_field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_mobile: Option<&'a str>,
    #[serde(rename = "CallBackUrl", skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_url: Option<&'a str>,
    invoice_items: Vec<InvoiceItemBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct InvoiceItemBody {
    item_name: String,
    quantity: u32,
    unit_price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExecutePaymentData {
    invoice_id: serde_json::Value,
    #[serde(rename = "PaymentURL")]
    payment_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PaymentStatusBody<'a> {
    key: &'a str,
    key_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PaymentStatusData {
    invoice_id: serde_json::Value,
    invoice_status: Option<String>,
    #[serde(default)]
    customer_reference: Option<String>,
    #[serde(default)]
    invoice_transactions: Vec<TransactionData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TransactionData {
    payment_id: serde_json::Value,
    #[serde(default)]
    transaction_status: Option<String>,
}

/// Gateway identifiers arrive as either numbers or strings.
fn identifier(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn major_units(money: Money) -> f64 {
    money.cents() as f64 / 100.0
}

/// Payment gateway client speaking the gateway's JSON API over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    config: HttpGatewayConfig,
}

impl HttpPaymentGateway {
    /// Creates a client with a 10 second request timeout.
    pub fn new(config: HttpGatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CheckoutError::PaymentGateway(format!("client setup failed: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| CheckoutError::PaymentGateway(format!("{path} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(%status, path, body = %text, "payment gateway returned an error status");
            return Err(CheckoutError::PaymentGateway(format!(
                "{path} returned {status}"
            )));
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            CheckoutError::PaymentGateway(format!("{path} returned an unreadable body: {e}"))
        })?;
        envelope.into_data(path)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentSession> {
        let body = ExecutePaymentBody {
            invoice_value: major_units(request.amount),
            customer_reference: request.order_id.to_string(),
            user_defined_field: request.user_id.to_string(),
            customer_mobile: request.phone.as_deref(),
            callback_url: self.config.callback_url.as_deref(),
            error_url: self.config.error_url.as_deref(),
            invoice_items: request
                .lines
                .iter()
                .map(|line| InvoiceItemBody {
                    item_name: line.description.clone(),
                    quantity: line.quantity,
                    unit_price: major_units(line.unit_price),
                })
                .collect(),
        };

        let data: ExecutePaymentData = self.post("v2/ExecutePayment", &body).await?;

        let invoice_id = identifier(&data.invoice_id).ok_or_else(|| {
            CheckoutError::PaymentGateway("ExecutePayment returned no invoice id".to_string())
        })?;
        let payment_url = data
            .payment_url
            .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
            .ok_or_else(|| {
                CheckoutError::PaymentGateway(
                    "ExecutePayment returned no usable payment url".to_string(),
                )
            })?;

        Ok(PaymentSession {
            invoice_id,
            payment_url,
            payment_reference: None,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn verify_payment(&self, key: &str, key_type: KeyType) -> Result<PaymentVerification> {
        let body = PaymentStatusBody {
            key,
            key_type: key_type.as_str(),
        };
        let data: PaymentStatusData = self.post("v2/GetPaymentStatus", &body).await?;

        let invoice_id = identifier(&data.invoice_id).ok_or_else(|| {
            CheckoutError::PaymentGateway("GetPaymentStatus returned no invoice id".to_string())
        })?;
        let status = data.invoice_status.ok_or_else(|| {
            CheckoutError::PaymentGateway("GetPaymentStatus returned no status".to_string())
        })?;

        let transactions = data
            .invoice_transactions
            .iter()
            .filter_map(|t| {
                Some(PaymentTransaction {
                    payment_id: identifier(&t.payment_id)?,
                    status: t.transaction_status.clone().unwrap_or_default(),
                })
            })
            .collect();

        Ok(PaymentVerification {
            invoice_id,
            status: GatewayStatus::from_gateway(&status),
            customer_reference: data.customer_reference.filter(|r| !r.trim().is_empty()),
            transactions,
        })
    }
}
