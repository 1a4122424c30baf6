//! Turns payment notifications into order transitions and stock changes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use domain::{Order, OrderStatus, SubscriptionStatus, Transition};
use serde::{Deserialize, Serialize};

use crate::context::{CheckoutContext, stock_items};
use crate::error::{CheckoutError, Result};
use crate::services::{GatewayStatus, KeyType, Notification, PaymentVerification, dispatch};
use crate::signature::WebhookVerifier;
use crate::OrderId;

/// Payment identifiers carried by a webhook body or redirect query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotification {
    #[serde(default)]
    pub invoice_id: Option<String>,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<OrderId>,
}

impl PaymentNotification {
    fn normalized(self) -> Self {
        let clean =
            |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            invoice_id: clean(self.invoice_id),
            payment_id: clean(self.payment_id),
            order_id: self.order_id,
        }
    }
}

/// What reconciliation did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub order_id: OrderId,
    /// Order status after reconciliation.
    pub status: OrderStatus,
    /// True for the delivery that moved the order, or that finished a
    /// settlement an earlier delivery left incomplete.
    pub applied: bool,
}

/// Where a notification came from; used for the `source` metric dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationSource {
    Webhook,
    Redirect,
}

impl NotificationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationSource::Webhook => "webhook",
            NotificationSource::Redirect => "redirect",
        }
    }
}

/// Orders with a delivery currently being applied by this process.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<OrderId>>>);

impl InFlight {
    /// Claims the order, or returns `None` while another delivery holds it.
    fn claim(&self, order_id: OrderId) -> Option<Claim> {
        let mut orders = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        orders.insert(order_id).then(|| Claim {
            orders: Arc::clone(&self.0),
            order_id,
        })
    }
}

/// Releases its order when dropped.
struct Claim {
    orders: Arc<Mutex<HashSet<OrderId>>>,
    order_id: OrderId,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.order_id);
    }
}

/// Applies gateway outcomes to orders exactly once.
///
/// Every notification is re-verified with the gateway; the notification
/// only says which payment to look at. The order status compare-and-set
/// picks the delivery that moves the order out of `created`. Settlement
/// steps are idempotent per order, so a later delivery for a paid or failed
/// order completes whatever the first one left undone and is otherwise a
/// duplicate. Concurrent deliveries for one order are serialized within the
/// process so only one of them settles it.
#[derive(Clone)]
pub struct PaymentReconciler {
    ctx: CheckoutContext,
    verifier: Option<WebhookVerifier>,
    in_flight: InFlight,
}

impl PaymentReconciler {
    /// Creates a reconciler. Without a verifier every webhook is rejected.
    pub fn new(ctx: CheckoutContext, verifier: Option<WebhookVerifier>) -> Self {
        Self {
            ctx,
            verifier,
            in_flight: InFlight::default(),
        }
    }

    /// Handles a signed server-to-server notification.
    #[tracing::instrument(skip(self, timestamp, signature, body), fields(body_len = body.len()))]
    pub async fn handle_webhook(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<ReconcileOutcome> {
        let source = NotificationSource::Webhook.as_str();
        metrics::counter!("webhook_received_total", "source" => source).increment(1);

        let verifier = self.verifier.as_ref().ok_or_else(|| {
            tracing::warn!("webhook received but no secret is configured");
            CheckoutError::InvalidWebhookSignature("webhook secret not configured".to_string())
        })?;
        verifier.verify(timestamp, signature, body)?;

        let notification: PaymentNotification = serde_json::from_slice(body)
            .map_err(|e| CheckoutError::MalformedNotification(e.to_string()))?;
        self.reconcile(notification).await
    }

    /// Handles an unsigned browser redirect. Its parameters only select the
    /// payment to look up.
    #[tracing::instrument(skip(self))]
    pub async fn handle_redirect(
        &self,
        notification: PaymentNotification,
    ) -> Result<ReconcileOutcome> {
        let source = NotificationSource::Redirect.as_str();
        metrics::counter!("webhook_received_total", "source" => source).increment(1);
        self.reconcile(notification).await
    }

    /// Verifies the payment with the gateway and applies the outcome.
    pub async fn reconcile(&self, notification: PaymentNotification) -> Result<ReconcileOutcome> {
        let notification = notification.normalized();
        let verification = self.verify(&notification).await?;
        let order = self.resolve_order(&notification, &verification).await?;

        if let Some(stored) = order.payment_invoice_id.as_deref() {
            if stored != verification.invoice_id {
                return Err(CheckoutError::MalformedNotification(format!(
                    "invoice {} does not belong to order {}",
                    verification.invoice_id, order.id
                )));
            }
        }

        tracing::info!(
            order_id = %order.id,
            invoice_id = %verification.invoice_id,
            status = verification.status.as_str(),
            "payment verified"
        );

        let Some(_claim) = self.in_flight.claim(order.id) else {
            metrics::counter!("webhook_duplicates_total").increment(1);
            tracing::info!(order_id = %order.id, "delivery already in progress for order");
            return Ok(ReconcileOutcome {
                order_id: order.id,
                status: order.status,
                applied: false,
            });
        };

        let reference = verification.payment_reference();
        match verification.status {
            GatewayStatus::Paid => self.apply_paid(&order, reference).await,
            GatewayStatus::Failed => self.apply_failed(&order, reference).await,
            GatewayStatus::Pending => Ok(ReconcileOutcome {
                order_id: order.id,
                status: order.status,
                applied: false,
            }),
        }
    }

    async fn verify(&self, notification: &PaymentNotification) -> Result<PaymentVerification> {
        if let Some(invoice_id) = &notification.invoice_id {
            return self
                .ctx
                .gateway
                .verify_payment(invoice_id, KeyType::InvoiceId)
                .await;
        }
        if let Some(payment_id) = &notification.payment_id {
            return self
                .ctx
                .gateway
                .verify_payment(payment_id, KeyType::PaymentId)
                .await;
        }
        if let Some(order_id) = notification.order_id {
            let order = self
                .ctx
                .orders
                .get_order(order_id)
                .await?
                .ok_or_else(|| CheckoutError::OrderNotFound(order_id.to_string()))?;
            let invoice_id = order.payment_invoice_id.ok_or_else(|| {
                CheckoutError::MalformedNotification(format!(
                    "order {order_id} has no payment session"
                ))
            })?;
            return self
                .ctx
                .gateway
                .verify_payment(&invoice_id, KeyType::InvoiceId)
                .await;
        }
        Err(CheckoutError::MalformedNotification(
            "no invoice id, payment id or order id".to_string(),
        ))
    }

    /// Invoice id, then payment reference, then explicit order id.
    async fn resolve_order(
        &self,
        notification: &PaymentNotification,
        verification: &PaymentVerification,
    ) -> Result<Order> {
        if let Some(order) = self
            .ctx
            .orders
            .find_by_invoice_id(&verification.invoice_id)
            .await?
        {
            return Ok(order);
        }

        let references = verification
            .payment_reference()
            .into_iter()
            .chain(notification.payment_id.as_deref());
        for reference in references {
            if let Some(order) = self.ctx.orders.find_by_payment_reference(reference).await? {
                return Ok(order);
            }
        }

        let explicit = notification.order_id.or_else(|| {
            verification
                .customer_reference
                .as_deref()
                .and_then(|r| r.parse().ok())
        });
        if let Some(order_id) = explicit {
            if let Some(order) = self.ctx.orders.get_order(order_id).await? {
                return Ok(order);
            }
        }

        Err(CheckoutError::OrderNotFound(format!(
            "invoice {}",
            verification.invoice_id
        )))
    }

    async fn apply_paid(&self, order: &Order, reference: Option<&str>) -> Result<ReconcileOutcome> {
        let transition = self
            .ctx
            .orders
            .transition_status(order.id, OrderStatus::Paid, reference)
            .await?;

        match transition {
            Transition::Applied { order, .. } => self.settle_paid(&order, true).await,
            Transition::Unchanged { current } if current.is_settled() => {
                let stored = self.reload(order.id).await?;
                self.settle_paid(&stored, false).await
            }
            Transition::Unchanged { current } => Ok(self.unchanged(order.id, current)),
        }
    }

    /// Deducts the order's stock, activates its subscriptions and drops the
    /// purchased cart lines.
    ///
    /// Each step only touches what is still outstanding, so a redelivery
    /// for a paid order finishes a settlement that failed part way.
    async fn settle_paid(&self, paid: &Order, transitioned: bool) -> Result<ReconcileOutcome> {
        let items = self.ctx.orders.items_for_order(paid.id).await?;
        let stock = stock_items(&items);
        let deducted = if stock.is_empty() {
            0
        } else {
            match self.ctx.ledger.deduct_all(&stock, paid.id).await {
                Ok(units) => units,
                Err(e) => {
                    tracing::error!(
                        order_id = %paid.id,
                        error = %e,
                        "stock deduction failed for paid order"
                    );
                    return Err(e.into());
                }
            }
        };

        let activated = self
            .ctx
            .orders
            .set_subscriptions_status(
                paid.id,
                SubscriptionStatus::Pending,
                SubscriptionStatus::Active,
            )
            .await?;

        if !transitioned && deducted == 0 && activated == 0 {
            return Ok(self.unchanged(paid.id, paid.status));
        }
        self.record_settlement(paid, transitioned);

        let purchased: Vec<_> = items.iter().filter_map(|item| item.cart_line_id).collect();
        if !purchased.is_empty() {
            if let Err(e) = self.ctx.carts.remove_lines(paid.user_id, &purchased).await {
                tracing::warn!(order_id = %paid.id, error = %e, "failed to clear cart after payment");
            }
        }
        tracing::info!(order_id = %paid.id, deducted, activated, "order paid");

        let notifier = self.ctx.notifier.as_ref();
        dispatch(
            notifier,
            Notification::OrderPaid {
                order_id: paid.id,
                user_id: paid.user_id,
                total: paid.total_amount,
            },
        )
        .await;
        if activated > 0 {
            for subscription in self.ctx.orders.subscriptions_for_order(paid.id).await? {
                if subscription.status == SubscriptionStatus::Active {
                    dispatch(
                        notifier,
                        Notification::SubscriptionActivated {
                            subscription_id: subscription.id,
                            order_id: paid.id,
                            user_id: paid.user_id,
                            plan_type: subscription.plan_type,
                        },
                    )
                    .await;
                }
            }
        }

        Ok(ReconcileOutcome {
            order_id: paid.id,
            status: paid.status,
            applied: true,
        })
    }

    async fn apply_failed(
        &self,
        order: &Order,
        reference: Option<&str>,
    ) -> Result<ReconcileOutcome> {
        let transition = self
            .ctx
            .orders
            .transition_status(order.id, OrderStatus::Failed, reference)
            .await?;

        match transition {
            Transition::Applied { order, .. } => self.settle_failed(&order, true).await,
            Transition::Unchanged {
                current: OrderStatus::Failed,
            } => {
                let stored = self.reload(order.id).await?;
                self.settle_failed(&stored, false).await
            }
            Transition::Unchanged { current } => Ok(self.unchanged(order.id, current)),
        }
    }

    /// Returns the order's reservation and cancels its pending subscriptions.
    async fn settle_failed(&self, failed: &Order, transitioned: bool) -> Result<ReconcileOutcome> {
        let items = self.ctx.orders.items_for_order(failed.id).await?;
        let stock = stock_items(&items);
        let released = if stock.is_empty() {
            0
        } else {
            match self.ctx.ledger.release_all(&stock, failed.id).await {
                Ok(units) => units,
                Err(e) => {
                    tracing::error!(
                        order_id = %failed.id,
                        error = %e,
                        "stock release failed for failed order"
                    );
                    return Err(e.into());
                }
            }
        };

        let cancelled = self
            .ctx
            .orders
            .set_subscriptions_status(
                failed.id,
                SubscriptionStatus::Pending,
                SubscriptionStatus::Cancelled,
            )
            .await?;

        if !transitioned && released == 0 && cancelled == 0 {
            return Ok(self.unchanged(failed.id, failed.status));
        }
        self.record_settlement(failed, transitioned);
        tracing::info!(order_id = %failed.id, released, cancelled, "order payment failed");

        dispatch(
            self.ctx.notifier.as_ref(),
            Notification::OrderFailed {
                order_id: failed.id,
                user_id: failed.user_id,
            },
        )
        .await;

        Ok(ReconcileOutcome {
            order_id: failed.id,
            status: failed.status,
            applied: true,
        })
    }

    async fn reload(&self, order_id: OrderId) -> Result<Order> {
        self.ctx
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| CheckoutError::OrderNotFound(order_id.to_string()))
    }

    fn record_settlement(&self, order: &Order, transitioned: bool) {
        if transitioned {
            metrics::counter!("webhook_transitions_total", "status" => order.status.as_str())
                .increment(1);
        } else {
            metrics::counter!("webhook_settlements_resumed_total", "status" => order.status.as_str())
                .increment(1);
            tracing::warn!(
                order_id = %order.id,
                status = %order.status,
                "finishing settlement left incomplete by an earlier delivery"
            );
        }
    }

    fn unchanged(&self, order_id: OrderId, current: OrderStatus) -> ReconcileOutcome {
        metrics::counter!("webhook_duplicates_total").increment(1);
        tracing::info!(%order_id, status = %current, "order already settled, nothing to apply");
        ReconcileOutcome {
            order_id,
            status: current,
            applied: false,
        }
    }
}
