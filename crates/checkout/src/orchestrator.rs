//! Converts a user's cart into a priced order holding reserved stock.

use std::time::Instant;

use chrono::Utc;
use domain::{
    CartLine, DomainError, LineItemKind, Money, Order, OrderItem, Subscription,
    SubscriptionOrigin,
};
use ledger::{LedgerError, StockItem, normalize_items};
use serde::{Deserialize, Serialize};

use crate::context::{CheckoutContext, stock_items};
use crate::error::{CheckoutError, Result};
use crate::identity::Identity;
use crate::services::{PaymentLine, PaymentRequest};
use crate::{OrderId, PetId};

/// Optional checkout parameters supplied by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Default pet for subscription lines that do not name one.
    #[serde(default)]
    pub pet_id: Option<PetId>,
    /// Contact phone handed to the payment gateway.
    #[serde(default)]
    pub phone: Option<String>,
}

/// Result of a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub order_id: OrderId,
    pub invoice_id: String,
    pub payment_url: String,
    pub total: Money,
}

/// Everything checkout writes, built before the first write.
struct OrderDraft {
    order: Order,
    items: Vec<OrderItem>,
    subscriptions: Vec<Subscription>,
    stock: Vec<StockItem>,
}

/// Runs checkout with compensating rollback on failure.
///
/// Steps:
/// 1. Refuse unverified identities
/// 2. Load the cart and translate every row into a typed line
/// 3. Check stock for every product line
/// 4. Price the order from stored line prices
/// 5. Create the order, reserve stock for all lines as one unit
/// 6. Write lines and subscriptions in one transaction
/// 7. Open a payment session and record its identifiers
///
/// A failure after the order row exists removes the order and releases any
/// reservation before the error is returned. Line and session writes only
/// land while the order is still `created`, so an order cancelled by the
/// expiry sweep mid-checkout fails here and is rolled back.
#[derive(Clone)]
pub struct CheckoutOrchestrator {
    ctx: CheckoutContext,
}

impl CheckoutOrchestrator {
    pub fn new(ctx: CheckoutContext) -> Self {
        Self { ctx }
    }

    /// Starts checkout for the caller's active cart.
    #[tracing::instrument(skip(self, identity, request), fields(user_id = %identity.user_id))]
    pub async fn begin_checkout(
        &self,
        identity: &Identity,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession> {
        metrics::counter!("checkout_started_total").increment(1);
        let started = Instant::now();

        let result = self.run(identity, request).await;

        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        match &result {
            Ok(session) => {
                metrics::counter!("checkout_completed_total").increment(1);
                tracing::info!(
                    order_id = %session.order_id,
                    invoice_id = %session.invoice_id,
                    total = %session.total,
                    "checkout completed"
                );
            }
            Err(e) => {
                metrics::counter!("checkout_failed_total", "reason" => e.reason()).increment(1);
                tracing::warn!(error = %e, "checkout rejected");
            }
        }
        result
    }

    async fn run(&self, identity: &Identity, request: CheckoutRequest) -> Result<CheckoutSession> {
        // 1. Identity gate
        if !identity.email_verified {
            return Err(CheckoutError::UnverifiedIdentity(identity.user_id));
        }

        // 2. Cart
        let cart = self.ctx.carts.active_cart(identity.user_id).await?;
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        // 3-4. Validate, check stock and price without writing anything
        let draft = build_draft(identity, &request, &cart)?;
        self.check_stock(&draft.stock).await?;

        // 5. Order row, then reservations
        let order_id = draft.order.id;
        self.ctx.orders.create_order(&draft.order).await?;

        if !draft.stock.is_empty() {
            if let Err(e) = self.ctx.ledger.reserve_all(&draft.stock, order_id).await {
                self.compensate(order_id, &[]).await;
                return Err(e.into());
            }
        }

        // 6. Lines and subscriptions
        if let Err(e) = self
            .ctx
            .orders
            .insert_items(order_id, &draft.items, &draft.subscriptions)
            .await
        {
            self.compensate(order_id, &draft.stock).await;
            return Err(e.into());
        }

        // 7. Payment session
        let payment_request = PaymentRequest {
            order_id,
            user_id: identity.user_id,
            phone: request.phone.clone(),
            amount: draft.order.total_amount,
            lines: draft.items.iter().map(payment_line).collect(),
        };
        let session = match self.ctx.gateway.initiate_payment(&payment_request).await {
            Ok(session) => session,
            Err(e) => {
                self.compensate(order_id, &draft.stock).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .ctx
            .orders
            .set_payment_session(
                order_id,
                &session.invoice_id,
                session.payment_reference.as_deref(),
            )
            .await
        {
            self.compensate(order_id, &draft.stock).await;
            return Err(e.into());
        }

        Ok(CheckoutSession {
            order_id,
            invoice_id: session.invoice_id,
            payment_url: session.payment_url,
            total: draft.order.total_amount,
        })
    }

    /// Fails with `InsufficientStock` for the first short product.
    async fn check_stock(&self, stock: &[StockItem]) -> Result<()> {
        for item in normalize_items(stock)? {
            let record = self.ctx.ledger.stock(&item.product_id).await?;
            let requested = i64::from(item.quantity);
            if record.available() < requested {
                return Err(LedgerError::InsufficientStock {
                    product_id: item.product_id,
                    available: record.available(),
                    requested,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Releases held stock and removes the order with its children.
    ///
    /// Errors here are logged and never replace the original failure. The
    /// release only frees what this order still holds, so it is harmless
    /// after a concurrent cancellation already returned the units.
    async fn compensate(&self, order_id: OrderId, reserved: &[StockItem]) {
        tracing::warn!(%order_id, "rolling back checkout");

        match self.ctx.orders.get_order(order_id).await {
            Ok(Some(order)) if order.status.is_settled() => {
                tracing::error!(
                    %order_id,
                    status = %order.status,
                    "order settled during checkout, leaving it in place"
                );
                return;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(%order_id, error = %e, "failed to load order during rollback"),
        }

        if !reserved.is_empty() {
            if let Err(e) = self.ctx.ledger.release_all(reserved, order_id).await {
                tracing::error!(
                    %order_id,
                    error = %e,
                    "failed to release reservation during rollback"
                );
            }
        }
        if let Err(e) = self.ctx.orders.delete_order(order_id).await {
            tracing::error!(%order_id, error = %e, "failed to delete order during rollback");
        }
    }
}

fn build_draft(
    identity: &Identity,
    request: &CheckoutRequest,
    cart: &[CartLine],
) -> Result<OrderDraft> {
    let mut lines = Vec::with_capacity(cart.len());
    for line in cart {
        if line.quantity == 0 {
            let reason = format!("line {} has zero quantity", line.id);
            return Err(DomainError::InvalidLineItem(reason).into());
        }
        if line.unit_price.is_negative() {
            let reason = format!("line {} has a negative price", line.id);
            return Err(DomainError::InvalidLineItem(reason).into());
        }
        lines.push((line.line_kind()?, line));
    }

    let total = lines
        .iter()
        .try_fold(Money::zero(), |total, (_, line)| {
            line.unit_price
                .checked_multiply(line.quantity)
                .and_then(|amount| total.checked_add(amount))
        })
        .ok_or_else(|| DomainError::InvalidLineItem("order total overflows".to_string()))?;

    let order = Order::new(identity.user_id, request.pet_id, request.phone.clone(), total);
    let today = Utc::now().date_naive();

    let mut items = Vec::with_capacity(lines.len());
    let mut subscriptions = Vec::new();
    for (kind, line) in lines {
        let item =
            OrderItem::new(order.id, kind, line.quantity, line.unit_price).with_cart_line(line.id);

        if let Some(plan) = item.kind.subscription_plan() {
            let pet_id = plan.pet_id.or(request.pet_id).ok_or_else(|| {
                DomainError::InvalidLineItem(format!("subscription line {} names no pet", line.id))
            })?;
            let origin = SubscriptionOrigin {
                user_id: identity.user_id,
                pet_id,
                order_id: order.id,
                order_item_id: item.id,
            };
            subscriptions.push(Subscription::pending(origin, plan, item.unit_price, today));
        }
        items.push(item);
    }

    let stock = stock_items(&items);
    Ok(OrderDraft {
        order,
        items,
        subscriptions,
        stock,
    })
}

fn payment_line(item: &OrderItem) -> PaymentLine {
    let description = match &item.kind {
        LineItemKind::Physical { product_id } => product_id.to_string(),
        LineItemKind::SubscriptionPlan { plan, .. } => format!("{} subscription", plan.plan_type),
    };
    PaymentLine {
        description,
        quantity: item.quantity,
        unit_price: item.unit_price,
    }
}
