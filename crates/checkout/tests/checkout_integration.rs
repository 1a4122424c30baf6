//! End-to-end checkout and reconciliation scenarios against in-memory stores.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use checkout::{
    CheckoutContext, CheckoutError, CheckoutOrchestrator, CheckoutRequest, CheckoutSession,
    Identity, InMemoryBackends, Notification, OrderOperator, PaymentNotification,
    PaymentReconciler, WebhookVerifier,
};
use domain::{
    CartLine, CartRepository, DomainError, Money, OrderRepository, OrderStatus, PetId,
    SubscriptionStatus,
};
use ledger::{
    InMemoryLedger, InventoryLedger, InventoryMovement, InventoryRecord, LedgerError,
    MovementKind, OrderId, ProductId, StockItem, UserId,
};
use serde_json::json;
use tokio::sync::Mutex;

const SECRET: &str = "whsec_integration";

/// A one-shot interruption injected into the next matching batch call.
enum Fault {
    /// Runs the abandoned-order sweep right after the reservation lands.
    ExpireAfterReserve(OrderOperator),
    /// Fails the next batch deduction without touching stock.
    FailDeduct,
}

/// Wraps the in-memory ledger and fires a [`Fault`] once.
struct InterruptingLedger {
    inner: InMemoryLedger,
    fault: Mutex<Option<Fault>>,
}

impl InterruptingLedger {
    fn new(inner: InMemoryLedger, fault: Fault) -> Self {
        Self {
            inner,
            fault: Mutex::new(Some(fault)),
        }
    }
}

#[async_trait]
impl InventoryLedger for InterruptingLedger {
    async fn upsert_product(
        &self,
        product_id: ProductId,
        quantity: i64,
        low_stock_threshold: i64,
    ) -> ledger::Result<InventoryRecord> {
        self.inner
            .upsert_product(product_id, quantity, low_stock_threshold)
            .await
    }

    async fn stock(&self, product_id: &ProductId) -> ledger::Result<InventoryRecord> {
        self.inner.stock(product_id).await
    }

    async fn reserve(
        &self,
        product_id: &ProductId,
        quantity: u32,
        order_id: OrderId,
    ) -> ledger::Result<i64> {
        self.inner.reserve(product_id, quantity, order_id).await
    }

    async fn deduct(
        &self,
        product_id: &ProductId,
        quantity: u32,
        order_id: OrderId,
    ) -> ledger::Result<InventoryRecord> {
        self.inner.deduct(product_id, quantity, order_id).await
    }

    async fn release(
        &self,
        product_id: &ProductId,
        quantity: u32,
        order_id: OrderId,
    ) -> ledger::Result<i64> {
        self.inner.release(product_id, quantity, order_id).await
    }

    async fn adjust_admin(
        &self,
        product_id: &ProductId,
        delta: i64,
        reason: &str,
        actor_id: UserId,
    ) -> ledger::Result<InventoryRecord> {
        self.inner
            .adjust_admin(product_id, delta, reason, actor_id)
            .await
    }

    async fn reserve_all(&self, items: &[StockItem], order_id: OrderId) -> ledger::Result<()> {
        self.inner.reserve_all(items, order_id).await?;
        let mut fault = self.fault.lock().await;
        if matches!(*fault, Some(Fault::ExpireAfterReserve(_))) {
            if let Some(Fault::ExpireAfterReserve(operator)) = fault.take() {
                let expired = operator
                    .expire_abandoned(Utc::now() + Duration::seconds(1))
                    .await
                    .unwrap();
                assert_eq!(expired, vec![order_id]);
            }
        }
        Ok(())
    }

    async fn deduct_all(&self, items: &[StockItem], order_id: OrderId) -> ledger::Result<i64> {
        let mut fault = self.fault.lock().await;
        if matches!(*fault, Some(Fault::FailDeduct)) {
            fault.take();
            return Err(LedgerError::ProductNotFound(items[0].product_id.clone()));
        }
        drop(fault);
        self.inner.deduct_all(items, order_id).await
    }

    async fn release_all(&self, items: &[StockItem], order_id: OrderId) -> ledger::Result<i64> {
        self.inner.release_all(items, order_id).await
    }

    async fn movements(&self, product_id: &ProductId) -> ledger::Result<Vec<InventoryMovement>> {
        self.inner.movements(product_id).await
    }
}

struct TestHarness {
    backends: InMemoryBackends,
    orchestrator: CheckoutOrchestrator,
    reconciler: PaymentReconciler,
    operator: OrderOperator,
    verifier: WebhookVerifier,
    user: UserId,
}

impl TestHarness {
    fn new() -> Self {
        let backends = InMemoryBackends::new();
        let ctx = backends.context();
        Self::with_context(backends, ctx)
    }

    /// Harness whose workflows see `fault` through the ledger. Stock setup
    /// and assertions still go straight to the in-memory backends.
    fn interrupted(fault: impl FnOnce(&InMemoryBackends) -> Fault) -> Self {
        let backends = InMemoryBackends::new();
        let ledger = InterruptingLedger::new(backends.ledger.clone(), fault(&backends));
        let ctx = CheckoutContext {
            ledger: Arc::new(ledger),
            ..backends.context()
        };
        Self::with_context(backends, ctx)
    }

    fn with_context(backends: InMemoryBackends, ctx: CheckoutContext) -> Self {
        let verifier = WebhookVerifier::new(SECRET, 300);
        Self {
            orchestrator: CheckoutOrchestrator::new(ctx.clone()),
            reconciler: PaymentReconciler::new(ctx.clone(), Some(verifier.clone())),
            operator: OrderOperator::new(ctx),
            backends,
            verifier,
            user: UserId::new(),
        }
    }

    async fn stock(&self, product: &str, quantity: i64) {
        self.backends
            .ledger
            .upsert_product(ProductId::new(product), quantity, 0)
            .await
            .unwrap();
    }

    async fn add(&self, product: &str, quantity: u32, cents: i64) {
        self.backends
            .carts
            .add_line(
                self.user,
                CartLine::product(product, quantity, Money::from_cents(cents)),
            )
            .await
            .unwrap();
    }

    async fn add_subscription(&self, plan_type: &str) {
        self.backends
            .carts
            .add_line(
                self.user,
                CartLine::with_meta(
                    None,
                    1,
                    Money::from_cents(4500),
                    json!({
                        "type": "subscription",
                        "plan_type": plan_type,
                        "daily_grams": 150,
                        "pouches_per_day": 2
                    }),
                ),
            )
            .await
            .unwrap();
    }

    async fn checkout(&self) -> Result<CheckoutSession, CheckoutError> {
        self.orchestrator
            .begin_checkout(
                &Identity::verified(self.user),
                CheckoutRequest {
                    pet_id: Some(PetId::new()),
                    phone: Some("+15550100".to_string()),
                },
            )
            .await
    }

    async fn counters(&self, product: &str) -> (i64, i64) {
        let record = self
            .backends
            .ledger
            .stock(&ProductId::new(product))
            .await
            .unwrap();
        (record.quantity, record.reserved_quantity)
    }

    async fn pay(&self, session: &CheckoutSession, payment_id: &str, status: &str) {
        self.backends
            .gateway
            .complete_payment(&session.invoice_id, payment_id, status)
            .await
            .unwrap();
    }

    fn signed(&self, body: &serde_json::Value) -> (String, String, Vec<u8>) {
        let body = serde_json::to_vec(body).unwrap();
        let timestamp = Utc::now().timestamp();
        let signature = self.verifier.sign(timestamp, &body).unwrap();
        (timestamp.to_string(), signature, body)
    }

    async fn webhook(
        &self,
        session: &CheckoutSession,
    ) -> Result<checkout::ReconcileOutcome, CheckoutError> {
        let body = json!({ "invoice_id": session.invoice_id });
        let (timestamp, signature, body) = self.signed(&body);
        self.reconciler
            .handle_webhook(Some(&timestamp), Some(&signature), &body)
            .await
    }
}

#[tokio::test]
async fn paid_webhook_deducts_exactly_once() {
    let h = TestHarness::new();
    h.stock("P", 10).await;
    h.add("P", 2, 1000).await;

    let session = h.checkout().await.unwrap();
    assert_eq!(h.counters("P").await, (10, 2));

    h.pay(&session, "PAY-1", "Paid").await;
    let first = h.webhook(&session).await.unwrap();
    assert!(first.applied);
    assert_eq!(first.status, OrderStatus::Paid);
    assert_eq!(h.counters("P").await, (8, 0));

    for _ in 0..5 {
        let again = h.webhook(&session).await.unwrap();
        assert!(!again.applied);
        assert_eq!(again.status, OrderStatus::Paid);
    }
    assert_eq!(h.counters("P").await, (8, 0));

    let deducts = h
        .backends
        .ledger
        .movements(&ProductId::new("P"))
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.kind == MovementKind::Deduct)
        .count();
    assert_eq!(deducts, 1);

    let order = h
        .backends
        .orders
        .get_order(session.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_reference.as_deref(), Some("PAY-1"));
    assert!(h.backends.carts.active_cart(h.user).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_duplicate_webhooks_apply_once() {
    let h = TestHarness::new();
    h.stock("P", 10).await;
    h.add("P", 3, 1000).await;
    let session = h.checkout().await.unwrap();
    h.pay(&session, "PAY-1", "Paid").await;

    let (timestamp, signature, body) = h.signed(&json!({ "invoice_id": session.invoice_id }));
    let mut handles = Vec::new();
    for _ in 0..10 {
        let reconciler = h.reconciler.clone();
        let (timestamp, signature, body) = (timestamp.clone(), signature.clone(), body.clone());
        handles.push(tokio::spawn(async move {
            reconciler
                .handle_webhook(Some(&timestamp), Some(&signature), &body)
                .await
        }));
    }

    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().applied {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(h.counters("P").await, (7, 0));
}

#[tokio::test]
async fn insufficient_stock_creates_no_order() {
    let h = TestHarness::new();
    h.stock("P", 3).await;
    h.add("P", 5, 1000).await;

    let result = h.checkout().await;
    match result {
        Err(CheckoutError::Ledger(LedgerError::InsufficientStock {
            available,
            requested,
            ..
        })) => {
            assert_eq!(available, 3);
            assert_eq!(requested, 5);
        }
        other => panic!("expected insufficient stock, got {other:?}"),
    }
    assert_eq!(h.backends.orders.order_count().await, 0);
    assert_eq!(h.counters("P").await, (3, 0));
}

#[tokio::test]
async fn one_short_line_leaves_every_product_untouched() {
    let h = TestHarness::new();
    h.stock("A", 10).await;
    h.stock("B", 1).await;
    h.add("A", 2, 500).await;
    h.add("B", 5, 500).await;

    let result = h.checkout().await;
    match result {
        Err(CheckoutError::Ledger(LedgerError::InsufficientStock { product_id, .. })) => {
            assert_eq!(product_id, ProductId::new("B"));
        }
        other => panic!("expected insufficient stock, got {other:?}"),
    }
    assert_eq!(h.backends.orders.order_count().await, 0);
    assert_eq!(h.counters("A").await, (10, 0));
    assert_eq!(h.counters("B").await, (1, 0));
    for product in ["A", "B"] {
        assert!(
            h.backends
                .ledger
                .movements(&ProductId::new(product))
                .await
                .unwrap()
                .is_empty()
        );
    }
}

#[tokio::test]
async fn failed_payment_releases_and_keeps_cart() {
    let h = TestHarness::new();
    h.stock("P", 10).await;
    h.add("P", 4, 1000).await;
    h.add_subscription("weekly").await;

    let session = h.checkout().await.unwrap();
    assert_eq!(h.counters("P").await, (10, 4));

    h.pay(&session, "PAY-9", "Failed").await;
    let outcome = h.webhook(&session).await.unwrap();
    assert!(outcome.applied);
    assert_eq!(outcome.status, OrderStatus::Failed);
    assert_eq!(h.counters("P").await, (10, 0));

    let subscriptions = h
        .backends
        .orders
        .subscriptions_for_order(session.order_id)
        .await
        .unwrap();
    assert_eq!(subscriptions[0].status, SubscriptionStatus::Cancelled);
    assert_eq!(h.backends.carts.active_cart(h.user).await.unwrap().len(), 2);
    let sent = h.backends.notifier.sent().await;
    assert!(
        sent.iter()
            .any(|n| matches!(n, Notification::OrderFailed { .. }))
    );

    // A late success for a failed order changes nothing.
    h.pay(&session, "PAY-10", "Paid").await;
    let late = h.webhook(&session).await.unwrap();
    assert!(!late.applied);
    assert_eq!(late.status, OrderStatus::Failed);
    assert_eq!(h.counters("P").await, (10, 0));
}

#[tokio::test]
async fn pending_status_changes_nothing() {
    let h = TestHarness::new();
    h.stock("P", 10).await;
    h.add("P", 1, 1000).await;
    let session = h.checkout().await.unwrap();

    let outcome = h.webhook(&session).await.unwrap();
    assert!(!outcome.applied);
    assert_eq!(outcome.status, OrderStatus::Created);
    assert_eq!(h.counters("P").await, (10, 1));
}

#[tokio::test]
async fn monthly_subscription_activates_on_payment() {
    let h = TestHarness::new();
    h.add_subscription("monthly").await;

    let session = h.checkout().await.unwrap();
    let pending = h
        .backends
        .orders
        .subscriptions_for_order(session.order_id)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, SubscriptionStatus::Pending);
    assert_eq!(
        pending[0].end_date,
        pending[0].start_date + Duration::days(30)
    );
    assert_eq!(pending[0].total_pouches, 60);

    h.pay(&session, "PAY-2", "Succeeded").await;
    h.webhook(&session).await.unwrap();

    let active = h
        .backends
        .orders
        .subscriptions_for_order(session.order_id)
        .await
        .unwrap();
    assert_eq!(active[0].status, SubscriptionStatus::Active);
    assert_eq!(active[0].start_date, pending[0].start_date);
    assert_eq!(active[0].end_date, pending[0].end_date);

    let sent = h.backends.notifier.sent().await;
    assert!(sent.iter().any(|n| matches!(n, Notification::OrderPaid { .. })));
    assert!(
        sent.iter()
            .any(|n| matches!(n, Notification::SubscriptionActivated { .. }))
    );
}

#[tokio::test]
async fn redirect_is_reverified_with_gateway() {
    let h = TestHarness::new();
    h.stock("P", 10).await;
    h.add("P", 1, 1000).await;
    let session = h.checkout().await.unwrap();

    // The browser claims success but the gateway still reports pending.
    let outcome = h
        .reconciler
        .handle_redirect(PaymentNotification {
            invoice_id: Some(session.invoice_id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!outcome.applied);

    h.pay(&session, "PAY-3", "Paid").await;
    let outcome = h
        .reconciler
        .handle_redirect(PaymentNotification {
            payment_id: Some("PAY-3".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(outcome.applied);
    assert_eq!(outcome.order_id, session.order_id);
}

#[tokio::test]
async fn redirect_by_order_id() {
    let h = TestHarness::new();
    h.stock("P", 10).await;
    h.add("P", 1, 1000).await;
    let session = h.checkout().await.unwrap();
    h.pay(&session, "PAY-4", "Paid").await;

    let outcome = h
        .reconciler
        .handle_redirect(PaymentNotification {
            order_id: Some(session.order_id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(outcome.applied);
}

#[tokio::test]
async fn bad_signature_is_rejected_before_any_change() {
    let h = TestHarness::new();
    h.stock("P", 10).await;
    h.add("P", 1, 1000).await;
    let session = h.checkout().await.unwrap();
    h.pay(&session, "PAY-5", "Paid").await;

    let (timestamp, _, body) = h.signed(&json!({ "invoice_id": session.invoice_id }));
    let result = h
        .reconciler
        .handle_webhook(Some(&timestamp), Some("deadbeef"), &body)
        .await;
    assert!(matches!(
        result,
        Err(CheckoutError::InvalidWebhookSignature(_))
    ));
    assert_eq!(h.counters("P").await, (10, 1));
}

#[tokio::test]
async fn webhook_without_secret_is_rejected() {
    let backends = InMemoryBackends::new();
    let reconciler = PaymentReconciler::new(backends.context(), None);
    let result = reconciler.handle_webhook(Some("1"), Some("00"), b"{}").await;
    assert!(matches!(
        result,
        Err(CheckoutError::InvalidWebhookSignature(_))
    ));
}

#[tokio::test]
async fn unknown_invoice_is_not_found() {
    let h = TestHarness::new();
    let result = h
        .reconciler
        .handle_redirect(PaymentNotification {
            invoice_id: Some("INV-9999".to_string()),
            ..Default::default()
        })
        .await;
    assert!(matches!(result, Err(CheckoutError::PaymentGateway(_))));

    let result = h.reconciler.handle_redirect(PaymentNotification::default()).await;
    assert!(matches!(
        result,
        Err(CheckoutError::MalformedNotification(_))
    ));
}

#[tokio::test]
async fn cancel_created_order_releases_stock() {
    let h = TestHarness::new();
    h.stock("P", 10).await;
    h.add("P", 3, 1000).await;
    let session = h.checkout().await.unwrap();

    let order = h.operator.cancel(session.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(h.counters("P").await, (10, 0));

    // A payment arriving after cancellation is not applied.
    h.pay(&session, "PAY-6", "Paid").await;
    let outcome = h.webhook(&session).await.unwrap();
    assert!(!outcome.applied);
    assert_eq!(h.counters("P").await, (10, 0));
}

#[tokio::test]
async fn cancel_paid_order_keeps_deduction() {
    let h = TestHarness::new();
    h.stock("P", 10).await;
    h.add("P", 3, 1000).await;
    let session = h.checkout().await.unwrap();
    h.pay(&session, "PAY-7", "Paid").await;
    h.webhook(&session).await.unwrap();

    h.operator.cancel(session.order_id).await.unwrap();
    assert_eq!(h.counters("P").await, (7, 0));
    assert!(h.operator.fulfill(session.order_id).await.is_err());
}

#[tokio::test]
async fn fulfill_paid_order() {
    let h = TestHarness::new();
    h.stock("P", 10).await;
    h.add("P", 1, 1000).await;
    let session = h.checkout().await.unwrap();
    h.pay(&session, "PAY-8", "Paid").await;
    h.webhook(&session).await.unwrap();

    let order = h.operator.fulfill(session.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Fulfilled);

    let details = h.operator.order_details(session.order_id).await.unwrap();
    assert_eq!(details.items.len(), 1);
    assert_eq!(details.order.status, OrderStatus::Fulfilled);
}

#[tokio::test]
async fn expire_abandoned_releases_old_reservations() {
    let h = TestHarness::new();
    h.stock("P", 10).await;
    h.add("P", 2, 1000).await;
    let session = h.checkout().await.unwrap();

    let none = h
        .operator
        .expire_abandoned(Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    assert!(none.is_empty());

    let expired = h
        .operator
        .expire_abandoned(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(expired, vec![session.order_id]);
    assert_eq!(h.counters("P").await, (10, 0));
}

#[tokio::test]
async fn notification_failure_does_not_undo_payment() {
    let h = TestHarness::new();
    h.stock("P", 10).await;
    h.add("P", 1, 1000).await;
    let session = h.checkout().await.unwrap();
    h.backends.notifier.set_fail(true).await;
    h.pay(&session, "PAY-11", "Paid").await;

    let outcome = h.webhook(&session).await.unwrap();
    assert!(outcome.applied);
    assert_eq!(h.counters("P").await, (9, 0));
}

#[tokio::test]
async fn adjust_stock_records_actor() {
    let h = TestHarness::new();
    h.stock("P", 10).await;
    let actor = UserId::new();

    let record = h
        .operator
        .adjust_stock(&ProductId::new("P"), -3, "damaged in transit", actor)
        .await
        .unwrap();
    assert_eq!(record.quantity, 7);

    let movements = h
        .backends
        .ledger
        .movements(&ProductId::new("P"))
        .await
        .unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].actor_id, Some(actor));
}

#[tokio::test]
async fn expiry_during_checkout_rolls_the_order_back() {
    let h = TestHarness::interrupted(|backends| {
        Fault::ExpireAfterReserve(OrderOperator::new(backends.context()))
    });
    h.stock("P", 10).await;
    h.add("P", 3, 1000).await;
    h.add_subscription("weekly").await;

    let result = h.checkout().await;
    assert!(matches!(
        result,
        Err(CheckoutError::Domain(DomainError::OrderClosed {
            status: OrderStatus::Cancelled,
            ..
        }))
    ));

    assert_eq!(h.backends.orders.order_count().await, 0);
    assert_eq!(h.backends.orders.subscription_count().await, 0);
    assert_eq!(h.backends.gateway.session_count().await, 0);
    assert_eq!(h.counters("P").await, (10, 0));
    assert_eq!(h.backends.carts.active_cart(h.user).await.unwrap().len(), 2);

    let releases: i64 = h
        .backends
        .ledger
        .movements(&ProductId::new("P"))
        .await
        .unwrap()
        .iter()
        .filter(|m| m.kind == MovementKind::Release)
        .map(|m| m.amount)
        .sum();
    assert_eq!(releases, 3);
}

#[tokio::test]
async fn redelivery_finishes_interrupted_payment() {
    let h = TestHarness::interrupted(|_| Fault::FailDeduct);
    h.stock("P", 10).await;
    h.add("P", 2, 1000).await;
    h.add_subscription("monthly").await;
    let session = h.checkout().await.unwrap();
    h.pay(&session, "PAY-12", "Paid").await;

    assert!(h.webhook(&session).await.is_err());
    let order = h
        .backends
        .orders
        .get_order(session.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(h.counters("P").await, (10, 2));

    let retried = h.webhook(&session).await.unwrap();
    assert!(retried.applied);
    assert_eq!(retried.status, OrderStatus::Paid);
    assert_eq!(h.counters("P").await, (8, 0));
    let subscriptions = h
        .backends
        .orders
        .subscriptions_for_order(session.order_id)
        .await
        .unwrap();
    assert_eq!(subscriptions[0].status, SubscriptionStatus::Active);
    assert!(h.backends.carts.active_cart(h.user).await.unwrap().is_empty());

    let duplicate = h.webhook(&session).await.unwrap();
    assert!(!duplicate.applied);
    assert_eq!(h.counters("P").await, (8, 0));
    let paid_notices = h
        .backends
        .notifier
        .sent()
        .await
        .iter()
        .filter(|n| matches!(n, Notification::OrderPaid { .. }))
        .count();
    assert_eq!(paid_notices, 1);
}

#[tokio::test]
async fn payment_keeps_lines_added_after_checkout() {
    let h = TestHarness::new();
    h.stock("P", 10).await;
    h.stock("Q", 10).await;
    h.add("P", 1, 1000).await;
    let session = h.checkout().await.unwrap();

    h.add("Q", 4, 250).await;
    h.pay(&session, "PAY-13", "Paid").await;
    assert!(h.webhook(&session).await.unwrap().applied);

    let cart = h.backends.carts.active_cart(h.user).await.unwrap();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart[0].product_id, Some(ProductId::new("Q")));
    assert_eq!(cart[0].quantity, 4);
}
