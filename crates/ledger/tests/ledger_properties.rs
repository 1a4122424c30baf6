//! Invariant checks for the in-memory ledger under concurrent callers.

use ledger::{
    InMemoryLedger, InventoryLedger, InventoryLedgerExt, LedgerError, MovementKind, OrderId,
    ProductId, StockItem, UserId,
};

async fn seeded(products: &[(&str, i64)]) -> InMemoryLedger {
    let ledger = InMemoryLedger::new();
    for (id, quantity) in products {
        ledger
            .upsert_product(ProductId::new(*id), *quantity, 0)
            .await
            .unwrap();
    }
    ledger
}

/// Sum of movement amounts per kind must reproduce the counters.
async fn assert_counters_match_log(ledger: &InMemoryLedger, product: &str, initial: i64) {
    let product_id = ProductId::new(product);
    let record = ledger.stock(&product_id).await.unwrap();
    let movements = ledger.movements(&product_id).await.unwrap();

    let sum = |kind: MovementKind| -> i64 {
        movements
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.amount)
            .sum()
    };

    let reserved = sum(MovementKind::Reserve) - sum(MovementKind::Deduct) - sum(MovementKind::Release);
    let quantity = initial - sum(MovementKind::Deduct) + sum(MovementKind::Adjust);

    assert_eq!(record.reserved_quantity, reserved);
    assert_eq!(record.quantity, quantity);
    assert!(record.reserved_quantity <= record.quantity);
    assert!(record.reserved_quantity >= 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_single_unit_reservations() {
    let ledger = seeded(&[("A", 7)]).await;

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .reserve(&ProductId::new("A"), 1, OrderId::new())
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::InsufficientStock { .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(succeeded, 7);
    assert_eq!(rejected, 43);
    assert_eq!(ledger.available(&ProductId::new("A")).await.unwrap(), 0);
    assert_counters_match_log(&ledger, "A", 7).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_batches_are_all_or_nothing() {
    let ledger = seeded(&[("A", 10), ("B", 10), ("C", 10)]).await;

    // Each batch needs 2 of every product in a different order, so at most
    // five batches can succeed.
    let handles: Vec<_> = (0..12)
        .map(|i| {
            let ledger = ledger.clone();
            let mut items = vec![
                StockItem::new("A", 2),
                StockItem::new("B", 2),
                StockItem::new("C", 2),
            ];
            items.rotate_left(i % 3);
            tokio::spawn(async move { ledger.reserve_all(&items, OrderId::new()).await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 5);
    for product in ["A", "B", "C"] {
        let record = ledger.stock(&ProductId::new(product)).await.unwrap();
        assert_eq!(record.reserved_quantity, 10);
        assert_counters_match_log(&ledger, product, 10).await;
    }
}

#[tokio::test]
async fn mixed_operations_keep_log_and_counters_consistent() {
    let ledger = seeded(&[("A", 20)]).await;
    let product = ProductId::new("A");
    let actor = UserId::new();

    let first = OrderId::new();
    let second = OrderId::new();
    ledger.reserve(&product, 5, first).await.unwrap();
    ledger.reserve(&product, 3, second).await.unwrap();
    ledger.deduct(&product, 5, first).await.unwrap();
    ledger.release(&product, 10, second).await.unwrap();
    ledger
        .adjust_admin(&product, -4, "damaged", actor)
        .await
        .unwrap();
    ledger
        .adjust_admin(&product, 2, "recount", actor)
        .await
        .unwrap();

    let record = ledger.stock(&product).await.unwrap();
    assert_eq!(record.quantity, 13);
    assert_eq!(record.reserved_quantity, 0);
    assert_counters_match_log(&ledger, "A", 20).await;
}

#[tokio::test]
async fn release_is_idempotent_per_order() {
    let ledger = seeded(&[("A", 5)]).await;
    let product = ProductId::new("A");
    let order = OrderId::new();

    ledger.reserve(&product, 3, order).await.unwrap();
    let items = vec![StockItem::new("A", 3)];
    ledger.release_all(&items, order).await.unwrap();
    ledger.release_all(&items, order).await.unwrap();

    assert_eq!(ledger.available(&product).await.unwrap(), 5);
    assert_counters_match_log(&ledger, "A", 5).await;
}
