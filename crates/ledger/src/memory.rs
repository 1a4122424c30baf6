use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    InventoryLedger, InventoryMovement, InventoryRecord, LedgerError, MovementKind, OrderHolding,
    OrderId, ProductId, Result, StockItem, UserId, normalize_items,
};

#[derive(Debug, Default)]
struct LedgerState {
    records: HashMap<ProductId, InventoryRecord>,
    movements: Vec<InventoryMovement>,
}

impl LedgerState {
    fn record(&self, product_id: &ProductId) -> Result<&InventoryRecord> {
        self.records
            .get(product_id)
            .ok_or_else(|| LedgerError::ProductNotFound(product_id.clone()))
    }

    fn holding(&self, order_id: OrderId, product_id: &ProductId) -> OrderHolding {
        OrderHolding::tally(
            self.movements
                .iter()
                .filter(|m| m.order_id == Some(order_id) && &m.product_id == product_id),
        )
    }
}

/// In-memory ledger implementation for testing and local runs.
///
/// A single write lock stands in for the row locks of the PostgreSQL
/// implementation. Batch operations stage changes on copies and only
/// commit them once every item has succeeded.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of movements logged.
    pub async fn movement_count(&self) -> usize {
        self.state.read().await.movements.len()
    }

    /// Applies `op` to every item of a normalized batch and commits only if
    /// all of them succeed.
    ///
    /// `op` sees the order's own movements on the product; items it answers
    /// with `None` are left untouched and log nothing. Returns the units
    /// moved.
    async fn apply_batch<F>(
        &self,
        items: &[StockItem],
        order_id: OrderId,
        kind: MovementKind,
        op: F,
    ) -> Result<i64>
    where
        F: Fn(&mut InventoryRecord, u32, &OrderHolding) -> Result<Option<i64>> + Send,
    {
        let items = normalize_items(items)?;
        let mut state = self.state.write().await;

        let mut staged = Vec::with_capacity(items.len());
        for item in &items {
            let mut record = state.record(&item.product_id)?.clone();
            let holding = state.holding(order_id, &item.product_id);
            match op(&mut record, item.quantity, &holding) {
                Ok(Some(amount)) => staged.push((record, amount)),
                Ok(None) => {}
                Err(e) => {
                    metrics::counter!("ledger_rejections_total", "reason" => e.reason())
                        .increment(1);
                    tracing::warn!(
                        %order_id,
                        product_id = %item.product_id,
                        op = kind.as_str(),
                        error = %e,
                        "batch ledger operation rolled back"
                    );
                    return Err(e);
                }
            }
        }

        let mut moved = 0;
        let applied = staged.len();
        for (record, amount) in staged {
            if kind != MovementKind::Release {
                record.report_low_stock();
            }
            state.movements.push(InventoryMovement::for_order(
                record.product_id.clone(),
                order_id,
                kind,
                amount,
            ));
            state.records.insert(record.product_id.clone(), record);
            moved += amount;
        }
        metrics::counter!("ledger_operations_total", "op" => kind.as_str())
            .increment(applied as u64);

        Ok(moved)
    }

    /// Applies `op` to one record under the write lock.
    async fn apply_one<F>(
        &self,
        product_id: &ProductId,
        quantity: u32,
        order_id: OrderId,
        kind: MovementKind,
        op: F,
    ) -> Result<(InventoryRecord, i64)>
    where
        F: FnOnce(&mut InventoryRecord, u32) -> Result<i64> + Send,
    {
        let mut state = self.state.write().await;
        let mut record = state.record(product_id)?.clone();

        let amount = op(&mut record, quantity).inspect_err(|e| {
            metrics::counter!("ledger_rejections_total", "reason" => e.reason()).increment(1);
        })?;

        state.movements.push(InventoryMovement::for_order(
            product_id.clone(),
            order_id,
            kind,
            amount,
        ));
        state.records.insert(product_id.clone(), record.clone());
        metrics::counter!("ledger_operations_total", "op" => kind.as_str()).increment(1);

        Ok((record, amount))
    }
}

#[async_trait]
impl InventoryLedger for InMemoryLedger {
    async fn upsert_product(
        &self,
        product_id: ProductId,
        quantity: i64,
        low_stock_threshold: i64,
    ) -> Result<InventoryRecord> {
        let mut state = self.state.write().await;
        let record = match state.records.get(&product_id) {
            Some(existing) => {
                let mut record = existing.clone();
                record.quantity = quantity.max(record.reserved_quantity);
                record.low_stock_threshold = low_stock_threshold.max(0);
                record
            }
            None => InventoryRecord::new(product_id.clone(), quantity, low_stock_threshold),
        };
        state.records.insert(product_id, record.clone());
        Ok(record)
    }

    async fn stock(&self, product_id: &ProductId) -> Result<InventoryRecord> {
        self.state.read().await.record(product_id).cloned()
    }

    #[tracing::instrument(skip(self))]
    async fn reserve(
        &self,
        product_id: &ProductId,
        quantity: u32,
        order_id: OrderId,
    ) -> Result<i64> {
        let (record, _) = self
            .apply_one(
                product_id,
                quantity,
                order_id,
                MovementKind::Reserve,
                |record, qty| record.reserve(qty).map(|_| i64::from(qty)),
            )
            .await?;
        record.report_low_stock();
        Ok(record.available())
    }

    #[tracing::instrument(skip(self))]
    async fn deduct(
        &self,
        product_id: &ProductId,
        quantity: u32,
        order_id: OrderId,
    ) -> Result<InventoryRecord> {
        let (record, _) = self
            .apply_one(
                product_id,
                quantity,
                order_id,
                MovementKind::Deduct,
                |record, qty| record.deduct(qty).map(|()| i64::from(qty)),
            )
            .await?;
        record.report_low_stock();
        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    async fn release(
        &self,
        product_id: &ProductId,
        quantity: u32,
        order_id: OrderId,
    ) -> Result<i64> {
        let (_, released) = self
            .apply_one(
                product_id,
                quantity,
                order_id,
                MovementKind::Release,
                |record, qty| record.release(qty),
            )
            .await?;
        Ok(released)
    }

    #[tracing::instrument(skip(self))]
    async fn adjust_admin(
        &self,
        product_id: &ProductId,
        delta: i64,
        reason: &str,
        actor_id: UserId,
    ) -> Result<InventoryRecord> {
        let mut state = self.state.write().await;
        let mut record = state.record(product_id)?.clone();
        let applied = record.adjust(delta);

        state.movements.push(InventoryMovement::adjustment(
            product_id.clone(),
            applied,
            reason,
            actor_id,
        ));
        state.records.insert(product_id.clone(), record.clone());
        metrics::counter!("ledger_operations_total", "op" => "adjust").increment(1);
        tracing::info!(%product_id, delta, applied, %actor_id, reason, "stock adjusted");

        Ok(record)
    }

    #[tracing::instrument(skip(self, items), fields(item_count = items.len()))]
    async fn reserve_all(&self, items: &[StockItem], order_id: OrderId) -> Result<()> {
        self.apply_batch(items, order_id, MovementKind::Reserve, |record, qty, _| {
            record.reserve(qty).map(|_| Some(i64::from(qty)))
        })
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, items), fields(item_count = items.len()))]
    async fn deduct_all(&self, items: &[StockItem], order_id: OrderId) -> Result<i64> {
        self.apply_batch(items, order_id, MovementKind::Deduct, |record, qty, holding| {
            record.deduct_held(qty, holding)
        })
        .await
    }

    #[tracing::instrument(skip(self, items), fields(item_count = items.len()))]
    async fn release_all(&self, items: &[StockItem], order_id: OrderId) -> Result<i64> {
        self.apply_batch(items, order_id, MovementKind::Release, |record, qty, holding| {
            record.release_held(qty, holding)
        })
        .await
    }

    async fn movements(&self, product_id: &ProductId) -> Result<Vec<InventoryMovement>> {
        let state = self.state.read().await;
        state.record(product_id)?;
        Ok(state
            .movements
            .iter()
            .filter(|m| &m.product_id == product_id)
            .cloned()
            .collect())
    }
}
