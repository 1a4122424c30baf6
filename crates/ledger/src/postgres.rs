use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::{
    InventoryLedger, InventoryMovement, InventoryRecord, LedgerError, MovementId, MovementKind,
    OrderHolding, OrderId, ProductId, Result, StockItem, UserId, normalize_items,
};

/// PostgreSQL-backed ledger implementation.
///
/// Each operation opens a transaction and takes `SELECT ... FOR UPDATE`
/// locks on the affected `inventory_records` rows. Batches lock rows in
/// product-id order.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool with the defaults used by the service.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<InventoryRecord> {
        Ok(InventoryRecord {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            quantity: row.try_get("quantity")?,
            reserved_quantity: row.try_get("reserved_quantity")?,
            low_stock_threshold: row.try_get("low_stock_threshold")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_movement(row: PgRow) -> Result<InventoryMovement> {
        let kind: String = row.try_get("kind")?;
        let kind = MovementKind::parse(&kind).ok_or_else(|| {
            LedgerError::Database(sqlx::Error::Decode(
                format!("unknown movement kind: {kind}").into(),
            ))
        })?;

        Ok(InventoryMovement {
            id: MovementId::from_uuid(row.try_get::<Uuid, _>("id")?),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            order_id: row
                .try_get::<Option<Uuid>, _>("order_id")?
                .map(OrderId::from_uuid),
            kind,
            amount: row.try_get("amount")?,
            reason: row.try_get("reason")?,
            actor_id: row
                .try_get::<Option<Uuid>, _>("actor_id")?
                .map(UserId::from_uuid),
            timestamp: row.try_get("created_at")?,
        })
    }

    async fn lock_record(
        conn: &mut PgConnection,
        product_id: &ProductId,
    ) -> Result<InventoryRecord> {
        let row = sqlx::query(
            r#"
            SELECT product_id, quantity, reserved_quantity, low_stock_threshold, updated_at
            FROM inventory_records
            WHERE product_id = $1
            FOR UPDATE
            "#,
        )
        .bind(product_id.as_str())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::ProductNotFound(product_id.clone()))?;

        Self::row_to_record(row)
    }

    async fn order_holding(
        conn: &mut PgConnection,
        order_id: OrderId,
        product_id: &ProductId,
    ) -> Result<OrderHolding> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(amount) FILTER (WHERE kind = 'reserve'), 0)::BIGINT AS reserved,
                COALESCE(SUM(amount) FILTER (WHERE kind = 'release'), 0)::BIGINT AS released,
                COALESCE(SUM(amount) FILTER (WHERE kind = 'deduct'), 0)::BIGINT AS deducted
            FROM inventory_movements
            WHERE order_id = $1 AND product_id = $2
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(product_id.as_str())
        .fetch_one(&mut *conn)
        .await?;

        Ok(OrderHolding {
            reserved: row.try_get("reserved")?,
            released: row.try_get("released")?,
            deducted: row.try_get("deducted")?,
        })
    }

    async fn write_counters(conn: &mut PgConnection, record: &InventoryRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE inventory_records
            SET quantity = $2, reserved_quantity = $3, updated_at = $4
            WHERE product_id = $1
            "#,
        )
        .bind(record.product_id.as_str())
        .bind(record.quantity)
        .bind(record.reserved_quantity)
        .bind(record.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn insert_movement(conn: &mut PgConnection, movement: &InventoryMovement) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_movements (id, product_id, order_id, kind, amount, reason, actor_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(movement.id.as_uuid())
        .bind(movement.product_id.as_str())
        .bind(movement.order_id.map(|id| id.as_uuid()))
        .bind(movement.kind.as_str())
        .bind(movement.amount)
        .bind(movement.reason.as_deref())
        .bind(movement.actor_id.map(|id| id.as_uuid()))
        .bind(movement.timestamp)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Locks, mutates and logs every item inside one transaction.
    ///
    /// `op` sees the order's own movements on each locked product and
    /// answers `None` to leave it untouched. Returning early drops the
    /// transaction, which rolls back every change already made in the batch.
    async fn apply_batch<F>(
        &self,
        items: &[StockItem],
        order_id: OrderId,
        kind: MovementKind,
        op: F,
    ) -> Result<Vec<(InventoryRecord, i64)>>
    where
        F: Fn(&mut InventoryRecord, u32, &OrderHolding) -> Result<Option<i64>> + Send + Sync,
    {
        let items = normalize_items(items)?;
        let mut tx = self.pool.begin().await?;
        let mut applied = Vec::with_capacity(items.len());

        for item in &items {
            let mut record = Self::lock_record(&mut tx, &item.product_id).await?;
            let holding = Self::order_holding(&mut tx, order_id, &item.product_id).await?;
            let amount = match op(&mut record, item.quantity, &holding) {
                Ok(Some(amount)) => amount,
                Ok(None) => continue,
                Err(e) => {
                    metrics::counter!("ledger_rejections_total", "reason" => e.reason())
                        .increment(1);
                    tracing::warn!(
                        %order_id,
                        product_id = %item.product_id,
                        op = kind.as_str(),
                        error = %e,
                        "ledger transaction rolled back"
                    );
                    return Err(e);
                }
            };

            Self::write_counters(&mut tx, &record).await?;
            let movement =
                InventoryMovement::for_order(item.product_id.clone(), order_id, kind, amount);
            Self::insert_movement(&mut tx, &movement).await?;
            applied.push((record, amount));
        }

        tx.commit().await?;
        metrics::counter!("ledger_operations_total", "op" => kind.as_str())
            .increment(applied.len() as u64);

        if kind != MovementKind::Release {
            for (record, _) in &applied {
                record.report_low_stock();
            }
        }

        Ok(applied)
    }

    async fn apply_one<F>(
        &self,
        product_id: &ProductId,
        quantity: u32,
        order_id: OrderId,
        kind: MovementKind,
        op: F,
    ) -> Result<(InventoryRecord, i64)>
    where
        F: Fn(&mut InventoryRecord, u32) -> Result<i64> + Send + Sync,
    {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity {
                product_id: product_id.clone(),
                quantity,
            });
        }

        let item = StockItem::new(product_id.clone(), quantity);
        let mut applied = self
            .apply_batch(std::slice::from_ref(&item), order_id, kind, |record, qty, _| {
                op(record, qty).map(Some)
            })
            .await?;
        applied
            .pop()
            .ok_or_else(|| LedgerError::ProductNotFound(product_id.clone()))
    }
}

#[async_trait]
impl InventoryLedger for PostgresLedger {
    async fn upsert_product(
        &self,
        product_id: ProductId,
        quantity: i64,
        low_stock_threshold: i64,
    ) -> Result<InventoryRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO inventory_records (product_id, quantity, reserved_quantity, low_stock_threshold, updated_at)
            VALUES ($1, GREATEST($2, 0), 0, GREATEST($3, 0), NOW())
            ON CONFLICT (product_id) DO UPDATE SET
                quantity = GREATEST(EXCLUDED.quantity, inventory_records.reserved_quantity),
                low_stock_threshold = EXCLUDED.low_stock_threshold,
                updated_at = NOW()
            RETURNING product_id, quantity, reserved_quantity, low_stock_threshold, updated_at
            "#,
        )
        .bind(product_id.as_str())
        .bind(quantity)
        .bind(low_stock_threshold)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_record(row)
    }

    async fn stock(&self, product_id: &ProductId) -> Result<InventoryRecord> {
        let row = sqlx::query(
            r#"
            SELECT product_id, quantity, reserved_quantity, low_stock_threshold, updated_at
            FROM inventory_records
            WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| LedgerError::ProductNotFound(product_id.clone()))?;

        Self::row_to_record(row)
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
        let mut tx = self.pool.begin().await?;
        let mut record = Self::lock_record(&mut tx, product_id).await?;
        let applied = record.adjust(delta);

        Self::write_counters(&mut tx, &record).await?;
        let movement = InventoryMovement::adjustment(product_id.clone(), applied, reason, actor_id);
        Self::insert_movement(&mut tx, &movement).await?;
        tx.commit().await?;

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
        let applied = self
            .apply_batch(items, order_id, MovementKind::Deduct, |record, qty, holding| {
                record.deduct_held(qty, holding)
            })
            .await?;
        Ok(applied.iter().map(|(_, amount)| amount).sum())
    }

    #[tracing::instrument(skip(self, items), fields(item_count = items.len()))]
    async fn release_all(&self, items: &[StockItem], order_id: OrderId) -> Result<i64> {
        let applied = self
            .apply_batch(items, order_id, MovementKind::Release, |record, qty, holding| {
                record.release_held(qty, holding)
            })
            .await?;
        Ok(applied.iter().map(|(_, amount)| amount).sum())
    }

    async fn movements(&self, product_id: &ProductId) -> Result<Vec<InventoryMovement>> {
        self.stock(product_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, product_id, order_id, kind, amount, reason, actor_id, created_at
            FROM inventory_movements
            WHERE product_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(product_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_movement).collect()
    }
}
