//! PostgreSQL-backed repositories.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::{
    CartLine, CartRepository, DomainError, LineItemKind, Money, Order, OrderId, OrderItem,
    OrderItemId, OrderRepository, OrderStatus, PetId, PlanType, ProductId, Result, Subscription,
    SubscriptionId, SubscriptionStatus, Transition, UserId,
};

const ORDER_COLUMNS: &str = "id, user_id, pet_id, phone, status, total_cents, \
     payment_invoice_id, payment_reference, created_at, updated_at";

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, pet_id, order_id, order_item_id, plan_type, \
     status, start_date, end_date, next_delivery_date, daily_grams, pouches_per_day, \
     total_pouches, price_per_period_cents";

fn decode_error(message: String) -> DomainError {
    DomainError::Database(sqlx::Error::Decode(message.into()))
}

fn to_column(value: u32, field: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| DomainError::InvalidLineItem(format!("{field} out of range: {value}")))
}

fn from_column(value: i32, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| decode_error(format!("negative {field}: {value}")))
}

fn row_to_order(row: &PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    let status = OrderStatus::parse(&status)
        .ok_or_else(|| decode_error(format!("unknown order status: {status}")))?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        pet_id: row
            .try_get::<Option<Uuid>, _>("pet_id")?
            .map(PetId::from_uuid),
        phone: row.try_get("phone")?,
        status,
        total_amount: Money::from_cents(row.try_get("total_cents")?),
        payment_invoice_id: row.try_get("payment_invoice_id")?,
        payment_reference: row.try_get("payment_reference")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_item(row: &PgRow) -> Result<OrderItem> {
    let product_id = row
        .try_get::<Option<String>, _>("product_id")?
        .map(ProductId::new);
    let meta: Option<serde_json::Value> = row.try_get("meta")?;

    Ok(OrderItem {
        id: OrderItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        kind: LineItemKind::from_parts(product_id, meta.as_ref())?,
        quantity: from_column(row.try_get("quantity")?, "quantity")?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        cart_line_id: row.try_get("cart_line_id")?,
    })
}

fn row_to_subscription(row: &PgRow) -> Result<Subscription> {
    let plan_type: String = row.try_get("plan_type")?;
    let plan_type = PlanType::parse(&plan_type)
        .ok_or_else(|| decode_error(format!("unknown plan type: {plan_type}")))?;
    let status: String = row.try_get("status")?;
    let status = SubscriptionStatus::parse(&status)
        .ok_or_else(|| decode_error(format!("unknown subscription status: {status}")))?;

    Ok(Subscription {
        id: SubscriptionId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        pet_id: PetId::from_uuid(row.try_get::<Uuid, _>("pet_id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        order_item_id: OrderItemId::from_uuid(row.try_get::<Uuid, _>("order_item_id")?),
        plan_type,
        status,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        next_delivery_date: row.try_get("next_delivery_date")?,
        daily_grams: from_column(row.try_get("daily_grams")?, "daily_grams")?,
        pouches_per_day: from_column(row.try_get("pouches_per_day")?, "pouches_per_day")?,
        total_pouches: from_column(row.try_get("total_pouches")?, "total_pouches")?,
        price_per_period: Money::from_cents(row.try_get("price_per_period_cents")?),
    })
}

fn row_to_cart_line(row: &PgRow) -> Result<CartLine> {
    Ok(CartLine {
        id: row.try_get("id")?,
        product_id: row
            .try_get::<Option<String>, _>("product_id")?
            .map(ProductId::new),
        quantity: from_column(row.try_get("quantity")?, "quantity")?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        meta: row.try_get("meta")?,
        added_at: row.try_get("created_at")?,
    })
}

/// Locks the order row and returns its status.
async fn lock_status(conn: &mut PgConnection, order_id: OrderId) -> Result<OrderStatus> {
    let current: Option<String> =
        sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?;
    let current = current.ok_or(DomainError::OrderNotFound(order_id))?;
    OrderStatus::parse(&current)
        .ok_or_else(|| decode_error(format!("unknown order status: {current}")))
}

/// Locks the order row and fails unless it is still `created`.
async fn lock_open(conn: &mut PgConnection, order_id: OrderId) -> Result<()> {
    let status = lock_status(conn, order_id).await?;
    if status != OrderStatus::Created {
        return Err(DomainError::OrderClosed { order_id, status });
    }
    Ok(())
}

/// PostgreSQL-backed order repository.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Creates a new repository over an existing pool.
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

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE {column} = $1 LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_order).transpose()
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    async fn create_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, pet_id, phone, status, total_cents,
                                payment_invoice_id, payment_reference, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.pet_id.map(|id| id.as_uuid()))
        .bind(order.phone.as_deref())
        .bind(order.status.as_str())
        .bind(order.total_amount.cents())
        .bind(order.payment_invoice_id.as_deref())
        .bind(order.payment_reference.as_deref())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, items, subscriptions), fields(items = items.len(), subscriptions = subscriptions.len()))]
    async fn insert_items(
        &self,
        order_id: OrderId,
        items: &[OrderItem],
        subscriptions: &[Subscription],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        lock_open(&mut tx, order_id).await?;

        for (position, item) in items.iter().enumerate() {
            let (product_id, meta) = item.kind.to_parts()?;
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, position, product_id, quantity, unit_price_cents, meta, cart_line_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(order_id.as_uuid())
            .bind(i32::try_from(position).map_err(|_| {
                DomainError::InvalidLineItem(format!("too many lines: {position}"))
            })?)
            .bind(product_id.as_ref().map(|p| p.as_str()))
            .bind(to_column(item.quantity, "quantity")?)
            .bind(item.unit_price.cents())
            .bind(meta)
            .bind(item.cart_line_id)
            .execute(&mut *tx)
            .await?;
        }

        for subscription in subscriptions {
            sqlx::query(&format!(
                "INSERT INTO subscriptions ({SUBSCRIPTION_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
            ))
            .bind(subscription.id.as_uuid())
            .bind(subscription.user_id.as_uuid())
            .bind(subscription.pet_id.as_uuid())
            .bind(subscription.order_id.as_uuid())
            .bind(subscription.order_item_id.as_uuid())
            .bind(subscription.plan_type.as_str())
            .bind(subscription.status.as_str())
            .bind(subscription.start_date)
            .bind(subscription.end_date)
            .bind(subscription.next_delivery_date)
            .bind(to_column(subscription.daily_grams, "daily_grams")?)
            .bind(to_column(subscription.pouches_per_day, "pouches_per_day")?)
            .bind(to_column(subscription.total_pouches, "total_pouches")?)
            .bind(subscription.price_per_period.cents())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn set_payment_session(
        &self,
        order_id: OrderId,
        invoice_id: &str,
        payment_reference: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        lock_open(&mut tx, order_id).await?;

        sqlx::query(
            r#"
            UPDATE orders
            SET payment_invoice_id = $2,
                payment_reference = COALESCE($3, payment_reference),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(invoice_id)
        .bind(payment_reference)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn find_by_invoice_id(&self, invoice_id: &str) -> Result<Option<Order>> {
        self.find_one("payment_invoice_id", invoice_id).await
    }

    async fn find_by_payment_reference(&self, payment_reference: &str) -> Result<Option<Order>> {
        self.find_one("payment_reference", payment_reference).await
    }

    async fn items_for_order(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, product_id, quantity, unit_price_cents, meta, cart_line_id
            FROM order_items
            WHERE order_id = $1
            ORDER BY position
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_item).collect()
    }

    async fn subscriptions_for_order(&self, order_id: OrderId) -> Result<Vec<Subscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE order_id = $1 ORDER BY start_date, id"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_subscription).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn transition_status(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        payment_reference: Option<&str>,
    ) -> Result<Transition> {
        let mut tx = self.pool.begin().await?;
        let from = lock_status(&mut tx, order_id).await?;

        if !from.can_transition_to(to) {
            return Ok(Transition::Unchanged { current: from });
        }

        let sql = format!(
            "UPDATE orders \
             SET status = $2, payment_reference = COALESCE($3, payment_reference), updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {ORDER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .bind(to.as_str())
            .bind(payment_reference)
            .fetch_one(&mut *tx)
            .await?;
        let order = row_to_order(&row)?;

        tx.commit().await?;
        Ok(Transition::Applied { from, order })
    }

    #[tracing::instrument(skip(self))]
    async fn set_subscriptions_status(
        &self,
        order_id: OrderId,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE subscriptions SET status = $3 WHERE order_id = $1 AND status = $2",
        )
        .bind(order_id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_stale_created(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status = 'created' AND created_at < $1 \
             ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_order).collect()
    }
}

/// PostgreSQL-backed cart repository.
#[derive(Clone)]
pub struct PostgresCartRepository {
    pool: PgPool,
}

impl PostgresCartRepository {
    /// Creates a new repository over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartRepository for PostgresCartRepository {
    async fn active_cart(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, quantity, unit_price_cents, meta, created_at
            FROM cart_lines
            WHERE user_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_cart_line).collect()
    }

    async fn add_line(&self, user_id: UserId, line: CartLine) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cart_lines (id, user_id, product_id, quantity, unit_price_cents, meta, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(line.id)
        .bind(user_id.as_uuid())
        .bind(line.product_id.as_ref().map(|p| p.as_str()))
        .bind(to_column(line.quantity, "quantity")?)
        .bind(line.unit_price.cents())
        .bind(line.meta)
        .bind(line.added_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, line_ids), fields(line_count = line_ids.len()))]
    async fn remove_lines(&self, user_id: UserId, line_ids: &[Uuid]) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_lines WHERE user_id = $1 AND id = ANY($2)")
            .bind(user_id.as_uuid())
            .bind(line_ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
