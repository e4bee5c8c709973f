use crate::database::error::DatabaseError;
use crate::database::repository::OrderRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{types::BigDecimal, FromRow, PgConnection, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Paid,
    Refunded,
    PaymentFailed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Paid => "paid",
            OrderStatus::Refunded => "refunded",
            OrderStatus::PaymentFailed => "payment_failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_db_status(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "paid" => Ok(OrderStatus::Paid),
            "refunded" => Ok(OrderStatus::Refunded),
            "payment_failed" => Ok(OrderStatus::PaymentFailed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(unknown_value("order status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn from_db_status(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(unknown_value("payment status", other)),
        }
    }
}

pub(crate) fn unknown_value(what: &str, value: &str) -> DatabaseError {
    DatabaseError::new(crate::database::error::DatabaseErrorKind::Unknown {
        message: format!("unknown {} '{}'", what, value),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ShippingAddress {
    pub full_name: String,
    pub address: String,
    pub city: String,
    pub country: String,
    pub postal_code: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub quantity: i32,
    pub price: BigDecimal,
}

/// Customer order as seen by the payment core.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub email: String,
    pub shipping_address: Option<ShippingAddress>,
    pub items: Vec<OrderItem>,
    pub subtotal: BigDecimal,
    pub shipping_cost: BigDecimal,
    pub total: BigDecimal,
    pub payment_method: Option<String>,
    pub shipping_method: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// A fresh `pending` order, used for seeding and tests.
    pub fn new_pending(
        email: impl Into<String>,
        shipping_address: Option<ShippingAddress>,
        total: BigDecimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            shipping_address,
            items: Vec::new(),
            subtotal: total.clone(),
            shipping_cost: BigDecimal::from(0),
            total,
            payment_method: Some("card".to_string()),
            shipping_method: None,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid,
    email: String,
    subtotal: BigDecimal,
    shipping_cost: BigDecimal,
    total: BigDecimal,
    payment_method: Option<String>,
    shipping_method: Option<String>,
    status: String,
    payment_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const ORDER_COLUMNS: &str = "id, email, subtotal, shipping_cost, total, payment_method, \
                             shipping_method, status, payment_status, created_at, updated_at";

/// Load an order with its shipping address and items on an open connection
/// (pool connection or transaction).
pub(crate) async fn load_order(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<Order>, DatabaseError> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {} FROM orders WHERE id = $1",
        ORDER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    let Some(row) = row else {
        return Ok(None);
    };

    let shipping_address = sqlx::query_as::<_, ShippingAddress>(
        "SELECT full_name, address, city, country, postal_code, phone
         FROM shipping_addresses
         WHERE order_id = $1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    let items = sqlx::query_as::<_, OrderItem>(
        "SELECT id, product_id, product_name, quantity, price
         FROM order_items
         WHERE order_id = $1
         ORDER BY product_name",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    Ok(Some(Order {
        id: row.id,
        email: row.email,
        shipping_address,
        items,
        subtotal: row.subtotal,
        shipping_cost: row.shipping_cost,
        total: row.total,
        payment_method: row.payment_method,
        shipping_method: row.shipping_method,
        status: OrderStatus::from_db_status(&row.status)?,
        payment_status: PaymentStatus::from_db_status(&row.payment_status)?,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}

/// Set the payment-driven status pair of an order.
pub(crate) async fn update_order_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: OrderStatus,
    payment_status: Option<PaymentStatus>,
) -> Result<(), DatabaseError> {
    let result = sqlx::query(
        "UPDATE orders
         SET status = $2,
             payment_status = COALESCE($3, payment_status),
             updated_at = NOW()
         WHERE id = $1",
    )
    .bind(id)
    .bind(status.as_str())
    .bind(payment_status.map(|s| s.as_str()))
    .execute(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("Order", id));
    }
    Ok(())
}

/// Postgres-backed order lookups for the payment core
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, DatabaseError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(DatabaseError::from_sqlx)?;
        load_order(&mut *conn, id).await
    }

    async fn save(&self, order: &Order) -> Result<Order, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let result = sqlx::query(
            "UPDATE orders
             SET email = $2, subtotal = $3, shipping_cost = $4, total = $5,
                 payment_method = $6, shipping_method = $7, status = $8,
                 payment_status = $9, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(order.id)
        .bind(&order.email)
        .bind(&order.subtotal)
        .bind(&order.shipping_cost)
        .bind(&order.total)
        .bind(&order.payment_method)
        .bind(&order.shipping_method)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Err(DatabaseError::not_found("Order", order.id));
        }

        let saved = load_order(&mut *tx, order.id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Order", order.id))?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(saved)
    }
}
