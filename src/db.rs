// src/db.rs

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::error::StoreError;
use crate::models::{Order, OrderItem, OrderStatus, Payment, PaymentUpdate};

pub type SharedStore = Arc<dyn RecordStore>;

/// Record storage consumed by the reconciliation engine.
///
/// Inserts are conditional puts and fail with `AlreadyExists` on key
/// collision. `update_order_status` is the only conditional update: it never
/// rewrites a PAID order and never rewrites a status with itself.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    async fn get_order(&self, id: &str) -> Result<Order, StoreError>;

    /// Moves the order to `status`, stamping `provider` (when given) and
    /// `updated_at`. Returns `Ok(false)` without writing when the stored
    /// status is PAID or already equals `status`.
    async fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
        provider: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// `UserIndex` lookup, newest order first.
    async fn orders_by_user(&self, user_id: &str) -> Result<Vec<Order>, StoreError>;

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError>;

    async fn get_payment(&self, id: &str) -> Result<Payment, StoreError>;

    async fn update_payment(&self, id: &str, update: &PaymentUpdate) -> Result<Payment, StoreError>;

    /// `OrderIndex` lookup ordered by `created_at`.
    async fn payments_by_order(
        &self,
        order_id: &str,
        descending: bool,
    ) -> Result<Vec<Payment>, StoreError>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::migrate!()
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self::new(pool))
    }
}

const ORDER_COLUMNS: &str = "id, user_id, email, user_email, items, amount, currency, status, \
                             provider, created_at, updated_at";
const PAYMENT_COLUMNS: &str = "id, order_id, provider, provider_payment_id, status, amount, \
                               authorization_code, response_code, card_last4, currency, raw, \
                               created_at, updated_at";

fn order_from_row(r: &PgRow) -> Result<Order, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Decode(e.to_string());
    let status: String = r.try_get("status").map_err(decode)?;
    let items: Json<Vec<OrderItem>> = r.try_get("items").map_err(decode)?;

    Ok(Order {
        id: r.try_get("id").map_err(decode)?,
        user_id: r.try_get("user_id").map_err(decode)?,
        email: r.try_get("email").map_err(decode)?,
        user_email: r.try_get("user_email").map_err(decode)?,
        items: items.0,
        amount: r.try_get("amount").map_err(decode)?,
        currency: r.try_get("currency").map_err(decode)?,
        status: status.parse().map_err(StoreError::Decode)?,
        provider: r.try_get("provider").map_err(decode)?,
        created_at: r.try_get("created_at").map_err(decode)?,
        updated_at: r.try_get("updated_at").map_err(decode)?,
    })
}

fn payment_from_row(r: &PgRow) -> Result<Payment, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Decode(e.to_string());

    Ok(Payment {
        id: r.try_get("id").map_err(decode)?,
        order_id: r.try_get("order_id").map_err(decode)?,
        provider: r.try_get("provider").map_err(decode)?,
        provider_payment_id: r.try_get("provider_payment_id").map_err(decode)?,
        status: r.try_get("status").map_err(decode)?,
        amount: r.try_get("amount").map_err(decode)?,
        authorization_code: r.try_get("authorization_code").map_err(decode)?,
        response_code: r.try_get("response_code").map_err(decode)?,
        card_last4: r.try_get("card_last4").map_err(decode)?,
        currency: r.try_get("currency").map_err(decode)?,
        raw: r.try_get("raw").map_err(decode)?,
        created_at: r.try_get("created_at").map_err(decode)?,
        updated_at: r.try_get("updated_at").map_err(decode)?,
    })
}

#[async_trait]
impl RecordStore for PgStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO orders
                   (id, user_id, email, user_email, items, amount, currency, status, provider, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
               ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(&order.id)
        .bind(&order.user_id)
        .bind(&order.email)
        .bind(&order.user_email)
        .bind(Json(&order.items))
        .bind(order.amount)
        .bind(&order.currency)
        .bind(order.status.as_str())
        .bind(&order.provider)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists);
        }
        Ok(())
    }

    async fn get_order(&self, id: &str) -> Result<Order, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => order_from_row(&r),
            None => Err(StoreError::NotFound),
        }
    }

    async fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
        provider: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE orders
               SET status = $2, provider = COALESCE($3, provider), updated_at = $4
               WHERE id = $1 AND status <> 'PAID' AND status <> $2"#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(provider)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Condition failed or the row is missing; only the latter is an error.
        let exists = sqlx::query("SELECT 1 FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound),
        }
    }

    async fn orders_by_user(&self, user_id: &str) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO payments
                   (id, order_id, provider, provider_payment_id, status, amount,
                    authorization_code, response_code, card_last4, currency, raw, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
               ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(&payment.id)
        .bind(&payment.order_id)
        .bind(&payment.provider)
        .bind(&payment.provider_payment_id)
        .bind(&payment.status)
        .bind(payment.amount)
        .bind(&payment.authorization_code)
        .bind(payment.response_code)
        .bind(&payment.card_last4)
        .bind(&payment.currency)
        .bind(&payment.raw)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists);
        }
        Ok(())
    }

    async fn get_payment(&self, id: &str) -> Result<Payment, StoreError> {
        let row = sqlx::query(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => payment_from_row(&r),
            None => Err(StoreError::NotFound),
        }
    }

    async fn update_payment(&self, id: &str, update: &PaymentUpdate) -> Result<Payment, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE payments SET status = $2, raw = $3, updated_at = $4 \
             WHERE id = $1 RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(&update.status)
        .bind(&update.raw)
        .bind(update.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => payment_from_row(&r),
            None => Err(StoreError::NotFound),
        }
    }

    async fn payments_by_order(
        &self,
        order_id: &str,
        descending: bool,
    ) -> Result<Vec<Payment>, StoreError> {
        let direction = if descending { "DESC" } else { "ASC" };
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 ORDER BY created_at {direction}"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payment_from_row).collect()
    }
}
