// src/checkout.rs
//
// Order creation. Prices come from the server-side catalog only; whatever
// the client sends as a price is overwritten.

use chrono::Utc;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::RecordStore;
use crate::error::{EngineError, StoreError};
use crate::models::{Order, OrderItem, OrderStatus};

pub const CURRENCY: &str = "CLP";

/// Largest quantity accepted for a single cart line.
pub const MAX_QTY: i64 = 999;

const PRICE_CATALOG: &[(&str, i64)] = &[
    ("nfc-card", 4990),
    ("plan-basic", 4990),
    ("plan-premium", 4990),
    ("card-pack-10", 4990),
];

pub fn catalog_price(sku: &str) -> Option<i64> {
    PRICE_CATALOG
        .iter()
        .find(|(name, _)| *name == sku)
        .map(|(_, price)| *price)
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckoutItem {
    pub sku: Option<String>,
    /// Accepted as an alias of `sku`.
    pub id: Option<String>,
    pub name: Option<String>,
    pub qty: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub items: Vec<CheckoutItem>,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub user_email: Option<String>,
}

pub fn price_items(items: &[CheckoutItem]) -> Result<Vec<OrderItem>, EngineError> {
    if items.is_empty() {
        return Err(EngineError::validation("items"));
    }

    items
        .iter()
        .map(|item| {
            let sku = item
                .sku
                .as_deref()
                .or(item.id.as_deref())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| EngineError::validation("items.sku"))?;
            let price = catalog_price(sku)
                .ok_or_else(|| EngineError::validation(format!("items.sku ({sku} not in catalog)")))?;
            let qty = line_qty(item.qty)?;

            Ok(OrderItem {
                sku: sku.to_string(),
                name: item.name.clone(),
                price_clp: price,
                qty,
            })
        })
        .collect()
}

/// Missing, non-numeric and zero quantities count as 1. Negative or
/// oversized quantities are rejected.
fn line_qty(qty: Option<f64>) -> Result<i64, EngineError> {
    let rounded = match qty.map(f64::round) {
        Some(q) if q.is_finite() && q != 0.0 => q,
        _ => return Ok(1),
    };
    if rounded < 1.0 || rounded > MAX_QTY as f64 {
        return Err(EngineError::validation("items.qty"));
    }
    Ok(rounded as i64)
}

pub fn order_total(items: &[OrderItem]) -> Result<i64, EngineError> {
    let amount = items.iter().try_fold(0i64, |acc, item| {
        item.price_clp
            .checked_mul(item.qty)
            .and_then(|line| acc.checked_add(line))
    });
    match amount {
        Some(amount) if amount > 0 => Ok(amount),
        _ => Err(EngineError::validation("amount")),
    }
}

pub async fn create_order(store: &dyn RecordStore, req: &CheckoutRequest) -> Result<Order, EngineError> {
    let items = price_items(&req.items)?;
    let amount = order_total(&items)?;

    let now = Utc::now();
    let order = Order {
        id: Uuid::new_v4().to_string(),
        user_id: req
            .user_id
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| "guest".to_string()),
        email: req.email.clone(),
        user_email: req.user_email.clone(),
        items,
        amount,
        currency: CURRENCY.to_string(),
        status: OrderStatus::Pending,
        provider: None,
        created_at: now,
        updated_at: now,
    };

    match store.insert_order(&order).await {
        Ok(()) => {}
        Err(StoreError::AlreadyExists) => {
            log::error!("order id collision id={}", order.id);
            return Err(StoreError::AlreadyExists.into());
        }
        Err(e) => return Err(e.into()),
    }

    log::info!("order created id={} amount={} user_id={}", order.id, amount, order.user_id);
    Ok(order)
}
