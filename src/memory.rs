// src/memory.rs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::db::RecordStore;
use crate::error::StoreError;
use crate::models::{Order, OrderStatus, Payment, PaymentUpdate};

/// A thread-safe in-process record store.
///
/// Conditional writes are checked while holding the write lock, so the same
/// guarantees as the PostgreSQL store hold under concurrent requests.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    orders: Arc<RwLock<HashMap<String, Order>>>,
    payments: Arc<RwLock<HashMap<String, Payment>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn payment_count(&self) -> usize {
        self.payments.read().await.len()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(StoreError::AlreadyExists);
        }
        orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, id: &str) -> Result<Order, StoreError> {
        let orders = self.orders.read().await;
        orders.get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
        provider: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(id).ok_or(StoreError::NotFound)?;
        if order.status == OrderStatus::Paid || order.status == status {
            return Ok(false);
        }
        order.status = status;
        if let Some(provider) = provider {
            order.provider = Some(provider.to_string());
        }
        order.updated_at = updated_at;
        Ok(true)
    }

    async fn orders_by_user(&self, user_id: &str) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.read().await;
        let mut found: Vec<Order> = orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.id) {
            return Err(StoreError::AlreadyExists);
        }
        payments.insert(payment.id.clone(), payment.clone());
        Ok(())
    }

    async fn get_payment(&self, id: &str) -> Result<Payment, StoreError> {
        let payments = self.payments.read().await;
        payments.get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn update_payment(&self, id: &str, update: &PaymentUpdate) -> Result<Payment, StoreError> {
        let mut payments = self.payments.write().await;
        let payment = payments.get_mut(id).ok_or(StoreError::NotFound)?;
        payment.status = update.status.clone();
        payment.raw = update.raw.clone();
        payment.updated_at = update.updated_at;
        Ok(payment.clone())
    }

    async fn payments_by_order(
        &self,
        order_id: &str,
        descending: bool,
    ) -> Result<Vec<Payment>, StoreError> {
        let payments = self.payments.read().await;
        let mut found: Vec<Payment> = payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if descending {
            found.reverse();
        }
        Ok(found)
    }
}
