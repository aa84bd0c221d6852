// src/status.rs
//
// Order status policy: PENDING -> {PAID, FAILED, CANCELED}, PAID is absorbing.

use chrono::Utc;

use crate::db::RecordStore;
use crate::error::StoreError;
use crate::models::{Order, OrderStatus};

/// Payment status in Khipu's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KhipuStatus {
    Done,
    Pending,
    Verifying,
    Rejected,
    Canceled,
    Other(String),
}

impl KhipuStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "done" => KhipuStatus::Done,
            "pending" => KhipuStatus::Pending,
            "verifying" => KhipuStatus::Verifying,
            "rejected" => KhipuStatus::Rejected,
            "canceled" | "cancelled" => KhipuStatus::Canceled,
            _ => KhipuStatus::Other(raw.to_string()),
        }
    }

    /// Status written on the payment row after a notification.
    pub fn payment_status(&self) -> String {
        match self {
            KhipuStatus::Done => "CONFIRMED".to_string(),
            KhipuStatus::Pending => "PENDING".to_string(),
            KhipuStatus::Verifying => "VERIFYING".to_string(),
            KhipuStatus::Rejected => "REJECTED".to_string(),
            KhipuStatus::Canceled => "CANCELED".to_string(),
            KhipuStatus::Other(raw) => raw.to_uppercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    WebpayApproved,
    WebpayDeclined,
    Khipu(KhipuStatus),
}

/// Status an order should move to after `outcome`.
///
/// Pending/verifying (and unrecognised) Khipu states leave the order where it is.
pub fn next_status(current: OrderStatus, outcome: &ProviderOutcome) -> OrderStatus {
    match outcome {
        ProviderOutcome::WebpayApproved => OrderStatus::Paid,
        ProviderOutcome::WebpayDeclined => OrderStatus::Failed,
        ProviderOutcome::Khipu(KhipuStatus::Done) => OrderStatus::Paid,
        ProviderOutcome::Khipu(KhipuStatus::Rejected) => OrderStatus::Failed,
        ProviderOutcome::Khipu(KhipuStatus::Canceled) => OrderStatus::Canceled,
        ProviderOutcome::Khipu(_) => current,
    }
}

pub fn should_apply(current: OrderStatus, new_status: OrderStatus) -> bool {
    current != OrderStatus::Paid && current != new_status
}

/// Writes `new_status` onto the order unless the guard says otherwise.
///
/// The in-memory check only saves a round trip; the store repeats it inside
/// the conditional write, which is what protects a PAID order from a
/// concurrent stale signal. Returns whether a write took effect.
pub async fn apply(
    store: &dyn RecordStore,
    order: &Order,
    new_status: OrderStatus,
    provider: &str,
) -> Result<bool, StoreError> {
    if !should_apply(order.status, new_status) {
        log::debug!(
            "order {} stays {} (signal {} from {})",
            order.id,
            order.status,
            new_status,
            provider
        );
        return Ok(false);
    }

    let written = store
        .update_order_status(&order.id, new_status, Some(provider), Utc::now())
        .await?;

    if written {
        log::info!(
            "order {} {} -> {} provider={}",
            order.id,
            order.status,
            new_status,
            provider
        );
    } else {
        log::info!(
            "order {} transition to {} skipped, stored status changed concurrently",
            order.id,
            new_status
        );
    }
    Ok(written)
}
