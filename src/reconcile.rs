// src/reconcile.rs
//
// Provider flows: Webpay (init -> browser redirect -> commit) and
// Khipu (init -> webhook notify -> signed re-fetch, plus a status read).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use serde_json::{Value, json};
use utoipa::ToSchema;

use crate::api::khipu_client::{CreatePaymentRequest, KhipuGateway, VerifiedPayment};
use crate::api::webpay_client::{BUY_ORDER_MAX, WebpayCommit, WebpayGateway, truncate_chars};
use crate::config::Settings;
use crate::db::SharedStore;
use crate::error::{EngineError, StoreError};
use crate::models::{Order, OrderStatus, Payment, PaymentUpdate};
use crate::status::{self, ProviderOutcome};

pub const PAYMENT_INITIATED: &str = "INITIATED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Webpay,
    Khipu,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Webpay, Provider::Khipu];

    pub fn slug(&self) -> &'static str {
        match self {
            Provider::Webpay => "webpay",
            Provider::Khipu => "khipu",
        }
    }
}

/// Slug -> provider lookup, built once at start-up.
#[derive(Debug, Clone)]
pub struct ProviderTable {
    by_slug: HashMap<&'static str, Provider>,
}

impl ProviderTable {
    pub fn new() -> Self {
        Self {
            by_slug: Provider::ALL.iter().map(|p| (p.slug(), *p)).collect(),
        }
    }

    pub fn lookup(&self, slug: &str) -> Option<Provider> {
        self.by_slug.get(slug).copied()
    }
}

impl Default for ProviderTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackMethod {
    Get,
    Post,
}

/// A provider callback after HTTP decoding: query string plus a JSON body
/// (form bodies are converted to a flat JSON object beforehand).
#[derive(Debug, Clone)]
pub struct CallbackInput {
    pub method: CallbackMethod,
    pub query: HashMap<String, String>,
    pub body: Value,
}

impl CallbackInput {
    fn body_str(&self, key: &str) -> Option<String> {
        self.body
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn query_str(&self, key: &str) -> Option<String> {
        self.query
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Body first, then query string.
    fn param(&self, key: &str) -> Option<String> {
        self.body_str(key).or_else(|| self.query_str(key))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackReply {
    Redirect { location: String },
    Ack(Value),
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayments {
    pub ok: bool,
    pub order: Order,
    pub payments: Vec<Payment>,
}

/// Same character set as JavaScript's `encodeURIComponent`.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, QUERY_COMPONENT).to_string()
}

fn url_with_order(base: &str, path: &str, order_id: &str) -> String {
    format!("{base}{path}?orderId={}", encode_component(order_id))
}

/// Whether a Webpay commit settles `order`: Webpay echoes the buy order we
/// sent (cut to its length limit) and the amount it charged.
pub fn commit_matches_order(commit: &WebpayCommit, order: &Order) -> bool {
    commit.buy_order.as_deref() == Some(truncate_chars(&order.id, BUY_ORDER_MAX))
        && commit.amount == Some(order.amount)
}

/// The amount Khipu reports when it differs from what the order charges.
pub fn khipu_amount_mismatch(order: &Order, verified: &VerifiedPayment) -> Option<i64> {
    verified.amount.filter(|paid| *paid != order.amount)
}

pub struct Engine {
    store: SharedStore,
    webpay: Arc<dyn WebpayGateway>,
    khipu: Arc<dyn KhipuGateway>,
    api_base_url: String,
    app_base_url: String,
    fallback_payer_email: String,
}

impl Engine {
    pub fn new(
        store: SharedStore,
        webpay: Arc<dyn WebpayGateway>,
        khipu: Arc<dyn KhipuGateway>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            webpay,
            khipu,
            api_base_url: settings.api_base_url.clone(),
            app_base_url: settings.app_base_url.clone(),
            fallback_payer_email: settings.fallback_payer_email.clone(),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Starts a payment through `provider` and returns the URL the buyer
    /// must be redirected to.
    pub async fn init(
        &self,
        provider: Provider,
        order_id: &str,
        session_ref: Option<&str>,
    ) -> Result<String, EngineError> {
        match provider {
            Provider::Webpay => self.init_webpay(order_id, session_ref.unwrap_or("guest")).await,
            Provider::Khipu => self.init_khipu(order_id).await,
        }
    }

    /// Handles the provider's way of reporting back: Webpay's browser return
    /// and Khipu's webhook.
    pub async fn callback(
        &self,
        provider: Provider,
        input: &CallbackInput,
    ) -> Result<CallbackReply, EngineError> {
        match provider {
            Provider::Webpay => Ok(self.commit_webpay(input).await),
            Provider::Khipu => self.notify_khipu(input).await.map(CallbackReply::Ack),
        }
    }

    async fn load_order(&self, order_id: &str) -> Result<Order, EngineError> {
        match self.store.get_order(order_id).await {
            Ok(order) => Ok(order),
            Err(StoreError::NotFound) => Err(EngineError::OrderNotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_pending_order(&self, order_id: &str) -> Result<Order, EngineError> {
        if order_id.trim().is_empty() {
            return Err(EngineError::validation("orderId"));
        }
        let order = self.load_order(order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(EngineError::InvalidStatus {
                current: order.status,
            });
        }
        Ok(order)
    }

    // ---- Webpay ----

    pub async fn init_webpay(&self, order_id: &str, session_ref: &str) -> Result<String, EngineError> {
        let order = self.load_pending_order(order_id).await?;
        let return_url = url_with_order(&self.api_base_url, "/api/pay-webpay/commit", &order.id);

        let init = self
            .webpay
            .initiate(&order.id, session_ref, order.amount, &return_url)
            .await?;

        log::info!("webpay init order_id={} amount={}", order.id, order.amount);
        Ok(init.redirect_url())
    }

    fn webpay_destination(&self, approved: bool, order_id: &str) -> String {
        let path = if approved { "/pago/exito" } else { "/pago/error" };
        url_with_order(&self.app_base_url, path, order_id)
    }

    /// Browser return from Webpay. Always answers with a redirect to the
    /// storefront; errors only decide which page.
    pub async fn commit_webpay(&self, input: &CallbackInput) -> CallbackReply {
        let token = match input.method {
            CallbackMethod::Post => input.param("token_ws"),
            CallbackMethod::Get => input.query_str("token_ws").or_else(|| input.body_str("token_ws")),
        };
        let order_id = input.query_str("orderId").unwrap_or_default();

        let approved = match token {
            Some(token) if !order_id.is_empty() => {
                match self.settle_webpay(&token, &order_id).await {
                    Ok(approved) => approved,
                    Err(e) => {
                        log::error!("webpay commit error order_id={order_id}: {e}");
                        false
                    }
                }
            }
            _ => {
                // Buyer aborted on the Webpay form (TBK_TOKEN) or a malformed return.
                log::warn!(
                    "webpay commit without token_ws/orderId order_id={order_id:?} aborted_token={:?}",
                    input.param("TBK_TOKEN")
                );
                false
            }
        };

        CallbackReply::Redirect {
            location: self.webpay_destination(approved, &order_id),
        }
    }

    /// `orderId` comes back through the browser, so the commit is only
    /// applied when it describes that order. Nothing is written otherwise.
    async fn settle_webpay(&self, token: &str, order_id: &str) -> Result<bool, EngineError> {
        let order = self.load_order(order_id).await?;
        let commit = self.webpay.commit(token).await?;

        if !commit_matches_order(&commit, &order) {
            log::error!(
                "webpay commit does not match order order_id={} amount={} commit_buy_order={:?} commit_amount={:?}",
                order.id,
                order.amount,
                commit.buy_order,
                commit.amount
            );
            return Ok(false);
        }

        let outcome = if commit.approved {
            ProviderOutcome::WebpayApproved
        } else {
            ProviderOutcome::WebpayDeclined
        };
        let new_status = status::next_status(order.status, &outcome);
        let applied =
            status::apply(self.store.as_ref(), &order, new_status, Provider::Webpay.slug()).await;

        if let Err(e) = self.upsert_webpay_payment(&order, token, &commit).await {
            log::error!("webpay payment write failed order_id={}: {e}", order.id);
        }

        applied?;
        Ok(commit.approved)
    }

    /// Same transaction reference -> same payment id, so a repeated commit
    /// callback rewrites the row instead of adding one.
    pub fn webpay_payment_id(order_id: &str, token: &str, commit: &WebpayCommit) -> String {
        let reference = commit
            .buy_order
            .as_deref()
            .or(commit.authorization_code.as_deref())
            .unwrap_or(token);
        format!("{order_id}#{reference}")
    }

    async fn upsert_webpay_payment(
        &self,
        order: &Order,
        token: &str,
        commit: &WebpayCommit,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let status = if commit.approved {
            OrderStatus::Paid.as_str()
        } else {
            OrderStatus::Failed.as_str()
        };
        let payment = Payment {
            id: Self::webpay_payment_id(&order.id, token, commit),
            order_id: order.id.clone(),
            provider: Provider::Webpay.slug().to_string(),
            provider_payment_id: commit
                .authorization_code
                .clone()
                .or_else(|| commit.buy_order.clone()),
            status: status.to_string(),
            amount: commit.amount,
            authorization_code: commit.authorization_code.clone(),
            response_code: commit.response_code,
            card_last4: commit.card_last4.clone(),
            currency: order.currency.clone(),
            raw: commit.raw.clone(),
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_payment(&payment).await {
            Ok(()) => Ok(()),
            Err(StoreError::AlreadyExists) => {
                log::info!("webpay payment {} already recorded, updating", payment.id);
                self.store
                    .update_payment(
                        &payment.id,
                        &PaymentUpdate {
                            status: payment.status,
                            raw: payment.raw,
                            updated_at: now,
                        },
                    )
                    .await
                    .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    // ---- Khipu ----

    fn payer_email(&self, order: &Order) -> String {
        [order.email.as_deref(), order.user_email.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|e| !e.is_empty())
            .unwrap_or(&self.fallback_payer_email)
            .to_string()
    }

    pub async fn init_khipu(&self, order_id: &str) -> Result<String, EngineError> {
        let order = self.load_pending_order(order_id).await?;

        let req = CreatePaymentRequest {
            subject: format!("Orden {}", order.id),
            currency: order.currency.clone(),
            amount: order.amount,
            transaction_id: order.id.clone(),
            payer_email: self.payer_email(&order),
            return_url: url_with_order(&self.app_base_url, "/checkout/success", &order.id),
            cancel_url: url_with_order(&self.app_base_url, "/checkout/cancel", &order.id),
            notify_url: format!("{}/api/pay-khipu/notify", self.api_base_url),
        };
        let created = self.khipu.create(&req).await?;

        // Khipu may notify before the buyer comes back, so the row must exist now.
        let now = Utc::now();
        let payment = Payment {
            id: created.payment_id.clone(),
            order_id: order.id.clone(),
            provider: Provider::Khipu.slug().to_string(),
            provider_payment_id: Some(created.payment_id.clone()),
            status: PAYMENT_INITIATED.to_string(),
            amount: Some(order.amount),
            authorization_code: None,
            response_code: None,
            card_last4: None,
            currency: order.currency.clone(),
            raw: created.raw.clone(),
            created_at: now,
            updated_at: now,
        };
        match self.store.insert_payment(&payment).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists) => {
                log::warn!("khipu payment {} already recorded", payment.id);
            }
            Err(e) => return Err(e.into()),
        }

        log::info!(
            "khipu init order_id={} payment_id={}",
            order.id,
            created.payment_id
        );
        Ok(created.payment_url)
    }

    /// Webhook receiver. Only a missing token is reported back; anything
    /// that fails after that is logged and acknowledged so Khipu stops retrying.
    pub async fn notify_khipu(&self, input: &CallbackInput) -> Result<Value, EngineError> {
        let token = input
            .param("notification_token")
            .or_else(|| input.body_str("notificationToken"))
            .ok_or(EngineError::MissingToken)?;

        if let Err(e) = self.reconcile_khipu(&token).await {
            // Acknowledged anyway: a retry would hit the same failure, and a
            // missed payment write is backfilled by the next duplicate notification.
            log::error!("khipu notify failed, acknowledging anyway: {e}");
        }
        Ok(json!({"ok": true}))
    }

    async fn reconcile_khipu(&self, token: &str) -> Result<(), EngineError> {
        let verified = self.khipu.fetch_by_notification_token(token).await?;

        let order = match self.store.get_order(&verified.transaction_id).await {
            Ok(order) => order,
            Err(StoreError::NotFound) => {
                log::warn!(
                    "khipu payment {} references unknown order {}",
                    verified.payment_id,
                    verified.transaction_id
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(paid) = khipu_amount_mismatch(&order, &verified) {
            log::warn!(
                "khipu amount mismatch payment_id={} order_id={} expected={} reported={paid}",
                verified.payment_id,
                order.id,
                order.amount
            );
        }

        let outcome = ProviderOutcome::Khipu(verified.status.clone());
        let new_status = status::next_status(order.status, &outcome);
        let applied = status::apply(self.store.as_ref(), &order, new_status, Provider::Khipu.slug()).await;

        if let Err(e) = self.record_khipu_payment(&order, &verified).await {
            log::error!(
                "khipu payment write failed payment_id={} order_id={}: {e}",
                verified.payment_id,
                order.id
            );
        }

        applied?;
        Ok(())
    }

    /// Payment rows are matched by Khipu's payment id; a missing row is
    /// created so the history catches up.
    async fn record_khipu_payment(
        &self,
        order: &Order,
        verified: &VerifiedPayment,
    ) -> Result<Payment, StoreError> {
        let now = Utc::now();
        let update = PaymentUpdate {
            status: verified.status.payment_status(),
            raw: verified.raw.clone(),
            updated_at: now,
        };

        match self.store.update_payment(&verified.payment_id, &update).await {
            Err(StoreError::NotFound) => {}
            other => return other,
        }

        log::warn!(
            "khipu payment {} missing, backfilling for order {}",
            verified.payment_id,
            order.id
        );
        let payment = Payment {
            id: verified.payment_id.clone(),
            order_id: order.id.clone(),
            provider: Provider::Khipu.slug().to_string(),
            provider_payment_id: Some(verified.payment_id.clone()),
            status: update.status.clone(),
            amount: verified.amount.or(Some(order.amount)),
            authorization_code: None,
            response_code: None,
            card_last4: None,
            currency: order.currency.clone(),
            raw: update.raw.clone(),
            created_at: now,
            updated_at: now,
        };
        match self.store.insert_payment(&payment).await {
            Ok(()) => Ok(payment),
            // Lost a race with a concurrent notification for the same payment.
            Err(StoreError::AlreadyExists) => self.store.update_payment(&payment.id, &update).await,
            Err(e) => Err(e),
        }
    }

    /// Every payment recorded for `order_id`, oldest first. An unknown order
    /// simply has none.
    pub async fn payments_by_order(&self, order_id: &str) -> Result<Vec<Payment>, EngineError> {
        if order_id.trim().is_empty() {
            return Err(EngineError::validation("orderId"));
        }
        Ok(self.store.payments_by_order(order_id, false).await?)
    }

    pub async fn status_khipu(&self, order_id: &str) -> Result<OrderPayments, EngineError> {
        let order = self.load_order(order_id).await?;
        let payments = self.store.payments_by_order(order_id, false).await?;
        Ok(OrderPayments {
            ok: true,
            order,
            payments,
        })
    }
}
