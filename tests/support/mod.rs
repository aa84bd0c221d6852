#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use pay_reconcile::AppState;
use pay_reconcile::api::khipu_client::{
    CreatePaymentRequest, CreatedPayment, KhipuGateway, VerifiedPayment,
};
use pay_reconcile::api::webpay_client::{WebpayCommit, WebpayGateway, WebpayInit};
use pay_reconcile::config::Settings;
use pay_reconcile::db::{RecordStore, SharedStore};
use pay_reconcile::error::{EngineError, StoreError};
use pay_reconcile::memory::InMemoryStore;
use pay_reconcile::models::{Order, OrderStatus, Payment, PaymentUpdate};
use pay_reconcile::reconcile::Engine;
use pay_reconcile::status::KhipuStatus;

pub fn order(id: &str, status: OrderStatus, amount: i64) -> Order {
    let now = Utc::now();
    Order {
        id: id.to_string(),
        user_id: "u-1".to_string(),
        email: None,
        user_email: None,
        items: vec![],
        amount,
        currency: "CLP".to_string(),
        status,
        provider: None,
        created_at: now,
        updated_at: now,
    }
}

#[derive(Default)]
pub struct FakeWebpay {
    pub commits: Mutex<HashMap<String, Result<WebpayCommit, String>>>,
    pub initiate_calls: AtomicUsize,
    pub commit_calls: AtomicUsize,
}

impl FakeWebpay {
    pub fn approve(&self, token: &str, buy_order: &str, amount: i64) {
        self.commits.lock().unwrap().insert(
            token.to_string(),
            Ok(WebpayCommit {
                approved: true,
                status: Some("AUTHORIZED".to_string()),
                response_code: Some(0),
                authorization_code: Some("1213".to_string()),
                amount: Some(amount),
                card_last4: Some("6623".to_string()),
                buy_order: Some(buy_order.to_string()),
                raw: json!({"status": "AUTHORIZED", "response_code": 0, "buy_order": buy_order}),
            }),
        );
    }

    pub fn decline(&self, token: &str, buy_order: &str, amount: i64) {
        self.commits.lock().unwrap().insert(
            token.to_string(),
            Ok(WebpayCommit {
                approved: false,
                status: Some("FAILED".to_string()),
                response_code: Some(-1),
                authorization_code: None,
                amount: Some(amount),
                card_last4: None,
                buy_order: Some(buy_order.to_string()),
                raw: json!({"status": "FAILED", "response_code": -1}),
            }),
        );
    }

    pub fn fail(&self, token: &str) {
        self.commits
            .lock()
            .unwrap()
            .insert(token.to_string(), Err("connection reset".to_string()));
    }
}

#[async_trait]
impl WebpayGateway for FakeWebpay {
    async fn initiate(
        &self,
        buy_order: &str,
        _session_id: &str,
        _amount: i64,
        _return_url: &str,
    ) -> Result<WebpayInit, EngineError> {
        self.initiate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(WebpayInit {
            token: format!("tok-{buy_order}"),
            url: "https://webpay.example/init".to_string(),
        })
    }

    async fn commit(&self, token: &str) -> Result<WebpayCommit, EngineError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        match self.commits.lock().unwrap().get(token) {
            Some(Ok(commit)) => Ok(commit.clone()),
            Some(Err(msg)) => Err(EngineError::ProviderUnavailable(msg.clone())),
            None => Err(EngineError::ProviderRejected(format!("unknown token {token}"))),
        }
    }
}

#[derive(Default)]
pub struct FakeKhipu {
    pub by_token: Mutex<HashMap<String, VerifiedPayment>>,
    pub created: Mutex<Vec<CreatePaymentRequest>>,
    pub fetch_calls: AtomicUsize,
}

impl FakeKhipu {
    pub fn resolve(&self, token: &str, payment_id: &str, order_id: &str, status: &str) {
        self.resolve_paid(token, payment_id, order_id, status, 4990);
    }

    pub fn resolve_paid(
        &self,
        token: &str,
        payment_id: &str,
        order_id: &str,
        status: &str,
        amount: i64,
    ) {
        self.by_token.lock().unwrap().insert(
            token.to_string(),
            VerifiedPayment {
                payment_id: payment_id.to_string(),
                transaction_id: order_id.to_string(),
                status: KhipuStatus::parse(status),
                amount: Some(amount),
                raw: json!({
                    "payment_id": payment_id,
                    "transaction_id": order_id,
                    "status": status,
                    "amount": amount
                }),
            },
        );
    }

    pub fn create_calls(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl KhipuGateway for FakeKhipu {
    async fn create(&self, req: &CreatePaymentRequest) -> Result<CreatedPayment, EngineError> {
        self.created.lock().unwrap().push(req.clone());
        let payment_id = format!("kp-{}", req.transaction_id);
        Ok(CreatedPayment {
            payment_url: format!("https://khipu.example/pay/{payment_id}"),
            raw: json!({"payment_id": payment_id}),
            payment_id,
        })
    }

    async fn fetch_by_notification_token(&self, token: &str) -> Result<VerifiedPayment, EngineError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        // Yield so concurrent notifications interleave.
        tokio::task::yield_now().await;
        self.by_token
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or_else(|| EngineError::ProviderRejected("unknown notification token".to_string()))
    }
}

/// Counts order writes that actually took effect.
#[derive(Default)]
pub struct CountingStore {
    pub inner: InMemoryStore,
    pub order_writes: AtomicUsize,
}

#[async_trait]
impl RecordStore for CountingStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.inner.insert_order(order).await
    }

    async fn get_order(&self, id: &str) -> Result<Order, StoreError> {
        self.inner.get_order(id).await
    }

    async fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
        provider: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let wrote = self
            .inner
            .update_order_status(id, status, provider, updated_at)
            .await?;
        if wrote {
            self.order_writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(wrote)
    }

    async fn orders_by_user(&self, user_id: &str) -> Result<Vec<Order>, StoreError> {
        self.inner.orders_by_user(user_id).await
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        self.inner.insert_payment(payment).await
    }

    async fn get_payment(&self, id: &str) -> Result<Payment, StoreError> {
        self.inner.get_payment(id).await
    }

    async fn update_payment(&self, id: &str, update: &PaymentUpdate) -> Result<Payment, StoreError> {
        self.inner.update_payment(id, update).await
    }

    async fn payments_by_order(
        &self,
        order_id: &str,
        descending: bool,
    ) -> Result<Vec<Payment>, StoreError> {
        self.inner.payments_by_order(order_id, descending).await
    }
}

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<CountingStore>,
    pub webpay: Arc<FakeWebpay>,
    pub khipu: Arc<FakeKhipu>,
}

pub fn harness() -> Harness {
    let settings = Settings::for_tests("http://127.0.0.1:1");
    let store = Arc::new(CountingStore::default());
    let webpay = Arc::new(FakeWebpay::default());
    let khipu = Arc::new(FakeKhipu::default());
    let shared: SharedStore = store.clone();
    let engine = Engine::new(shared, webpay.clone(), khipu.clone(), &settings);
    Harness {
        engine,
        store,
        webpay,
        khipu,
    }
}

/// State backed by the real provider clients, pointed at `provider_base`.
pub fn build_state(provider_base: &str) -> (AppState, Arc<InMemoryStore>) {
    let settings = Settings::for_tests(provider_base);
    let store = Arc::new(InMemoryStore::new());
    let shared: SharedStore = store.clone();
    let state = AppState::new(&settings, shared).expect("build state");
    (state, store)
}
