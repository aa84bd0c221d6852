// src/api/khipu_client.rs
//
// Client for the Khipu REST API 2.0. Every call carries an HMAC signature
// (see khipu_sign.rs) instead of a bearer credential.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::api::khipu_sign::KhipuSigner;
use crate::api::webpay_client::as_i64;
use crate::config::KhipuSettings;
use crate::error::EngineError;
use crate::status::KhipuStatus;

#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub subject: String,
    pub currency: String,
    pub amount: i64,
    /// Our order id; Khipu echoes it back as `transaction_id`.
    pub transaction_id: String,
    pub payer_email: String,
    pub return_url: String,
    pub cancel_url: String,
    pub notify_url: String,
}

impl CreatePaymentRequest {
    /// The form fields sent to Khipu, which are also the signed parameter set.
    pub fn form_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("subject", self.subject.clone()),
            ("currency", self.currency.clone()),
            ("amount", self.amount.to_string()),
            ("transaction_id", self.transaction_id.clone()),
            ("payer_email", self.payer_email.clone()),
            ("return_url", self.return_url.clone()),
            ("cancel_url", self.cancel_url.clone()),
            ("notify_url", self.notify_url.clone()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedPayment {
    pub payment_id: String,
    pub payment_url: String,
    pub raw: Value,
}

/// Khipu's own view of a payment, fetched with a notification token.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPayment {
    pub payment_id: String,
    pub transaction_id: String,
    pub status: KhipuStatus,
    /// Amount Khipu reports as paid.
    pub amount: Option<i64>,
    pub raw: Value,
}

#[async_trait]
pub trait KhipuGateway: Send + Sync {
    async fn create(&self, req: &CreatePaymentRequest) -> Result<CreatedPayment, EngineError>;

    /// Resolves a webhook's `notification_token` into authoritative payment
    /// data by calling back to Khipu. Webhook bodies are never trusted for status.
    async fn fetch_by_notification_token(&self, token: &str) -> Result<VerifiedPayment, EngineError>;
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    payment_id: String,
    payment_url: String,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    payment_id: String,
    transaction_id: String,
    status: String,
    amount: Option<Value>,
}

pub struct KhipuClient {
    http: reqwest::Client,
    settings: KhipuSettings,
}

impl KhipuClient {
    pub fn new(http: reqwest::Client, settings: KhipuSettings) -> Self {
        Self { http, settings }
    }

    fn payments_url(&self) -> String {
        format!("{}/payments", self.settings.base_url)
    }

    async fn read_body(resp: reqwest::Response) -> Result<Value, EngineError> {
        let status = resp.status();
        let body = resp.text().await?;

        if status.is_server_error() {
            return Err(EngineError::ProviderUnavailable(format!(
                "khipu status={status} body={body}"
            )));
        }
        if !status.is_success() {
            let detail = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);
            return Err(EngineError::ProviderRejected(format!(
                "khipu status={status}: {detail}"
            )));
        }

        serde_json::from_str::<Value>(&body)
            .map_err(|e| EngineError::ProviderRejected(format!("invalid khipu response: {e}; body={body}")))
    }
}

#[async_trait]
impl KhipuGateway for KhipuClient {
    async fn create(&self, req: &CreatePaymentRequest) -> Result<CreatedPayment, EngineError> {
        let signer = KhipuSigner::from_settings(&self.settings)?;
        let url = self.payments_url();
        let params = req.form_params();
        let authorization = signer.sign("POST", &url, &params)?;

        let resp = self
            .http
            .post(&url)
            .header("Authorization", authorization)
            .form(&params)
            .send()
            .await?;

        let raw = Self::read_body(resp).await?;
        let created: CreateResponse = serde_json::from_value(raw.clone())
            .map_err(|e| EngineError::ProviderRejected(format!("invalid khipu create response: {e}")))?;

        log::info!(
            "khipu payment created payment_id={} transaction_id={}",
            created.payment_id,
            req.transaction_id
        );
        Ok(CreatedPayment {
            payment_id: created.payment_id,
            payment_url: created.payment_url,
            raw,
        })
    }

    async fn fetch_by_notification_token(&self, token: &str) -> Result<VerifiedPayment, EngineError> {
        let signer = KhipuSigner::from_settings(&self.settings)?;
        let url = self.payments_url();
        let params = [("notification_token", token.to_string())];
        let authorization = signer.sign("GET", &url, &params)?;

        let resp = self
            .http
            .get(&url)
            .header("Authorization", authorization)
            .query(&params)
            .send()
            .await?;

        let raw = Self::read_body(resp).await?;
        let payment: PaymentResponse = serde_json::from_value(raw.clone())
            .map_err(|e| EngineError::ProviderRejected(format!("invalid khipu payment response: {e}")))?;

        Ok(VerifiedPayment {
            payment_id: payment.payment_id,
            transaction_id: payment.transaction_id,
            status: KhipuStatus::parse(&payment.status),
            amount: payment.amount.as_ref().and_then(as_i64),
            raw,
        })
    }
}
