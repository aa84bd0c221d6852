// src/api/webpay_client.rs
//
// Minimal client for the Webpay Plus REST API (Transbank).
// Auth: Tbk-Api-Key-Id / Tbk-Api-Key-Secret headers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::WebpaySettings;
use crate::error::EngineError;

const TRANSACTIONS_PATH: &str = "/rswebpaytransaction/api/webpay/v1.2/transactions";

/// Provider-imposed maximum lengths.
pub const BUY_ORDER_MAX: usize = 26;
pub const SESSION_ID_MAX: usize = 61;

#[derive(Debug, Clone, PartialEq)]
pub struct WebpayInit {
    pub token: String,
    pub url: String,
}

impl WebpayInit {
    /// Where the browser has to be sent to pay.
    pub fn redirect_url(&self) -> String {
        format!("{}?token_ws={}", self.url, self.token)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebpayCommit {
    pub approved: bool,
    pub status: Option<String>,
    pub response_code: Option<i64>,
    pub authorization_code: Option<String>,
    pub amount: Option<i64>,
    pub card_last4: Option<String>,
    pub buy_order: Option<String>,
    pub raw: Value,
}

#[async_trait]
pub trait WebpayGateway: Send + Sync {
    async fn initiate(
        &self,
        buy_order: &str,
        session_id: &str,
        amount: i64,
        return_url: &str,
    ) -> Result<WebpayInit, EngineError>;

    /// Must be called at most once per token; Webpay rejects a second commit.
    async fn commit(&self, token: &str) -> Result<WebpayCommit, EngineError>;
}

#[derive(Debug, Serialize)]
struct CreateTransactionRequest<'a> {
    buy_order: &'a str,
    session_id: &'a str,
    amount: i64,
    return_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateTransactionResponse {
    token: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct CardDetail {
    card_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    status: Option<String>,
    response_code: Option<Value>,
    authorization_code: Option<String>,
    amount: Option<Value>,
    buy_order: Option<String>,
    card_detail: Option<CardDetail>,
}

/// Cuts `value` to at most `max` characters.
pub fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Providers send amounts as numbers, but older SDKs stringify them.
pub(crate) fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse().ok().or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

pub struct WebpayClient {
    http: reqwest::Client,
    settings: WebpaySettings,
}

impl WebpayClient {
    pub fn new(http: reqwest::Client, settings: WebpaySettings) -> Self {
        Self { http, settings }
    }

    fn transactions_url(&self) -> String {
        format!("{}{}", self.settings.base_url, TRANSACTIONS_PATH)
    }

    async fn read_body(resp: reqwest::Response) -> Result<Value, EngineError> {
        let status = resp.status();
        let body = resp.text().await?;

        if status.is_server_error() {
            return Err(EngineError::ProviderUnavailable(format!(
                "webpay status={status} body={body}"
            )));
        }
        if !status.is_success() {
            let detail = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("error_message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);
            return Err(EngineError::ProviderRejected(format!(
                "webpay status={status}: {detail}"
            )));
        }

        serde_json::from_str::<Value>(&body)
            .map_err(|e| EngineError::ProviderRejected(format!("invalid webpay response: {e}; body={body}")))
    }
}

#[async_trait]
impl WebpayGateway for WebpayClient {
    async fn initiate(
        &self,
        buy_order: &str,
        session_id: &str,
        amount: i64,
        return_url: &str,
    ) -> Result<WebpayInit, EngineError> {
        let req = CreateTransactionRequest {
            buy_order: truncate_chars(buy_order, BUY_ORDER_MAX),
            session_id: truncate_chars(session_id, SESSION_ID_MAX),
            amount,
            return_url,
        };

        let resp = self
            .http
            .post(self.transactions_url())
            .header("Tbk-Api-Key-Id", &self.settings.commerce_code)
            .header("Tbk-Api-Key-Secret", &self.settings.api_key)
            .json(&req)
            .send()
            .await?;

        let body = Self::read_body(resp).await?;
        let created: CreateTransactionResponse = serde_json::from_value(body)
            .map_err(|e| EngineError::ProviderRejected(format!("invalid webpay create response: {e}")))?;

        log::info!("webpay transaction created buy_order={}", req.buy_order);
        Ok(WebpayInit {
            token: created.token,
            url: created.url,
        })
    }

    async fn commit(&self, token: &str) -> Result<WebpayCommit, EngineError> {
        let resp = self
            .http
            .put(format!("{}/{}", self.transactions_url(), token))
            .header("Tbk-Api-Key-Id", &self.settings.commerce_code)
            .header("Tbk-Api-Key-Secret", &self.settings.api_key)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let raw = Self::read_body(resp).await?;
        let parsed: CommitResponse = serde_json::from_value(raw.clone())
            .map_err(|e| EngineError::ProviderRejected(format!("invalid webpay commit response: {e}")))?;

        let response_code = parsed.response_code.as_ref().and_then(as_i64);
        let approved = parsed.status.as_deref() == Some("AUTHORIZED") && response_code == Some(0);

        Ok(WebpayCommit {
            approved,
            status: parsed.status,
            response_code,
            authorization_code: parsed.authorization_code,
            amount: parsed.amount.as_ref().and_then(as_i64),
            card_last4: parsed.card_detail.and_then(|c| c.card_number),
            buy_order: parsed.buy_order,
            raw,
        })
    }
}
