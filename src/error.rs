// src/error.rs

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::models::OrderStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    AlreadyExists,
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("stored record could not be decoded: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("missing or invalid field: {field}")]
    Validation { field: String },
    #[error("notification_token missing")]
    MissingToken,
    #[error("order not found")]
    OrderNotFound,
    #[error("order not PENDING (current: {current})")]
    InvalidStatus { current: OrderStatus },
    #[error("payment provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("payment provider rejected the request: {0}")]
    ProviderRejected(String),
    #[error("provider credentials are not configured")]
    MisconfiguredCredentials,
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl EngineError {
    pub fn validation(field: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.into(),
        }
    }

    /// Stable code reported to callers in the `errorcode` field.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "ValidationError",
            EngineError::MissingToken => "MissingToken",
            EngineError::OrderNotFound => "OrderNotFound",
            EngineError::InvalidStatus { .. } => "InvalidStatus",
            EngineError::ProviderUnavailable(_) => "ProviderUnavailable",
            EngineError::ProviderRejected(_) => "ProviderRejected",
            EngineError::MisconfiguredCredentials => "MisconfiguredCredentials",
            EngineError::Storage(_) => "StorageError",
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            EngineError::ProviderRejected(format!("unreadable provider response: {value}"))
        } else {
            EngineError::ProviderUnavailable(value.to_string())
        }
    }
}

impl ResponseError for EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Validation { .. }
            | EngineError::MissingToken
            | EngineError::InvalidStatus { .. } => StatusCode::BAD_REQUEST,
            EngineError::OrderNotFound => StatusCode::NOT_FOUND,
            EngineError::ProviderUnavailable(_) | EngineError::ProviderRejected(_) => {
                StatusCode::BAD_GATEWAY
            }
            EngineError::MisconfiguredCredentials | EngineError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "ok": false,
            "errorcode": self.code(),
            "detail": self.to_string(),
        }))
    }
}
