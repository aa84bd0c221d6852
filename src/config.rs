// src/config.rs

use std::env;
use std::time::Duration;

/// Webpay Plus integration (sandbox) credentials, published by the provider.
pub const WEBPAY_INTEGRATION_COMMERCE_CODE: &str = "597055555532";
pub const WEBPAY_INTEGRATION_API_KEY: &str =
    "579B532A7440BB0C9079DED94D31EA1615BACEB56610332264630D42D0A58C1C";
pub const WEBPAY_INTEGRATION_BASE_URL: &str = "https://webpay3gint.transbank.cl";
pub const KHIPU_BASE_URL: &str = "https://khipu.com/api/2.0";
pub const DEFAULT_PAYER_EMAIL: &str = "cliente@example.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct WebpaySettings {
    pub commerce_code: String,
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct KhipuSettings {
    pub receiver_id: Option<String>,
    pub secret: Option<String>,
    pub base_url: String,
}

/// Process-wide configuration, read once in `main` and handed to the
/// clients and handlers through `AppState`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub store: StoreKind,
    pub database_url: Option<String>,
    /// Public base URL of this service, used for provider return/notify URLs.
    pub api_base_url: String,
    /// Public base URL of the storefront, used for success/error redirects.
    pub app_base_url: String,
    /// Payer email sent to Khipu when the order carries none.
    pub fallback_payer_email: String,
    pub webpay: WebpaySettings,
    pub khipu: KhipuSettings,
    pub provider_timeout: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self, String> {
        let store = match env::var("STORE")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" => StoreKind::Postgres,
            "memory" => StoreKind::Memory,
            other => return Err(format!("STORE must be postgres or memory, got {other}")),
        };

        let database_url = env::var("DATABASE_URL").ok();
        if store == StoreKind::Postgres && database_url.is_none() {
            return Err("DATABASE_URL must be set when STORE=postgres".to_string());
        }

        let timeout_secs = match env::var("PROVIDER_TIMEOUT_SECS") {
            Ok(v) => v
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| format!("PROVIDER_TIMEOUT_SECS must be a positive integer, got {v}"))?,
            Err(_) => 15,
        };

        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            store,
            database_url,
            api_base_url: trim_base(
                env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            ),
            app_base_url: trim_base(
                env::var("APP_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string()),
            ),
            fallback_payer_email: env::var("FALLBACK_PAYER_EMAIL")
                .unwrap_or_else(|_| DEFAULT_PAYER_EMAIL.to_string()),
            webpay: WebpaySettings {
                commerce_code: env::var("TBK_COMMERCE_CODE")
                    .unwrap_or_else(|_| WEBPAY_INTEGRATION_COMMERCE_CODE.to_string()),
                api_key: env::var("TBK_API_KEY")
                    .unwrap_or_else(|_| WEBPAY_INTEGRATION_API_KEY.to_string()),
                base_url: trim_base(
                    env::var("TBK_BASE_URL")
                        .unwrap_or_else(|_| WEBPAY_INTEGRATION_BASE_URL.to_string()),
                ),
            },
            khipu: KhipuSettings {
                receiver_id: non_empty(env::var("KHIPU_RECEIVER_ID").ok()),
                secret: non_empty(env::var("KHIPU_SECRET").ok()),
                base_url: trim_base(
                    env::var("KHIPU_BASE_URL").unwrap_or_else(|_| KHIPU_BASE_URL.to_string()),
                ),
            },
            provider_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Settings pointing both providers at `provider_base` with fixed test
    /// credentials. Used by tests together with a mock HTTP server.
    pub fn for_tests(provider_base: &str) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            store: StoreKind::Memory,
            database_url: None,
            api_base_url: "https://api.example.test".to_string(),
            app_base_url: "https://shop.example.test".to_string(),
            fallback_payer_email: DEFAULT_PAYER_EMAIL.to_string(),
            webpay: WebpaySettings {
                commerce_code: WEBPAY_INTEGRATION_COMMERCE_CODE.to_string(),
                api_key: WEBPAY_INTEGRATION_API_KEY.to_string(),
                base_url: trim_base(provider_base.to_string()),
            },
            khipu: KhipuSettings {
                receiver_id: Some("12345".to_string()),
                secret: Some("khipu-test-secret".to_string()),
                base_url: trim_base(provider_base.to_string()),
            },
            provider_timeout: Duration::from_secs(5),
        }
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
