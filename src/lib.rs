pub mod api;
pub mod checkout;
pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod memory;
pub mod models;
pub mod reconcile;
pub mod status;

use std::sync::Arc;

use api::khipu_client::{KhipuClient, KhipuGateway};
use api::webpay_client::{WebpayClient, WebpayGateway};
use config::Settings;
use db::SharedStore;
use error::EngineError;
use reconcile::{Engine, ProviderTable};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub providers: ProviderTable,
}

impl AppState {
    /// Wires the real provider clients. Every provider call shares one HTTP
    /// client whose timeout bounds the whole request.
    pub fn new(settings: &Settings, store: SharedStore) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(settings.provider_timeout)
            .connect_timeout(settings.provider_timeout)
            .build()?;

        let webpay = Arc::new(WebpayClient::new(http.clone(), settings.webpay.clone()));
        let khipu = Arc::new(KhipuClient::new(http, settings.khipu.clone()));
        Ok(Self::with_gateways(settings, store, webpay, khipu))
    }

    pub fn with_gateways(
        settings: &Settings,
        store: SharedStore,
        webpay: Arc<dyn WebpayGateway>,
        khipu: Arc<dyn KhipuGateway>,
    ) -> Self {
        Self {
            engine: Arc::new(Engine::new(store, webpay, khipu, settings)),
            providers: ProviderTable::new(),
        }
    }
}
