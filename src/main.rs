// src/main.rs
use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use dotenvy::dotenv;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use pay_reconcile::config::{Settings, StoreKind};
use pay_reconcile::db::{PgStore, SharedStore};
use pay_reconcile::memory::InMemoryStore;
use pay_reconcile::{AppState, api, docs};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::from_env().expect("invalid configuration");

    let store: SharedStore = match settings.store {
        StoreKind::Postgres => {
            let url = settings
                .database_url
                .as_deref()
                .expect("DATABASE_URL must be set");
            Arc::new(
                PgStore::connect(url)
                    .await
                    .expect("Failed to connect to DB"),
            )
        }
        StoreKind::Memory => {
            log::warn!("STORE=memory: orders and payments are lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };

    if settings.khipu.receiver_id.is_none() || settings.khipu.secret.is_none() {
        log::warn!("KHIPU_RECEIVER_ID/KHIPU_SECRET not set; Khipu calls will fail");
    }

    let state = web::Data::new(
        AppState::new(&settings, store).expect("Failed to build provider clients"),
    );

    log::info!("listening on {}", settings.bind_addr);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .service(
                SwaggerUi::new("/docs/{_:.*}")
                    .url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
            )
            .configure(api::configure)
    })
    .bind(&settings.bind_addr)?
    .run()
    .await
}
