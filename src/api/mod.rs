pub mod callbacks;
pub mod checkout;
pub mod khipu_client;
pub mod khipu_sign;
pub mod payments;
pub mod webpay_client;

use actix_web::{HttpResponse, get, web};
use serde_json::json;

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({"ok": true}))
}

/// Registers every route of the service. Literal paths go before the
/// `pay-{provider}` patterns so they win the match.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(checkout::checkout_health)
        .service(checkout::create_checkout)
        .service(checkout::get_order)
        .service(checkout::orders_by_user)
        .service(callbacks::webpay_commit)
        .service(callbacks::khipu_notify)
        .service(payments::payments_health)
        .service(payments::payments_by_order)
        .service(payments::khipu_status)
        .service(payments::provider_health)
        .service(payments::init_payment);
}
