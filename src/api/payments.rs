// src/api/payments.rs

use actix_web::{HttpResponse, get, post, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::AppState;
use crate::error::EngineError;
use crate::models::Payment;
use crate::reconcile::{OrderPayments, Provider};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub order_id: Option<String>,
    /// Session reference for Webpay; defaults to `guest`.
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub ok: bool,
    pub redirect_url: String,
}

fn resolve(state: &AppState, slug: &str) -> Result<Provider, HttpResponse> {
    state.providers.lookup(slug).ok_or_else(|| {
        HttpResponse::NotFound().json(json!({
            "ok": false,
            "errorcode": "RouteNotFound",
            "detail": format!("unknown payment provider: {slug}"),
        }))
    })
}

#[utoipa::path(
    post,
    path = "/api/pay-{provider}/init",
    tag = "payments",
    params(("provider" = String, Path, description = "webpay | khipu")),
    request_body = InitRequest,
    responses(
        (status = 200, description = "Redirect URL for the buyer", body = InitResponse),
        (status = 400, description = "Missing orderId or order not PENDING"),
        (status = 404, description = "Unknown provider or order"),
        (status = 502, description = "Provider unavailable or rejected the request")
    )
)]
#[post("/api/pay-{provider}/init")]
pub async fn init_payment(
    path: web::Path<String>,
    payload: web::Json<InitRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, EngineError> {
    let provider = match resolve(&state, &path) {
        Ok(p) => p,
        Err(resp) => return Ok(resp),
    };

    let order_id = payload
        .order_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| EngineError::validation("orderId"))?;

    let redirect_url = state
        .engine
        .init(provider, order_id, payload.user_id.as_deref())
        .await
        .inspect_err(|e| log::error!("{} init failed order_id={order_id}: {e}", provider.slug()))?;

    Ok(HttpResponse::Ok().json(InitResponse {
        ok: true,
        redirect_url,
    }))
}

#[get("/api/pay-{provider}/health")]
pub async fn provider_health(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    match resolve(&state, &path) {
        Ok(provider) => HttpResponse::Ok().json(json!({"ok": true, "service": provider.slug()})),
        Err(resp) => resp,
    }
}

#[utoipa::path(
    get,
    path = "/api/pay-khipu/status/{order_id}",
    tag = "khipu",
    params(("order_id" = String, Path, description = "Order reference")),
    responses(
        (status = 200, description = "Order with every recorded payment", body = OrderPayments),
        (status = 404, description = "Order not found")
    )
)]
#[get("/api/pay-khipu/status/{order_id}")]
pub async fn khipu_status(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, EngineError> {
    let view = state.engine.status_khipu(&path).await?;
    Ok(HttpResponse::Ok().json(view))
}

#[get("/api/payments/health")]
pub async fn payments_health() -> HttpResponse {
    HttpResponse::Ok().json(json!({"ok": true, "service": "payments"}))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentList {
    pub ok: bool,
    pub payments: Vec<Payment>,
}

#[utoipa::path(
    get,
    path = "/api/payments/by-order/{order_id}",
    tag = "payments",
    params(("order_id" = String, Path, description = "Order reference")),
    responses((status = 200, description = "Payments recorded for the order, oldest first", body = PaymentList))
)]
#[get("/api/payments/by-order/{order_id}")]
pub async fn payments_by_order(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, EngineError> {
    let payments = state.engine.payments_by_order(&path).await?;
    Ok(HttpResponse::Ok().json(PaymentList { ok: true, payments }))
}
