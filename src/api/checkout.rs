// src/api/checkout.rs

use actix_web::{HttpResponse, get, post, web};
use serde_json::json;

use crate::AppState;
use crate::checkout::{self, CheckoutRequest};
use crate::error::{EngineError, StoreError};

#[utoipa::path(
    post,
    path = "/api/checkout",
    tag = "checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "PENDING order created"),
        (status = 400, description = "Empty cart, unknown SKU or non-positive total")
    )
)]
#[post("/api/checkout")]
pub async fn create_checkout(
    payload: web::Json<CheckoutRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, EngineError> {
    let order = checkout::create_order(state.engine.store().as_ref(), &payload).await?;

    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "orderId": order.id,
        "amountCLP": order.amount,
        "currency": order.currency,
    })))
}

#[get("/api/checkout/health")]
pub async fn checkout_health() -> HttpResponse {
    HttpResponse::Ok().json(json!({"ok": true, "service": "checkout"}))
}

#[get("/api/checkout/orders/{id}")]
pub async fn get_order(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, EngineError> {
    let order = match state.engine.store().get_order(&path).await {
        Ok(order) => order,
        Err(StoreError::NotFound) => return Err(EngineError::OrderNotFound),
        Err(e) => return Err(e.into()),
    };
    Ok(HttpResponse::Ok().json(json!({"ok": true, "order": order})))
}

#[get("/api/checkout/orders-by-user/{user_id}")]
pub async fn orders_by_user(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, EngineError> {
    let orders = state.engine.store().orders_by_user(&path).await?;
    Ok(HttpResponse::Ok().json(json!({"ok": true, "orders": orders})))
}
