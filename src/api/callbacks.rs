// src/api/callbacks.rs
//
// Inbound provider callbacks. Webpay returns the buyer's browser here, Khipu
// posts its webhook here. Neither ever receives internal error details.

use std::collections::HashMap;

use actix_web::http::{Method, header};
use actix_web::{HttpRequest, HttpResponse, post, route, web};
use serde_json::{Map, Value};

use crate::AppState;
use crate::error::EngineError;
use crate::reconcile::{CallbackInput, CallbackMethod, CallbackReply, Provider};

/// Accepts JSON objects and `application/x-www-form-urlencoded` bodies.
/// Anything else (including an empty body) becomes an empty object.
pub fn parse_callback_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Object(Map::new());
    }

    if let Ok(value @ Value::Object(_)) = serde_json::from_slice::<Value>(body) {
        return value;
    }

    match serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
        Ok(pairs) => Value::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        ),
        Err(e) => {
            log::warn!("unparseable callback body: {e}");
            Value::Object(Map::new())
        }
    }
}

pub fn parse_query(req: &HttpRequest) -> HashMap<String, String> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(req.query_string())
        .map(|pairs| pairs.into_iter().collect())
        .unwrap_or_default()
}

fn callback_input(req: &HttpRequest, body: &[u8]) -> CallbackInput {
    CallbackInput {
        method: if req.method() == Method::GET {
            CallbackMethod::Get
        } else {
            CallbackMethod::Post
        },
        query: parse_query(req),
        body: parse_callback_body(body),
    }
}

fn into_response(reply: CallbackReply) -> HttpResponse {
    match reply {
        CallbackReply::Redirect { location } => HttpResponse::Found()
            .insert_header((header::LOCATION, location))
            .finish(),
        CallbackReply::Ack(body) => HttpResponse::Ok().json(body),
    }
}

#[utoipa::path(
    post,
    path = "/api/pay-webpay/commit",
    tag = "webpay",
    params(("orderId" = String, Query, description = "Order reference")),
    request_body(content = String, content_type = "application/x-www-form-urlencoded", description = "token_ws (or TBK_TOKEN when the buyer aborted)"),
    responses((status = 302, description = "Redirect to the storefront success or error page"))
)]
#[route("/api/pay-webpay/commit", method = "GET", method = "POST")]
pub async fn webpay_commit(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let input = callback_input(&req, &body);
    let reply = state.engine.commit_webpay(&input).await;
    into_response(reply)
}

#[utoipa::path(
    post,
    path = "/api/pay-khipu/notify",
    tag = "khipu",
    request_body(content = String, content_type = "application/x-www-form-urlencoded", description = "notification_token and api_version"),
    responses(
        (status = 200, description = "Notification acknowledged"),
        (status = 400, description = "notification_token missing")
    )
)]
#[post("/api/pay-khipu/notify")]
pub async fn khipu_notify(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, EngineError> {
    let input = callback_input(&req, &body);
    let reply = state.engine.callback(Provider::Khipu, &input).await?;
    Ok(into_response(reply))
}
