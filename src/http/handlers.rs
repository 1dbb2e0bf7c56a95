use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::domain::order::Order;
use crate::service::OrderServiceError;

#[derive(Debug, Deserialize)]
pub struct OrderQuery {
    uid: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/order")
            .route(web::get().to(get_order))
            .route(web::post().to(create_order)),
    )
    .route("/healthz", web::get().to(healthz))
    .route("/ready", web::get().to(ready))
    .route("/metrics", web::get().to(metrics));
}

fn error_response(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(json!({ "error": message.into() }))
}

async fn get_order(state: web::Data<AppState>, query: web::Query<OrderQuery>) -> HttpResponse {
    let uid = match query.uid.as_deref() {
        Some(uid) if !uid.is_empty() => uid,
        _ => return error_response(StatusCode::BAD_REQUEST, "uid query parameter is required"),
    };

    match state.service.get_order(uid).await {
        Ok(order) => HttpResponse::Ok().json(order),
        Err(OrderServiceError::NotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, "order not found")
        }
        Err(e) => {
            tracing::error!(order_uid = %uid, error = %e, "GET /order failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

async fn create_order(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let order: Order = match serde_json::from_slice(&body) {
        Ok(order) => order,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {}", e))
        }
    };

    if let Err(e) = order.validate() {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    match tokio::time::timeout(state.save_timeout, state.service.save_order(&order)).await {
        Ok(Ok(())) => HttpResponse::Created().json(order),
        Ok(Err(OrderServiceError::Conflict(uid))) => error_response(
            StatusCode::CONFLICT,
            format!("order {} already exists", uid),
        ),
        Ok(Err(OrderServiceError::MissingOrderUid)) => {
            error_response(StatusCode::BAD_REQUEST, "order_uid is required")
        }
        Ok(Err(e)) => {
            tracing::error!(order_uid = %order.order_uid, error = %e, "POST /order failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
        Err(_) => {
            tracing::error!(
                order_uid = %order.order_uid,
                timeout_ms = state.save_timeout.as_millis() as u64,
                "POST /order timed out"
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "save timed out")
        }
    }
}

async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

async fn ready(state: web::Data<AppState>) -> HttpResponse {
    match tokio::time::timeout(state.ready_timeout, state.service.get_all_orders()).await {
        Ok(Ok(_)) => HttpResponse::Ok().json(json!({ "status": "ready" })),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Readiness check failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
        Err(_) => {
            tracing::warn!("Readiness check timed out");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
    }
}

async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    state.metrics.set_cache_entries(state.service.cached_orders());

    match state.metrics.encode() {
        Ok(buffer) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
        }
    }
}
