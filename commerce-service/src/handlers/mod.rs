//! HTTP handlers for commerce-service.

pub mod auth;
pub mod orders;
pub mod payments;
pub mod plans;
pub mod profile;
pub mod subscriptions;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::services::get_metrics;
use crate::startup::AppState;

/// Liveness check.
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "commerce-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Readiness check: the database and the OTP cache must answer.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.store.health_check().await;
    let cache = state.otp_store.health_check().await;

    if let Err(e) = &database {
        tracing::warn!(error = %e, "Readiness: database unavailable");
    }
    if let Err(e) = &cache {
        tracing::warn!(error = %e, "Readiness: OTP cache unavailable");
    }

    if database.is_ok() && cache.is_ok() {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unavailable",
                "database": database.is_ok(),
                "cache": cache.is_ok()
            })),
        )
    }
}

/// Prometheus metrics endpoint.
pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
