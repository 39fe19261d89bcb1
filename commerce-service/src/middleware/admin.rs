use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;

use crate::startup::AppState;

pub const ADMIN_API_KEY_HEADER: &str = "x-admin-api-key";

/// Lets a request through only when it carries the configured operator key.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = req
        .headers()
        .get(ADMIN_API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match (&state.config.admin.api_key, presented) {
        (Some(expected), Some(key)) if key == expected.expose_secret() => Ok(next.run(req).await),
        _ => {
            tracing::warn!("Failed admin authentication attempt");
            Err(AppError::Unauthorized(anyhow::anyhow!(
                "Invalid or missing admin API key"
            )))
        }
    }
}
