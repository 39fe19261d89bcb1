use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::dtos::{AccessResponse, SubscriptionResponse};
use crate::middleware::AuthUser;
use crate::startup::AppState;

pub async fn list_subscriptions(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<SubscriptionResponse>>, AppError> {
    let subscriptions = state.subscriptions.list_for_user(user.user_id).await?;
    Ok(Json(
        subscriptions
            .into_iter()
            .map(SubscriptionResponse::from)
            .collect(),
    ))
}

/// 200 while the caller holds a running subscription, 403 otherwise.
pub async fn check_access(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<AccessResponse>, AppError> {
    if state
        .subscriptions
        .has_active_subscription(user.user_id)
        .await?
    {
        Ok(Json(AccessResponse { active: true }))
    } else {
        Err(AppError::Forbidden(anyhow::anyhow!(
            "An active subscription is required"
        )))
    }
}
