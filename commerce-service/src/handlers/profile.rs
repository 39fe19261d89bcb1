use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::dtos::ProfileResponse;
use crate::middleware::AuthUser;
use crate::models::ProfileChanges;
use crate::startup::AppState;

pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ProfileResponse>, AppError> {
    let detail = state.profiles.get(user.user_id).await?;
    Ok(Json(detail.into()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(changes): Json<ProfileChanges>,
) -> Result<Json<ProfileResponse>, AppError> {
    let detail = state.profiles.update(user.user_id, changes).await?;
    Ok(Json(detail.into()))
}
