use axum::{extract::State, http::StatusCode, Json};
use service_core::error::AppError;

use crate::dtos::{CreatePlanRequest, PlanResponse};
use crate::startup::AppState;

pub async fn list_plans(State(state): State<AppState>) -> Result<Json<Vec<PlanResponse>>, AppError> {
    let plans = state.subscriptions.list_plans().await?;
    Ok(Json(plans.into_iter().map(PlanResponse::from).collect()))
}

/// Operator-only catalog addition.
pub async fn create_plan(
    State(state): State<AppState>,
    Json(payload): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<PlanResponse>), AppError> {
    let plan = state
        .subscriptions
        .create_plan(payload.duration_days, payload.price, payload.description)
        .await?;
    Ok((StatusCode::CREATED, Json(plan.into())))
}
