use axum::{extract::State, http::StatusCode, Json};
use service_core::error::AppError;

use crate::dtos::{CreateOrderRequest, OrderResponse, UserPaymentResponse};
use crate::middleware::AuthUser;
use crate::startup::AppState;

pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    tracing::info!(
        user_id = %user.user_id,
        plan_id = %payload.plan_id,
        "Creating order"
    );

    let detail = state
        .orders
        .create_order(user.user_id, payload.plan_id, payload.contact)
        .await?;

    Ok((StatusCode::CREATED, Json(OrderResponse::from(detail))))
}

pub async fn list_user_payments(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<UserPaymentResponse>>, AppError> {
    let records = state.orders.list_user_payments(user.user_id).await?;
    Ok(Json(
        records.into_iter().map(UserPaymentResponse::from).collect(),
    ))
}
