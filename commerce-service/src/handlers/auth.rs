use axum::{extract::State, http::StatusCode, Json};
use service_core::error::AppError;

use crate::dtos::{LoginResponse, MessageResponse, RefreshRequest, SendOtpRequest, VerifyOtpRequest};
use crate::services::jwt::TokenPair;
use crate::startup::AppState;

pub async fn request_otp(
    State(state): State<AppState>,
    Json(payload): Json<SendOtpRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    state.otp.request_code(&payload.phone).await?;

    Ok((
        StatusCode::OK,
        Json(MessageResponse {
            message: "OTP sent".to_string(),
        }),
    ))
}

pub async fn verify_otp(
    State(state): State<AppState>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let login = state
        .otp
        .verify_code(&payload.phone, &payload.otp)
        .await?;

    Ok(Json(LoginResponse::new(login.user, login.tokens)))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, AppError> {
    let tokens = state.otp.refresh(&payload.refresh_token).await?;
    Ok(Json(tokens))
}
