use service_core::error::AppError;
use thiserror::Error;

use super::gateway::GatewayError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Invalid OTP code")]
    InvalidCode,

    #[error("OTP code has expired, request a new one")]
    ExpiredCode,

    #[error("{0}")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ServiceError::RateLimited {
                message,
                retry_after,
            } => AppError::TooManyRequests(message, retry_after),
            ServiceError::NotFound(what) => {
                AppError::NotFound(anyhow::anyhow!("{} not found", what))
            }
            ServiceError::Gateway(GatewayError::Upstream { code, message, .. }) => {
                AppError::BadGateway(match code {
                    Some(code) => format!("{} (code {})", message, code),
                    None => message,
                })
            }
            ServiceError::Gateway(GatewayError::Timeout) => {
                AppError::GatewayTimeout("payment gateway did not respond in time".to_string())
            }
            ServiceError::Gateway(GatewayError::Network(_)) => {
                AppError::BadGateway("payment gateway is unreachable".to_string())
            }
            ServiceError::InvalidCode => AppError::BadRequest(anyhow::anyhow!("Invalid OTP code")),
            ServiceError::ExpiredCode => AppError::BadRequest(anyhow::anyhow!(
                "OTP code has expired, request a new one"
            )),
            ServiceError::Unauthorized(msg) => AppError::Unauthorized(anyhow::anyhow!(msg)),
            ServiceError::Database(e) => AppError::DatabaseError(e.into()),
            ServiceError::Redis(e) => AppError::RedisError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
