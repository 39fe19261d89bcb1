//! Payment gateway port used by the order orchestrator.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Verification codes the provider uses for a settled payment.
/// `101` means it was already verified before.
pub const SETTLED_CODES: [i64; 2] = [100, 101];

#[derive(Error, Debug)]
pub enum GatewayError {
    /// The provider answered but refused the operation.
    #[error("{message}")]
    Upstream {
        code: Option<i64>,
        message: String,
        raw_response: Option<Value>,
    },

    #[error("payment gateway timed out")]
    Timeout,

    #[error("payment gateway network error: {0}")]
    Network(String),
}

impl GatewayError {
    pub fn raw_response(&self) -> Option<&Value> {
        match self {
            GatewayError::Upstream { raw_response, .. } => raw_response.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub amount: i64,
    pub callback_url: String,
    pub description: String,
    pub mobile: Option<String>,
    pub email: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct PaymentInitiation {
    pub authority: String,
    pub payment_url: String,
    pub raw_response: Value,
}

#[derive(Debug, Clone)]
pub struct PaymentVerification {
    pub code: i64,
    pub ref_id: Option<String>,
    pub raw_response: Value,
}

impl PaymentVerification {
    pub fn is_settled(&self) -> bool {
        SETTLED_CODES.contains(&self.code)
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn request_payment(
        &self,
        request: PaymentRequest,
    ) -> Result<PaymentInitiation, GatewayError>;

    async fn verify_payment(
        &self,
        authority: &str,
        amount: i64,
    ) -> Result<PaymentVerification, GatewayError>;
}
