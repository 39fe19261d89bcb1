//! Phone-number login with one-time codes.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::error::ServiceError;
use super::jwt::{JwtService, TokenPair};
use super::metrics::record_otp_request;
use super::otp_store::{otp_key, CodeCheck, OtpSender, OtpStore};
use super::store::CommerceStore;
use super::subscriptions::grant_trial;
use crate::models::{Profile, User};

pub const OTP_TTL: Duration = Duration::from_secs(120);
const PHONE_PREFIX: &str = "09";
const PHONE_LENGTH: usize = 11;

/// Result of a successful verification.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub tokens: TokenPair,
    pub created: bool,
}

#[derive(Clone)]
pub struct OtpAuthenticator {
    store: Arc<dyn CommerceStore>,
    otp_store: Arc<dyn OtpStore>,
    sender: Arc<dyn OtpSender>,
    jwt: JwtService,
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

pub fn validate_phone(phone: &str) -> Result<(), ServiceError> {
    if !is_digits(phone) || phone.len() != PHONE_LENGTH || !phone.starts_with(PHONE_PREFIX) {
        return Err(ServiceError::Validation(
            "phone must be 11 digits starting with 09".to_string(),
        ));
    }
    Ok(())
}

/// Any numeric code is well-formed; a wrong length simply fails to match.
fn validate_code(code: &str) -> Result<(), ServiceError> {
    if !is_digits(code) {
        return Err(ServiceError::Validation("otp must be numeric".to_string()));
    }
    Ok(())
}

fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

impl OtpAuthenticator {
    pub fn new(
        store: Arc<dyn CommerceStore>,
        otp_store: Arc<dyn OtpStore>,
        sender: Arc<dyn OtpSender>,
        jwt: JwtService,
    ) -> Self {
        Self {
            store,
            otp_store,
            sender,
            jwt,
        }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    /// Issues a code for `phone` unless one is still live.
    #[tracing::instrument(skip(self))]
    pub async fn request_code(&self, phone: &str) -> Result<(), ServiceError> {
        if let Err(e) = validate_phone(phone) {
            record_otp_request("invalid");
            return Err(e);
        }

        let key = otp_key(phone);
        let code = generate_code();

        let stored = self.otp_store.set_if_absent(&key, &code, OTP_TTL).await?;
        if !stored {
            let retry_after = self
                .otp_store
                .ttl(&key)
                .await?
                .map(|remaining| remaining.as_secs().max(1))
                .unwrap_or(OTP_TTL.as_secs());
            record_otp_request("rate_limited");
            tracing::info!(retry_after, "OTP already pending for phone");
            return Err(ServiceError::RateLimited {
                message: "An OTP was already sent, try again later".to_string(),
                retry_after: Some(retry_after),
            });
        }

        if let Err(e) = self.sender.send(phone, &code).await {
            record_otp_request("send_failed");
            tracing::error!(error = %e, "OTP dispatch failed, releasing the code");
            // An undelivered code must not hold the phone's slot for a full TTL.
            if let Err(release) = self.otp_store.compare_and_delete(&key, &code).await {
                tracing::warn!(error = %release, "Could not release undelivered OTP");
            }
            return Err(ServiceError::Internal(e));
        }

        record_otp_request("sent");
        Ok(())
    }

    /// Consumes the code and logs the user in, creating the account (with
    /// its trial subscription) on first login.
    #[tracing::instrument(skip(self, code))]
    pub async fn verify_code(&self, phone: &str, code: &str) -> Result<LoginOutcome, ServiceError> {
        validate_phone(phone)?;
        validate_code(code)?;

        match self.otp_store.compare_and_delete(&otp_key(phone), code).await? {
            CodeCheck::Consumed => {}
            CodeCheck::Mismatch => {
                tracing::info!("OTP mismatch");
                return Err(ServiceError::InvalidCode);
            }
            CodeCheck::Missing => return Err(ServiceError::ExpiredCode),
        }

        let mut tx = self.store.begin().await?;
        let (user, created) = tx.find_or_create_user(phone).await?;
        if created {
            tx.insert_profile(&Profile::new(user.id)).await?;
            grant_trial(tx.as_mut(), user.id).await?;
        }
        tx.commit().await?;

        if created {
            tracing::info!(user_id = %user.id, "User registered");
        }

        let tokens = self.jwt.generate_token_pair(user.id, &user.phone)?;
        Ok(LoginOutcome {
            user,
            tokens,
            created,
        })
    }

    /// Trades a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        let claims = self
            .jwt
            .validate_refresh_token(refresh_token)
            .map_err(|e| ServiceError::Unauthorized(e.to_string()))?;

        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::Unauthorized("Invalid refresh token".to_string()))?;
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("Unknown user".to_string()))?;

        Ok(TokenPair {
            access_token: self.jwt.generate_access_token(user.id, &user.phone)?,
            refresh_token: refresh_token.to_string(),
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
        })
    }
}
