use secrecy::Secret;
use serde::Deserialize;
use service_core::error::AppError;

const ZARINPAL_SANDBOX_API: &str = "https://sandbox.zarinpal.com/pg/v4/payment/";
const ZARINPAL_PRODUCTION_API: &str = "https://payment.zarinpal.com/pg/v4/payment/";
const ZARINPAL_SANDBOX_STARTPAY: &str = "https://sandbox.zarinpal.com/pg/StartPay/";
const ZARINPAL_PRODUCTION_STARTPAY: &str = "https://payment.zarinpal.com/pg/StartPay/";

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub zarinpal: ZarinpalConfig,
    pub redirects: RedirectConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default = "default_true")]
    pub seed_trial_plan: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// PostgreSQL settings. Without a URL the service keeps state in memory.
#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<Secret<String>>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Redis settings for the shared OTP cache. Without a URL codes live in-process.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct RedisConfig {
    #[serde(default)]
    pub url: Option<Secret<String>>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct JwtConfig {
    pub secret: Secret<String>,
    #[serde(default = "default_access_minutes")]
    pub access_token_expiry_minutes: i64,
    #[serde(default = "default_refresh_days")]
    pub refresh_token_expiry_days: i64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ZarinpalConfig {
    pub merchant_id: String,
    #[serde(default = "default_true")]
    pub sandbox: bool,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_seconds: u64,
    /// Public URL of `/api/v1/payments/callback`, handed to the gateway.
    pub callback_url: String,
    /// Overrides the sandbox/production API base (tests point this at a mock).
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub startpay_base_url: Option<String>,
}

impl ZarinpalConfig {
    pub fn api_base(&self) -> String {
        let base = self.api_base_url.clone().unwrap_or_else(|| {
            if self.sandbox {
                ZARINPAL_SANDBOX_API.to_string()
            } else {
                ZARINPAL_PRODUCTION_API.to_string()
            }
        });
        with_trailing_slash(base)
    }

    pub fn startpay_base(&self) -> String {
        let base = self.startpay_base_url.clone().unwrap_or_else(|| {
            if self.sandbox {
                ZARINPAL_SANDBOX_STARTPAY.to_string()
            } else {
                ZARINPAL_PRODUCTION_STARTPAY.to_string()
            }
        });
        with_trailing_slash(base)
    }
}

/// Where the payment callback sends the user's browser.
#[derive(Deserialize, Clone, Debug)]
pub struct RedirectConfig {
    pub success_url: String,
    pub failure_url: String,
}

/// Operator access to catalog management. Without a key the admin routes
/// refuse every request.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct AdminConfig {
    #[serde(default)]
    pub api_key: Option<Secret<String>>,
}

fn with_trailing_slash(mut url: String) -> String {
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3010
}

fn default_max_connections() -> u32 {
    10
}

fn default_access_minutes() -> i64 {
    15
}

fn default_refresh_days() -> i64 {
    7
}

fn default_gateway_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info,commerce_service=debug".to_string()
}

fn default_service_name() -> String {
    "commerce-service".to_string()
}

impl Config {
    /// Load from `configuration.*` and `COMMERCE__*` environment variables,
    /// e.g. `COMMERCE__ZARINPAL__MERCHANT_ID`.
    pub fn from_env() -> Result<Self, AppError> {
        service_core::config::load("COMMERCE")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zarinpal(sandbox: bool) -> ZarinpalConfig {
        ZarinpalConfig {
            merchant_id: "merchant".into(),
            sandbox,
            timeout_seconds: 10,
            callback_url: "http://localhost/callback".into(),
            api_base_url: None,
            startpay_base_url: None,
        }
    }

    #[test]
    fn sandbox_flag_selects_gateway_hosts() {
        assert_eq!(zarinpal(true).api_base(), ZARINPAL_SANDBOX_API);
        assert_eq!(zarinpal(false).api_base(), ZARINPAL_PRODUCTION_API);
        assert_eq!(zarinpal(false).startpay_base(), ZARINPAL_PRODUCTION_STARTPAY);
    }

    #[test]
    fn overrides_get_trailing_slash() {
        let mut config = zarinpal(true);
        config.api_base_url = Some("http://127.0.0.1:9999/pg/v4/payment".into());
        assert_eq!(config.api_base(), "http://127.0.0.1:9999/pg/v4/payment/");
    }
}
