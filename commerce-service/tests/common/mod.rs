#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use commerce_service::config::{
    AdminConfig, Config, DatabaseConfig, JwtConfig, RedirectConfig, RedisConfig, ServerConfig,
    ZarinpalConfig,
};
use commerce_service::models::{Plan, PlanDuration, SubscriptionStatus};
use commerce_service::services::{
    CommerceStore, MemoryOtpStore, MemoryStore, OtpSender, ZarinpalClient,
};
use commerce_service::{Application, Dependencies};
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PHONE: &str = "09123456789";
pub const SUCCESS_URL: &str = "http://frontend.test/payment/success";
pub const FAILURE_URL: &str = "http://frontend.test/payment/failed";
pub const ADMIN_KEY: &str = "integration-admin-key";

/// Keeps every dispatched code so tests can log in.
#[derive(Default)]
pub struct CapturingSender {
    codes: Mutex<Vec<(String, String)>>,
}

impl CapturingSender {
    pub fn last_code_for(&self, phone: &str) -> Option<String> {
        self.codes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| p == phone)
            .map(|(_, code)| code.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.codes.lock().unwrap().len()
    }
}

#[async_trait]
impl OtpSender for CapturingSender {
    async fn send(&self, phone: &str, code: &str) -> Result<(), anyhow::Error> {
        self.codes
            .lock()
            .unwrap()
            .push((phone.to_string(), code.to_string()));
        Ok(())
    }
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: Client,
    pub store: MemoryStore,
    pub otp_store: Arc<MemoryOtpStore>,
    pub sender: Arc<CapturingSender>,
    pub gateway: MockServer,
}

pub struct LoggedIn {
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let gateway = MockServer::start().await;

        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            jwt: JwtConfig {
                secret: Secret::new("integration-test-secret".to_string()),
                access_token_expiry_minutes: 15,
                refresh_token_expiry_days: 7,
            },
            zarinpal: ZarinpalConfig {
                merchant_id: "test-merchant".to_string(),
                sandbox: true,
                timeout_seconds: 2,
                callback_url: "http://127.0.0.1/api/v1/payments/callback".to_string(),
                api_base_url: Some(format!("{}/pg/v4/payment/", gateway.uri())),
                startpay_base_url: Some("https://sandbox.zarinpal.com/pg/StartPay/".to_string()),
            },
            redirects: RedirectConfig {
                success_url: SUCCESS_URL.to_string(),
                failure_url: FAILURE_URL.to_string(),
            },
            admin: AdminConfig {
                api_key: Some(Secret::new(ADMIN_KEY.to_string())),
            },
            seed_trial_plan: true,
            log_level: "warn".to_string(),
            otlp_endpoint: None,
            service_name: "commerce-service-test".to_string(),
        };

        let store = MemoryStore::new();
        let otp_store = Arc::new(MemoryOtpStore::new());
        let sender = Arc::new(CapturingSender::default());
        let zarinpal =
            ZarinpalClient::new(&config.zarinpal).expect("Failed to build gateway client");

        let dependencies = Dependencies {
            store: Arc::new(store.clone()),
            otp_store: otp_store.clone(),
            otp_sender: sender.clone(),
            gateway: Arc::new(zarinpal),
        };

        let app = Application::build_with(config, dependencies)
            .await
            .expect("Failed to build test application");
        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = Client::builder()
            .redirect(Policy::none())
            .build()
            .expect("Failed to build HTTP client");

        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            client,
            store,
            otp_store,
            sender,
            gateway,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn request_otp(&self, phone: &str) -> Response {
        self.client
            .post(self.url("/api/v1/auth/otp"))
            .json(&json!({ "phone": phone }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn verify_otp(&self, phone: &str, otp: &str) -> Response {
        self.client
            .post(self.url("/api/v1/auth/otp/verify"))
            .json(&json!({ "phone": phone, "otp": otp }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Runs the full OTP exchange for `phone`.
    pub async fn login(&self, phone: &str) -> LoggedIn {
        let response = self.request_otp(phone).await;
        assert_eq!(response.status().as_u16(), 200);

        let code = self
            .sender
            .last_code_for(phone)
            .expect("No OTP dispatched");
        let body: Value = self
            .verify_otp(phone, &code)
            .await
            .json()
            .await
            .expect("Failed to parse login response");

        LoggedIn {
            user_id: body["user_id"]
                .as_str()
                .and_then(|id| Uuid::parse_str(id).ok())
                .expect("Missing user_id"),
            access_token: body["access_token"].as_str().unwrap().to_string(),
            refresh_token: body["refresh_token"].as_str().unwrap().to_string(),
        }
    }

    /// Ends every active subscription of the user an hour ago.
    pub async fn expire_subscriptions(&self, user_id: Uuid) {
        for mut subscription in self.store.subscriptions().await {
            if subscription.user_id == user_id && subscription.status == SubscriptionStatus::Active
            {
                subscription.start_date = Utc::now() - Duration::days(4);
                subscription.end_date = Utc::now() - Duration::hours(1);
                self.store.put_subscription(subscription).await;
            }
        }
    }

    pub async fn add_plan(&self, duration: PlanDuration, price: i64) -> Plan {
        let plan = Plan::new(duration, price, Some(format!("{} days", duration.days())));
        self.store
            .insert_plan(&plan)
            .await
            .expect("Failed to insert plan");
        plan
    }

    pub async fn mock_payment_request(&self, authority: &str) {
        Mock::given(method("POST"))
            .and(path("/pg/v4/payment/request.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"code": 100, "message": "Success", "authority": authority, "fee_type": "Merchant", "fee": 0},
                "errors": []
            })))
            .mount(&self.gateway)
            .await;
    }

    pub async fn mock_payment_request_error(&self, status: u16, code: i64, message: &str) {
        Mock::given(method("POST"))
            .and(path("/pg/v4/payment/request.json"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "data": [],
                "errors": {"code": code, "message": message, "validations": []}
            })))
            .mount(&self.gateway)
            .await;
    }

    pub async fn mock_verify(&self, code: i64) {
        Mock::given(method("POST"))
            .and(path("/pg/v4/payment/verify.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"code": code, "message": "Verified", "ref_id": 201, "card_pan": "502229******5995", "fee": 0},
                "errors": []
            })))
            .mount(&self.gateway)
            .await;
    }

    pub async fn create_order(&self, token: &str, plan_id: Uuid) -> Response {
        self.client
            .post(self.url("/api/v1/orders"))
            .bearer_auth(token)
            .json(&json!({
                "plan_id": plan_id,
                "first_name": "Sara",
                "last_name": "Ahmadi",
                "phone": PHONE,
                "city": "Tehran",
                "address": "Valiasr St, No. 12"
            }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn callback(&self, authority: &str, status: &str) -> Response {
        self.client
            .get(self.url(&format!(
                "/api/v1/payments/callback?Authority={}&Status={}",
                authority, status
            )))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_authed(&self, path: &str, token: &str) -> Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn patch_profile(&self, token: &str, body: Value) -> Response {
        self.client
            .patch(self.url("/api/v1/profile"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_admin_plan(&self, admin_key: Option<&str>, body: Value) -> Response {
        let mut request = self.client.post(self.url("/api/v1/admin/plans")).json(&body);
        if let Some(key) = admin_key {
            request = request.header("x-admin-api-key", key);
        }
        request.send().await.expect("Failed to execute request")
    }

    /// Number of verify calls the mock gateway has received.
    pub async fn verify_calls(&self) -> usize {
        self.gateway
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path().ends_with("verify.json"))
            .count()
    }
}
