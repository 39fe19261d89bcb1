//! Zarinpal v4 payment provider client.
//!
//! Talks to `request.json` to open a payment and `verify.json` to settle it
//! once the user comes back through the callback.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use super::gateway::{
    GatewayError, PaymentGateway, PaymentInitiation, PaymentRequest, PaymentVerification,
};
use crate::config::ZarinpalConfig;

const CURRENCY: &str = "IRT";
const REQUEST_OK: i64 = 100;

#[derive(Clone)]
pub struct ZarinpalClient {
    client: Client,
    merchant_id: String,
    api_base: String,
    startpay_base: String,
}

#[derive(Debug, Serialize)]
struct RequestBody<'a> {
    merchant_id: &'a str,
    amount: i64,
    callback_url: &'a str,
    description: &'a str,
    currency: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mobile: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Value>,
}

#[derive(Debug, Serialize)]
struct VerifyBody<'a> {
    merchant_id: &'a str,
    amount: i64,
    authority: &'a str,
}

impl ZarinpalClient {
    pub fn new(config: &ZarinpalConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            merchant_id: config.merchant_id.clone(),
            api_base: config.api_base(),
            startpay_base: config.startpay_base(),
        })
    }

    /// POST a JSON body and decode the reply regardless of HTTP status;
    /// the provider reports refusals in the body.
    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.api_base, path);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        tracing::debug!(status = %status, path, "Zarinpal response received");

        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Ok(value),
            Err(_) if !status.is_success() => Err(GatewayError::Network(format!(
                "unexpected HTTP status {}",
                status
            ))),
            Err(e) => Err(GatewayError::Upstream {
                code: None,
                message: format!("undecodable gateway response: {}", e),
                raw_response: None,
            }),
        }
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Network(err.to_string())
    }
}

/// `data` is an object on success and an empty array on failure.
fn data_code(body: &Value) -> Option<i64> {
    body.get("data")
        .and_then(|d| d.get("code"))
        .and_then(Value::as_i64)
}

fn error_code(body: &Value) -> Option<i64> {
    body.get("errors")
        .and_then(|e| e.get("code"))
        .and_then(Value::as_i64)
}

fn error_message(body: &Value, fallback: &str) -> String {
    body.get("errors")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

/// `ref_id` arrives as a number; it is kept as text.
fn ref_id(body: &Value) -> Option<String> {
    match body.get("data").and_then(|d| d.get("ref_id")) {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[async_trait]
impl PaymentGateway for ZarinpalClient {
    #[tracing::instrument(skip(self, request), fields(amount = request.amount))]
    async fn request_payment(
        &self,
        request: PaymentRequest,
    ) -> Result<PaymentInitiation, GatewayError> {
        let body = RequestBody {
            merchant_id: &self.merchant_id,
            amount: request.amount,
            callback_url: &request.callback_url,
            description: &request.description,
            currency: CURRENCY,
            mobile: request.mobile.as_deref(),
            email: request.email.as_deref(),
            metadata: request.metadata.as_ref(),
        };

        let response = self.post("request.json", &body).await?;

        let code = data_code(&response);
        let authority = response
            .get("data")
            .and_then(|d| d.get("authority"))
            .and_then(Value::as_str)
            .map(str::to_string);

        match (code, authority) {
            (Some(REQUEST_OK), Some(authority)) => {
                tracing::info!(authority = %authority, "Zarinpal payment requested");
                Ok(PaymentInitiation {
                    payment_url: format!("{}{}", self.startpay_base, authority),
                    authority,
                    raw_response: response,
                })
            }
            (code, _) => {
                let code = code.or_else(|| error_code(&response));
                let message = error_message(&response, "Payment request failed");
                tracing::warn!(code = ?code, message = %message, "Zarinpal payment request rejected");
                Err(GatewayError::Upstream {
                    code,
                    message,
                    raw_response: Some(response),
                })
            }
        }
    }

    #[tracing::instrument(skip(self), fields(authority = %authority))]
    async fn verify_payment(
        &self,
        authority: &str,
        amount: i64,
    ) -> Result<PaymentVerification, GatewayError> {
        let body = VerifyBody {
            merchant_id: &self.merchant_id,
            amount,
            authority,
        };

        let response = self.post("verify.json", &body).await?;

        let Some(code) = data_code(&response) else {
            let code = error_code(&response);
            let message = error_message(&response, "Payment verification failed");
            tracing::warn!(code = ?code, message = %message, "Zarinpal verification rejected");
            return Err(GatewayError::Upstream {
                code,
                message,
                raw_response: Some(response),
            });
        };

        let verification = PaymentVerification {
            code,
            ref_id: ref_id(&response),
            raw_response: response,
        };

        if verification.is_settled() {
            tracing::info!(code, ref_id = ?verification.ref_id, "Zarinpal payment verified");
            Ok(verification)
        } else {
            tracing::warn!(code, "Zarinpal verification returned unsettled code");
            Err(GatewayError::Upstream {
                code: Some(code),
                message: error_message(&verification.raw_response, "Payment not settled"),
                raw_response: Some(verification.raw_response),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, timeout_seconds: u64) -> ZarinpalClient {
        let config = ZarinpalConfig {
            merchant_id: "test-merchant".into(),
            sandbox: true,
            timeout_seconds,
            callback_url: "http://localhost/api/v1/payments/callback".into(),
            api_base_url: Some(format!("{}/pg/v4/payment", server.uri())),
            startpay_base_url: Some("https://sandbox.zarinpal.com/pg/StartPay".into()),
        };
        ZarinpalClient::new(&config).unwrap()
    }

    fn payment_request(amount: i64) -> PaymentRequest {
        PaymentRequest {
            amount,
            callback_url: "http://localhost/api/v1/payments/callback".into(),
            description: "Payment for order 1".into(),
            mobile: Some("09123456789".into()),
            email: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn request_payment_builds_startpay_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pg/v4/payment/request.json"))
            .and(body_partial_json(json!({
                "merchant_id": "test-merchant",
                "amount": 50000,
                "currency": "IRT",
                "mobile": "09123456789"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"code": 100, "message": "Success", "authority": "A1", "fee": 0},
                "errors": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let initiation = client_for(&server, 5)
            .request_payment(payment_request(50000))
            .await
            .unwrap();

        assert_eq!(initiation.authority, "A1");
        assert_eq!(
            initiation.payment_url,
            "https://sandbox.zarinpal.com/pg/StartPay/A1"
        );
        assert_eq!(initiation.raw_response["data"]["code"], 100);
    }

    #[tokio::test]
    async fn request_payment_surfaces_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pg/v4/payment/request.json"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "data": [],
                "errors": {"code": -9, "message": "The input params invalid, validation error.", "validations": []}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server, 5)
            .request_payment(payment_request(10))
            .await
            .unwrap_err();

        match err {
            GatewayError::Upstream { code, message, .. } => {
                assert_eq!(code, Some(-9));
                assert_eq!(message, "The input params invalid, validation error.");
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_json_error_status_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pg/v4/payment/request.json"))
            .respond_with(ResponseTemplate::new(503).set_body_string("<html>down</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server, 5)
            .request_payment(payment_request(50000))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Network(_)));
    }

    #[tokio::test]
    async fn slow_gateway_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_json(json!({"data": {"code": 100, "authority": "A1"}})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server, 1)
            .request_payment(payment_request(50000))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Timeout));
    }

    #[tokio::test]
    async fn verify_accepts_already_verified_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pg/v4/payment/verify.json"))
            .and(body_partial_json(json!({"authority": "A1", "amount": 50000})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"code": 101, "message": "Verified", "ref_id": 201, "card_pan": "502229******5995"},
                "errors": []
            })))
            .mount(&server)
            .await;

        let verification = client_for(&server, 5)
            .verify_payment("A1", 50000)
            .await
            .unwrap();

        assert!(verification.is_settled());
        assert_eq!(verification.ref_id.as_deref(), Some("201"));
    }

    #[tokio::test]
    async fn verify_rejects_unsettled_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pg/v4/payment/verify.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"code": -51, "message": "Session is not valid"},
                "errors": []
            })))
            .mount(&server)
            .await;

        let err = client_for(&server, 5)
            .verify_payment("A1", 50000)
            .await
            .unwrap_err();

        match err {
            GatewayError::Upstream {
                code, raw_response, ..
            } => {
                assert_eq!(code, Some(-51));
                assert!(raw_response.is_some());
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
    }
}
