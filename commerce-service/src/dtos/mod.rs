use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    ContactSnapshot, Order, OrderStatus, Payment, PaymentStatus, Plan, Subscription,
    SubscriptionStatus, User,
};
use crate::services::profile::ProfileDetail;
use crate::services::jwt::TokenPair;
use crate::services::orders::OrderDetail;
use crate::services::store::PaymentRecord;

#[derive(Debug, Deserialize)]
pub struct SendOtpRequest {
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub phone: String,
    pub otp: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub phone: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl LoginResponse {
    pub fn new(user: User, tokens: TokenPair) -> Self {
        Self {
            user_id: user.id,
            phone: user.phone,
            email: user.email,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: tokens.token_type,
            expires_in: tokens.expires_in,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub plan_id: Uuid,
    #[serde(flatten)]
    pub contact: ContactSnapshot,
}

/// Catalog entry posted by an operator.
#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub duration_days: i32,
    pub price: i64,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub id: Uuid,
    pub duration_days: i32,
    pub price: i64,
    pub description: Option<String>,
    pub is_trial: bool,
}

impl From<Plan> for PlanResponse {
    fn from(plan: Plan) -> Self {
        Self {
            id: plan.id,
            duration_days: plan.duration_days.days(),
            is_trial: plan.is_trial(),
            price: plan.price,
            description: plan.description,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub status: PaymentStatus,
    pub amount: i64,
    pub authority: Option<String>,
    pub payment_url: Option<String>,
    pub gateway_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id,
            status: payment.status,
            amount: payment.amount,
            authority: payment.authority,
            payment_url: payment.payment_url,
            gateway_response: payment.gateway_response,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub phone: String,
    pub email: Option<String>,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            phone: user.phone,
            email: user.email,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub user: UserSummary,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub national_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProfileDetail> for ProfileResponse {
    fn from(detail: ProfileDetail) -> Self {
        let ProfileDetail { profile, user } = detail;
        Self {
            id: profile.id,
            user: user.into(),
            first_name: profile.first_name,
            last_name: profile.last_name,
            address: profile.address,
            postal_code: profile.postal_code,
            national_code: profile.national_code,
            created_at: profile.created_at,
            updated_at: profile.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub payment: PaymentResponse,
    pub plan: PlanResponse,
    pub user: UserSummary,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrderDetail> for OrderResponse {
    fn from(detail: OrderDetail) -> Self {
        let Order {
            id,
            first_name,
            last_name,
            phone,
            city,
            address,
            status,
            created_at,
            updated_at,
            ..
        } = detail.order;
        Self {
            id,
            payment: detail.payment.into(),
            plan: detail.plan.into(),
            user: detail.user.into(),
            first_name,
            last_name,
            phone,
            address,
            city,
            status,
            created_at,
            updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderSummary {
    pub id: Uuid,
    pub plan: PlanResponse,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub city: String,
    pub address: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// One entry of the caller's payment history.
#[derive(Debug, Serialize)]
pub struct UserPaymentResponse {
    pub id: Uuid,
    pub status: PaymentStatus,
    pub amount: i64,
    pub ref_id: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
    pub order: OrderSummary,
}

impl From<PaymentRecord> for UserPaymentResponse {
    fn from(record: PaymentRecord) -> Self {
        let PaymentRecord {
            payment,
            order,
            plan,
        } = record;
        Self {
            id: payment.id,
            status: payment.status,
            amount: payment.amount,
            ref_id: payment.ref_id,
            payment_date: payment.payment_date,
            order: OrderSummary {
                id: order.id,
                plan: plan.into(),
                first_name: order.first_name,
                last_name: order.last_name,
                phone: order.phone,
                city: order.city,
                address: order.address,
                status: order.status,
                created_at: order.created_at,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub order_id: Option<Uuid>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: SubscriptionStatus,
    pub is_trial: bool,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(subscription: Subscription) -> Self {
        Self {
            id: subscription.id,
            plan_id: subscription.plan_id,
            order_id: subscription.order_id,
            start_date: subscription.start_date,
            end_date: subscription.end_date,
            status: subscription.status,
            is_trial: subscription.is_trial,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub active: bool,
}

/// Query string the gateway appends to the callback URL.
#[derive(Debug, Deserialize)]
pub struct PaymentCallbackQuery {
    #[serde(rename = "Authority")]
    pub authority: Option<String>,
    #[serde(rename = "Status")]
    pub status: Option<String>,
}
