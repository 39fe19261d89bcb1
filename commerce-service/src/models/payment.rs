use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Order, Plan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl TryFrom<String> for PaymentStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PAID" => Ok(PaymentStatus::Paid),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// The single payment attempt attached to an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: PaymentStatus,
    pub amount: i64,
    /// Gateway transaction handle, unique per initiation.
    pub authority: Option<String>,
    /// Gateway settlement reference, only present once paid.
    pub ref_id: Option<String>,
    pub payment_url: Option<String>,
    /// Last gateway response, kept verbatim.
    pub gateway_response: Option<serde_json::Value>,
    pub payment_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// New pending payment charging the plan's price.
    pub fn for_order(order: &Order, plan: &Plan) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: order.user_id,
            order_id: order.id,
            status: PaymentStatus::Pending,
            amount: plan.price,
            authority: None,
            ref_id: None,
            payment_url: None,
            gateway_response: None,
            payment_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Checked by every store before a payment row is written.
    pub fn matches_plan_price(&self, plan: &Plan) -> bool {
        self.amount == plan.price
    }

    pub fn mark_paid(&mut self, ref_id: Option<String>, raw: serde_json::Value) {
        let now = Utc::now();
        self.status = PaymentStatus::Paid;
        self.ref_id = ref_id;
        self.payment_date = Some(now);
        self.gateway_response = Some(raw);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, raw: Option<serde_json::Value>) {
        self.status = PaymentStatus::Failed;
        if raw.is_some() {
            self.gateway_response = raw;
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContactSnapshot, PlanDuration};
    use serde_json::json;

    fn order_for(plan: &Plan) -> Order {
        Order::new(
            Uuid::new_v4(),
            plan.id,
            ContactSnapshot {
                first_name: "Sara".into(),
                last_name: "Ahmadi".into(),
                phone: "09123456789".into(),
                city: "Tehran".into(),
                address: "Valiasr St".into(),
            },
        )
    }

    #[test]
    fn amount_is_taken_from_plan() {
        let plan = Plan::new(PlanDuration::Days30, 50_000, None);
        let payment = Payment::for_order(&order_for(&plan), &plan);

        assert_eq!(payment.amount, 50_000);
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.matches_plan_price(&plan));

        let cheaper = Plan::new(PlanDuration::Days30, 40_000, None);
        assert!(!payment.matches_plan_price(&cheaper));
    }

    #[test]
    fn payment_date_is_only_set_when_paid() {
        let plan = Plan::new(PlanDuration::Days30, 50_000, None);
        let mut payment = Payment::for_order(&order_for(&plan), &plan);

        payment.mark_failed(None);
        assert!(payment.payment_date.is_none());

        payment.mark_paid(Some("201".into()), json!({"data": {"code": 100}}));
        assert!(payment.payment_date.is_some());
        assert_eq!(payment.ref_id.as_deref(), Some("201"));
    }
}
