use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created alongside an order, waiting for its payment.
    Pending,
    Active,
    Expired,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Canceled => "canceled",
        }
    }
}

impl TryFrom<String> for SubscriptionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(SubscriptionStatus::Pending),
            "active" => Ok(SubscriptionStatus::Active),
            "expired" => Ok(SubscriptionStatus::Expired),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            other => Err(format!("unknown subscription status '{}'", other)),
        }
    }
}

/// A user's access window on a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    /// Order that paid for this subscription; `None` for trials.
    pub order_id: Option<Uuid>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub status: SubscriptionStatus,
    pub is_trial: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Free trial window starting now.
    pub fn trial(user_id: Uuid, plan: &Plan) -> Self {
        Self::build(user_id, plan, None, SubscriptionStatus::Active, true)
    }

    /// Placeholder for a paid order; activated once the payment settles.
    pub fn pending_for_order(user_id: Uuid, plan: &Plan, order_id: Uuid) -> Self {
        Self::build(user_id, plan, Some(order_id), SubscriptionStatus::Pending, false)
    }

    fn build(
        user_id: Uuid,
        plan: &Plan,
        order_id: Option<Uuid>,
        status: SubscriptionStatus,
        is_trial: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan_id: plan.id,
            order_id,
            start_date: now,
            end_date: plan.window_end(now),
            status,
            is_trial,
            created_at: now,
            updated_at: now,
        }
    }

    /// Active and not yet past its end date.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.end_date > now
    }

    /// Flip to active from `starts_at`. The plan's length is counted from
    /// `counted_from`, which lies after `starts_at` when unused time of a
    /// replaced subscription carries over.
    pub fn activate(&mut self, plan: &Plan, starts_at: DateTime<Utc>, counted_from: DateTime<Utc>) {
        self.status = SubscriptionStatus::Active;
        self.start_date = starts_at;
        self.end_date = plan.window_end(counted_from.max(starts_at));
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: SubscriptionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
