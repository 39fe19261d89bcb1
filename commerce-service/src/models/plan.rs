//! Sellable subscription plans.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The fixed set of plan lengths on sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum PlanDuration {
    Days3,
    Days30,
    Days90,
    Days180,
    Days360,
}

impl PlanDuration {
    pub fn days(&self) -> i32 {
        match self {
            PlanDuration::Days3 => 3,
            PlanDuration::Days30 => 30,
            PlanDuration::Days90 => 90,
            PlanDuration::Days180 => 180,
            PlanDuration::Days360 => 360,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::days(i64::from(self.days()))
    }
}

impl TryFrom<i32> for PlanDuration {
    type Error = String;

    fn try_from(days: i32) -> Result<Self, Self::Error> {
        match days {
            3 => Ok(PlanDuration::Days3),
            30 => Ok(PlanDuration::Days30),
            90 => Ok(PlanDuration::Days90),
            180 => Ok(PlanDuration::Days180),
            360 => Ok(PlanDuration::Days360),
            other => Err(format!(
                "unsupported plan duration {} (expected 3, 30, 90, 180 or 360 days)",
                other
            )),
        }
    }
}

impl From<PlanDuration> for i32 {
    fn from(duration: PlanDuration) -> Self {
        duration.days()
    }
}

/// Catalog entry. Price is in the smallest currency unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: Uuid,
    #[sqlx(try_from = "i32")]
    pub duration_days: PlanDuration,
    pub price: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(duration_days: PlanDuration, price: i64, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            duration_days,
            price,
            description,
            created_at: Utc::now(),
        }
    }

    /// Zero-price plans are granted on registration and cannot be bought.
    pub fn is_trial(&self) -> bool {
        self.price == 0
    }

    /// End of a window of this plan's length starting at `start`.
    pub fn window_end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start + self.duration_days.as_duration()
    }
}
