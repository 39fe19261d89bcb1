//! Plan catalog and the subscription access gate.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::error::ServiceError;
use super::store::{CommerceStore, StoreTx};
use crate::models::{Plan, PlanDuration, Subscription, SubscriptionStatus};

/// Flips the user's lapsed active subscriptions to expired inside `tx` and
/// returns the ones still running.
pub(crate) async fn sweep_expired(
    tx: &mut dyn StoreTx,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<Subscription>, ServiceError> {
    let mut current = Vec::new();
    for mut subscription in tx.active_subscriptions(user_id).await? {
        if subscription.is_current(now) {
            current.push(subscription);
        } else {
            subscription.set_status(SubscriptionStatus::Expired);
            tx.update_subscription(&subscription).await?;
            tracing::info!(
                subscription_id = %subscription.id,
                user_id = %user_id,
                "Subscription expired"
            );
        }
    }
    Ok(current)
}

/// Grants the catalog's trial plan to a freshly created user. No-op when the
/// catalog has no trial plan.
pub(crate) async fn grant_trial(
    tx: &mut dyn StoreTx,
    user_id: Uuid,
) -> Result<Option<Subscription>, ServiceError> {
    let Some(plan) = tx.find_trial_plan().await? else {
        tracing::warn!(user_id = %user_id, "No trial plan in catalog, skipping trial grant");
        return Ok(None);
    };
    let trial = Subscription::trial(user_id, &plan);
    tx.insert_subscription(&trial).await?;
    tracing::info!(user_id = %user_id, subscription_id = %trial.id, "Trial subscription granted");
    Ok(Some(trial))
}

#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn CommerceStore>,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn CommerceStore>) -> Self {
        Self { store }
    }

    /// Lazily expires stale rows, then grants access if any active
    /// subscription still has time left.
    #[tracing::instrument(skip(self))]
    pub async fn has_active_subscription(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        let mut tx = self.store.begin().await?;
        let current = sweep_expired(tx.as_mut(), user_id, Utc::now()).await?;
        tx.commit().await?;
        Ok(!current.is_empty())
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Subscription>, ServiceError> {
        self.store.list_subscriptions(user_id).await
    }

    pub async fn list_plans(&self) -> Result<Vec<Plan>, ServiceError> {
        self.store.list_plans().await
    }

    #[tracing::instrument(skip(self, description))]
    pub async fn create_plan(
        &self,
        duration_days: i32,
        price: i64,
        description: Option<String>,
    ) -> Result<Plan, ServiceError> {
        let duration = PlanDuration::try_from(duration_days).map_err(ServiceError::Validation)?;
        if price < 0 {
            return Err(ServiceError::Validation(
                "plan price must not be negative".to_string(),
            ));
        }

        let plan = Plan::new(duration, price, description);
        self.store.insert_plan(&plan).await?;
        tracing::info!(plan_id = %plan.id, days = duration_days, price, "Plan created");
        Ok(plan)
    }

    /// Makes sure the catalog has the free 3-day plan new users receive.
    pub async fn ensure_trial_plan(&self) -> Result<Plan, ServiceError> {
        if let Some(plan) = self.store.find_trial_plan().await? {
            return Ok(plan);
        }
        self.create_plan(
            PlanDuration::Days3.days(),
            0,
            Some("Free trial".to_string()),
        )
        .await
    }
}
