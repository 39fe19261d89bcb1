//! In-process adapter used by tests and database-less local runs.
//!
//! A transaction takes the store lock for its whole lifetime and works on a
//! copy of the state, so concurrent units of work are serialised and an
//! uncommitted transaction leaves no trace.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{price_mismatch, CommerceStore, PaymentRecord, StoreTx};
use crate::models::{
    Order, OrderStatus, Payment, Plan, PlanDuration, Profile, Subscription, SubscriptionStatus,
    User,
};
use crate::services::error::ServiceError;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    /// Keyed by user id.
    profiles: HashMap<Uuid, Profile>,
    plans: HashMap<Uuid, Plan>,
    orders: HashMap<Uuid, Order>,
    payments: HashMap<Uuid, Payment>,
    subscriptions: HashMap<Uuid, Subscription>,
}

impl MemoryState {
    fn trial_plan(&self) -> Option<Plan> {
        self.plans
            .values()
            .filter(|p| p.price == 0 && p.duration_days == PlanDuration::Days3)
            .min_by_key(|p| p.created_at)
            .cloned()
    }

    /// Mirrors the partial unique index on active subscriptions.
    fn check_single_active(&self, candidate: &Subscription) -> Result<(), ServiceError> {
        if candidate.status != SubscriptionStatus::Active {
            return Ok(());
        }
        let clash = self.subscriptions.values().any(|s| {
            s.user_id == candidate.user_id
                && s.id != candidate.id
                && s.status == SubscriptionStatus::Active
        });
        if clash {
            return Err(ServiceError::Conflict(
                "subscription conflicts with an existing record".to_string(),
            ));
        }
        Ok(())
    }

    fn check_unique_authority(&self, payment: &Payment) -> Result<(), ServiceError> {
        let Some(authority) = payment.authority.as_deref() else {
            return Ok(());
        };
        let clash = self
            .payments
            .values()
            .any(|p| p.id != payment.id && p.authority.as_deref() == Some(authority));
        if clash {
            return Err(ServiceError::Conflict(
                "payment conflicts with an existing record".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.values().cloned().collect()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.values().cloned().collect()
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.state
            .lock()
            .await
            .subscriptions
            .values()
            .cloned()
            .collect()
    }

    pub async fn find_user_by_phone(&self, phone: &str) -> Option<User> {
        self.state
            .lock()
            .await
            .users
            .values()
            .find(|u| u.phone == phone)
            .cloned()
    }

    /// Overwrites a subscription row as-is, e.g. to age it in tests.
    pub async fn put_subscription(&self, subscription: Subscription) {
        self.state
            .lock()
            .await
            .subscriptions
            .insert(subscription.id, subscription);
    }
}

#[async_trait]
impl CommerceStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, ServiceError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn list_plans(&self) -> Result<Vec<Plan>, ServiceError> {
        let mut plans: Vec<Plan> = self.state.lock().await.plans.values().cloned().collect();
        plans.sort_by_key(|p| (p.duration_days.days(), p.price));
        Ok(plans)
    }

    async fn insert_plan(&self, plan: &Plan) -> Result<(), ServiceError> {
        self.state.lock().await.plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn find_trial_plan(&self) -> Result<Option<Plan>, ServiceError> {
        Ok(self.state.lock().await.trial_plan())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, ServiceError> {
        Ok(self.state.lock().await.profiles.get(&user_id).cloned())
    }

    async fn list_subscriptions(&self, user_id: Uuid) -> Result<Vec<Subscription>, ServiceError> {
        let mut subscriptions: Vec<Subscription> = self
            .state
            .lock()
            .await
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(subscriptions)
    }

    async fn list_user_payments(&self, user_id: Uuid) -> Result<Vec<PaymentRecord>, ServiceError> {
        let state = self.state.lock().await;
        let mut records = Vec::new();
        for payment in state.payments.values().filter(|p| p.user_id == user_id) {
            let order = state.orders.get(&payment.order_id).cloned().ok_or_else(|| {
                ServiceError::Internal(anyhow::anyhow!("payment {} has no order", payment.id))
            })?;
            let plan = state.plans.get(&order.plan_id).cloned().ok_or_else(|| {
                ServiceError::Internal(anyhow::anyhow!("order {} has no plan", order.id))
            })?;
            records.push(PaymentRecord {
                payment: payment.clone(),
                order,
                plan,
            });
        }
        records.sort_by(|a, b| b.payment.created_at.cmp(&a.payment.created_at));
        Ok(records)
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_or_create_user(&mut self, phone: &str) -> Result<(User, bool), ServiceError> {
        if let Some(user) = self.working.users.values().find(|u| u.phone == phone) {
            return Ok((user.clone(), false));
        }
        let user = User::new(phone);
        self.working.users.insert(user.id, user.clone());
        Ok((user, true))
    }

    async fn lock_user(&mut self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(self.working.users.get(&user_id).cloned())
    }

    async fn insert_profile(&mut self, profile: &Profile) -> Result<(), ServiceError> {
        if self.working.profiles.contains_key(&profile.user_id) {
            return Err(ServiceError::Conflict(
                "profile conflicts with an existing record".to_string(),
            ));
        }
        self.working
            .profiles
            .insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn lock_profile(&mut self, user_id: Uuid) -> Result<Option<Profile>, ServiceError> {
        Ok(self.working.profiles.get(&user_id).cloned())
    }

    async fn update_profile(&mut self, profile: &Profile) -> Result<(), ServiceError> {
        if let Some(existing) = self.working.profiles.get_mut(&profile.user_id) {
            *existing = profile.clone();
        }
        Ok(())
    }

    async fn get_plan(&mut self, plan_id: Uuid) -> Result<Option<Plan>, ServiceError> {
        Ok(self.working.plans.get(&plan_id).cloned())
    }

    async fn find_trial_plan(&mut self) -> Result<Option<Plan>, ServiceError> {
        Ok(self.working.trial_plan())
    }

    async fn active_subscriptions(
        &mut self,
        user_id: Uuid,
    ) -> Result<Vec<Subscription>, ServiceError> {
        Ok(self
            .working
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id && s.status == SubscriptionStatus::Active)
            .cloned()
            .collect())
    }

    async fn subscription_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Option<Subscription>, ServiceError> {
        Ok(self
            .working
            .subscriptions
            .values()
            .find(|s| s.order_id == Some(order_id))
            .cloned())
    }

    async fn insert_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> Result<(), ServiceError> {
        self.working.check_single_active(subscription)?;
        if let Some(order_id) = subscription.order_id {
            if self
                .working
                .subscriptions
                .values()
                .any(|s| s.order_id == Some(order_id))
            {
                return Err(ServiceError::Conflict(
                    "subscription conflicts with an existing record".to_string(),
                ));
            }
        }
        self.working
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn update_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> Result<(), ServiceError> {
        self.working.check_single_active(subscription)?;
        if let Some(existing) = self.working.subscriptions.get_mut(&subscription.id) {
            existing.start_date = subscription.start_date;
            existing.end_date = subscription.end_date;
            existing.status = subscription.status;
            existing.updated_at = subscription.updated_at;
        }
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), ServiceError> {
        self.working.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&mut self, order_id: Uuid) -> Result<Option<Order>, ServiceError> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn set_order_status(
        &mut self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), ServiceError> {
        if let Some(order) = self.working.orders.get_mut(&order_id) {
            order.status = status;
            order.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment, plan: &Plan) -> Result<(), ServiceError> {
        let stored_price = self.working.plans.get(&plan.id).map(|p| p.price);
        if !payment.matches_plan_price(plan) || stored_price != Some(payment.amount) {
            return Err(price_mismatch(payment, plan));
        }
        if self
            .working
            .payments
            .values()
            .any(|p| p.order_id == payment.order_id)
        {
            return Err(ServiceError::Conflict(
                "payment conflicts with an existing record".to_string(),
            ));
        }
        self.working.check_unique_authority(payment)?;
        self.working.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), ServiceError> {
        self.working.check_unique_authority(payment)?;
        self.working.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn payment_by_authority(
        &mut self,
        authority: &str,
    ) -> Result<Option<Payment>, ServiceError> {
        Ok(self
            .working
            .payments
            .values()
            .find(|p| p.authority.as_deref() == Some(authority))
            .cloned())
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
