//! Persistence ports for users, plans, orders, payments and subscriptions.
//!
//! Writes go through a [`StoreTx`] unit of work: nothing is visible to other
//! callers until `commit`, and dropping the transaction rolls it back.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use uuid::Uuid;

use super::error::ServiceError;
use crate::models::{Order, OrderStatus, Payment, Plan, Profile, Subscription, User};

/// A payment together with the order and plan it pays for.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub payment: Payment,
    pub order: Order,
    pub plan: Plan,
}

#[async_trait]
pub trait CommerceStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;

    async fn list_plans(&self) -> Result<Vec<Plan>, ServiceError>;

    async fn insert_plan(&self, plan: &Plan) -> Result<(), ServiceError>;

    /// The 3-day zero-price plan granted to new users, if the catalog has one.
    async fn find_trial_plan(&self) -> Result<Option<Plan>, ServiceError>;

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, ServiceError>;

    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, ServiceError>;

    async fn list_subscriptions(&self, user_id: Uuid) -> Result<Vec<Subscription>, ServiceError>;

    /// Newest first.
    async fn list_user_payments(&self, user_id: Uuid) -> Result<Vec<PaymentRecord>, ServiceError>;
}

#[async_trait]
pub trait StoreTx: Send {
    /// Returns the user for `phone`, creating it if needed. The flag is
    /// `true` when this call created the row.
    async fn find_or_create_user(&mut self, phone: &str) -> Result<(User, bool), ServiceError>;

    /// Loads the user and holds it until the transaction ends, serialising
    /// concurrent purchases by the same user.
    async fn lock_user(&mut self, user_id: Uuid) -> Result<Option<User>, ServiceError>;

    async fn insert_profile(&mut self, profile: &Profile) -> Result<(), ServiceError>;

    /// Loads the user's profile and holds it until the transaction ends.
    async fn lock_profile(&mut self, user_id: Uuid) -> Result<Option<Profile>, ServiceError>;

    async fn update_profile(&mut self, profile: &Profile) -> Result<(), ServiceError>;

    async fn get_plan(&mut self, plan_id: Uuid) -> Result<Option<Plan>, ServiceError>;

    async fn find_trial_plan(&mut self) -> Result<Option<Plan>, ServiceError>;

    async fn active_subscriptions(&mut self, user_id: Uuid)
        -> Result<Vec<Subscription>, ServiceError>;

    async fn subscription_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Option<Subscription>, ServiceError>;

    async fn insert_subscription(&mut self, subscription: &Subscription)
        -> Result<(), ServiceError>;

    async fn update_subscription(&mut self, subscription: &Subscription)
        -> Result<(), ServiceError>;

    async fn insert_order(&mut self, order: &Order) -> Result<(), ServiceError>;

    async fn get_order(&mut self, order_id: Uuid) -> Result<Option<Order>, ServiceError>;

    async fn set_order_status(
        &mut self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), ServiceError>;

    /// Refuses to write a payment whose amount differs from the plan price.
    async fn insert_payment(&mut self, payment: &Payment, plan: &Plan) -> Result<(), ServiceError>;

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), ServiceError>;

    /// Loads the payment for a gateway authority and locks it until the
    /// transaction ends.
    async fn payment_by_authority(
        &mut self,
        authority: &str,
    ) -> Result<Option<Payment>, ServiceError>;

    async fn commit(self: Box<Self>) -> Result<(), ServiceError>;
}

pub(crate) fn price_mismatch(payment: &Payment, plan: &Plan) -> ServiceError {
    ServiceError::Internal(anyhow::anyhow!(
        "payment {} amount {} does not match plan {} price {}",
        payment.id,
        payment.amount,
        plan.id,
        plan.price
    ))
}
