//! Order creation and payment reconciliation.
//!
//! An order, its payment and the pending subscription it buys are written in
//! one store transaction that also spans the gateway request. The callback
//! later settles all three together.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::error::ServiceError;
use super::gateway::{PaymentGateway, PaymentRequest};
use super::metrics::{record_order_created, record_payment_callback};
use super::store::{CommerceStore, PaymentRecord, StoreTx};
use super::subscriptions::sweep_expired;
use crate::models::{
    ContactSnapshot, Order, OrderStatus, Payment, PaymentStatus, Plan, Subscription,
    SubscriptionStatus, User,
};

/// Everything created by a successful order.
#[derive(Debug, Clone)]
pub struct OrderDetail {
    pub order: Order,
    pub payment: Payment,
    pub plan: Plan,
    pub user: User,
}

/// How a gateway callback was resolved. Only the first two send the user to
/// the success page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Paid,
    AlreadyPaid,
    Failed,
    AlreadyFailed,
    /// Cancelled by the user or malformed; nothing was touched.
    Rejected,
    UnknownAuthority,
    /// Settlement could not be recorded; the payment stays pending.
    Error,
}

impl CallbackOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallbackOutcome::Paid | CallbackOutcome::AlreadyPaid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackOutcome::Paid => "paid",
            CallbackOutcome::AlreadyPaid => "already_paid",
            CallbackOutcome::Failed => "failed",
            CallbackOutcome::AlreadyFailed => "already_failed",
            CallbackOutcome::Rejected => "rejected",
            CallbackOutcome::UnknownAuthority => "unknown_authority",
            CallbackOutcome::Error => "error",
        }
    }
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn CommerceStore>,
    gateway: Arc<dyn PaymentGateway>,
    callback_url: String,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn CommerceStore>,
        gateway: Arc<dyn PaymentGateway>,
        callback_url: String,
    ) -> Self {
        Self {
            store,
            gateway,
            callback_url,
        }
    }

    #[tracing::instrument(skip(self, contact), fields(user_id = %user_id, plan_id = %plan_id))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        contact: ContactSnapshot,
    ) -> Result<OrderDetail, ServiceError> {
        let result = self.create_order_inner(user_id, plan_id, contact).await;
        record_order_created(match &result {
            Ok(_) => "created",
            Err(ServiceError::Conflict(_)) => "conflict",
            Err(ServiceError::Validation(_)) | Err(ServiceError::NotFound(_)) => "rejected",
            Err(ServiceError::Gateway(_)) => "gateway_error",
            Err(_) => "error",
        });
        result
    }

    async fn create_order_inner(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        contact: ContactSnapshot,
    ) -> Result<OrderDetail, ServiceError> {
        let mut tx = self.store.begin().await?;

        let user = tx
            .lock_user(user_id)
            .await?
            .ok_or(ServiceError::NotFound("User"))?;

        let current = sweep_expired(tx.as_mut(), user_id, Utc::now()).await?;
        if !current.is_empty() {
            return Err(ServiceError::Conflict(
                "You already have an active subscription".to_string(),
            ));
        }

        let plan = tx
            .get_plan(plan_id)
            .await?
            .ok_or(ServiceError::NotFound("Plan"))?;
        if plan.is_trial() {
            return Err(ServiceError::Validation(
                "This plan is not available for purchase".to_string(),
            ));
        }

        contact.validate()?;

        let order = Order::new(user.id, plan.id, contact);
        tx.insert_order(&order).await?;

        let mut payment = Payment::for_order(&order, &plan);
        tx.insert_payment(&payment, &plan).await?;

        let initiation = self
            .gateway
            .request_payment(PaymentRequest {
                amount: payment.amount,
                callback_url: self.callback_url.clone(),
                description: format!("Payment for order {}", order.id),
                mobile: Some(order.phone.clone()),
                email: user.email.clone(),
                metadata: None,
            })
            .await
            .map_err(|e| {
                tracing::warn!(order_id = %order.id, error = %e, "Payment request failed, rolling back order");
                e
            })?;

        let authority = initiation.authority.clone();
        payment.authority = Some(initiation.authority);
        payment.payment_url = Some(initiation.payment_url);
        payment.gateway_response = Some(initiation.raw_response);
        payment.updated_at = Utc::now();

        let finish = async {
            tx.update_payment(&payment).await?;
            tx.insert_subscription(&Subscription::pending_for_order(user.id, &plan, order.id))
                .await?;
            tx.commit().await
        };

        if let Err(e) = finish.await {
            tracing::error!(
                authority = %authority,
                order_id = %order.id,
                error = %e,
                "Order rolled back after gateway issued an authority"
            );
            return Err(e);
        }

        tracing::info!(order_id = %order.id, authority = %authority, amount = payment.amount, "Order created");

        Ok(OrderDetail {
            order,
            payment,
            plan,
            user,
        })
    }

    /// Settles the payment behind a gateway callback. Never fails: every
    /// problem is logged and reported as a non-success outcome.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_callback(
        &self,
        authority: Option<&str>,
        status: Option<&str>,
    ) -> CallbackOutcome {
        let outcome = match (authority.filter(|a| !a.is_empty()), status) {
            (Some(authority), Some("OK")) => match self.settle(authority).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(authority = %authority, error = %e, "Payment callback could not be recorded");
                    CallbackOutcome::Error
                }
            },
            _ => CallbackOutcome::Rejected,
        };

        record_payment_callback(outcome.as_str());
        tracing::info!(outcome = outcome.as_str(), "Payment callback handled");
        outcome
    }

    async fn settle(&self, authority: &str) -> Result<CallbackOutcome, ServiceError> {
        let mut tx = self.store.begin().await?;

        let Some(mut payment) = tx.payment_by_authority(authority).await? else {
            tracing::warn!(authority = %authority, "Callback for unknown authority");
            return Ok(CallbackOutcome::UnknownAuthority);
        };

        match payment.status {
            PaymentStatus::Paid => return Ok(CallbackOutcome::AlreadyPaid),
            PaymentStatus::Failed => return Ok(CallbackOutcome::AlreadyFailed),
            PaymentStatus::Pending => {}
        }

        // Settlements for one user run one at a time so activation sees the
        // windows other payments already opened.
        tx.lock_user(payment.user_id)
            .await?
            .ok_or(ServiceError::NotFound("User"))?;

        match self.gateway.verify_payment(authority, payment.amount).await {
            Ok(verification) if verification.is_settled() => {
                payment.mark_paid(verification.ref_id, verification.raw_response);
                self.activate(tx.as_mut(), &payment).await?;
                tx.commit().await?;
                tracing::info!(payment_id = %payment.id, order_id = %payment.order_id, "Payment settled");
                Ok(CallbackOutcome::Paid)
            }
            Ok(verification) => {
                self.fail(tx, payment, Some(verification.raw_response)).await
            }
            Err(e) => {
                tracing::warn!(authority = %authority, error = %e, "Payment verification failed");
                let raw = e.raw_response().cloned();
                self.fail(tx, payment, raw).await
            }
        }
    }

    async fn activate(&self, tx: &mut dyn StoreTx, payment: &Payment) -> Result<(), ServiceError> {
        tx.update_payment(payment).await?;
        tx.set_order_status(payment.order_id, OrderStatus::Completed)
            .await?;

        let order = tx
            .get_order(payment.order_id)
            .await?
            .ok_or(ServiceError::NotFound("Order"))?;
        let plan = tx
            .get_plan(order.plan_id)
            .await?
            .ok_or(ServiceError::NotFound("Plan"))?;

        let now = Utc::now();
        let running = sweep_expired(tx, order.user_id, now).await?;

        // Time left on a running window is added to the paid one.
        let counted_from = running
            .iter()
            .map(|s| s.end_date)
            .max()
            .map_or(now, |end| end.max(now));
        for mut superseded in running {
            superseded.set_status(SubscriptionStatus::Canceled);
            tx.update_subscription(&superseded).await?;
            tracing::info!(subscription_id = %superseded.id, "Subscription superseded by paid order");
        }

        match tx.subscription_for_order(order.id).await? {
            Some(mut subscription) => {
                subscription.activate(&plan, now, counted_from);
                tx.update_subscription(&subscription).await?;
            }
            None => {
                tracing::warn!(order_id = %order.id, "No pending subscription for paid order, creating one");
                let mut subscription = Subscription::pending_for_order(order.user_id, &plan, order.id);
                subscription.activate(&plan, now, counted_from);
                tx.insert_subscription(&subscription).await?;
            }
        }
        Ok(())
    }

    async fn fail(
        &self,
        mut tx: Box<dyn StoreTx>,
        mut payment: Payment,
        raw: Option<serde_json::Value>,
    ) -> Result<CallbackOutcome, ServiceError> {
        payment.mark_failed(raw);
        tx.update_payment(&payment).await?;
        tx.set_order_status(payment.order_id, OrderStatus::Canceled)
            .await?;
        if let Some(mut subscription) = tx.subscription_for_order(payment.order_id).await? {
            if subscription.status == SubscriptionStatus::Pending {
                subscription.set_status(SubscriptionStatus::Canceled);
                tx.update_subscription(&subscription).await?;
            }
        }
        tx.commit().await?;
        tracing::info!(payment_id = %payment.id, order_id = %payment.order_id, "Payment failed");
        Ok(CallbackOutcome::Failed)
    }

    pub async fn list_user_payments(&self, user_id: Uuid) -> Result<Vec<PaymentRecord>, ServiceError> {
        self.store.list_user_payments(user_id).await
    }
}
