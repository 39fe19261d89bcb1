//! PostgreSQL adapter.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{price_mismatch, CommerceStore, PaymentRecord, StoreTx};
use crate::models::{Order, OrderStatus, Payment, Plan, Profile, Subscription, User};
use crate::services::error::ServiceError;

const PLAN_COLUMNS: &str = "id, duration_days, price, description, created_at";

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run pending migrations.
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");

        Ok(Self::new(pool))
    }
}

/// Unique-index violations are business conflicts, everything else is a
/// database failure.
fn map_write_error(err: sqlx::Error, what: &str) -> ServiceError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ServiceError::Conflict(format!("{} conflicts with an existing record", what))
        }
        _ => ServiceError::Database(err),
    }
}

#[async_trait]
impl CommerceStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, ServiceError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTx { tx }))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            ServiceError::Database(e)
        })?;
        Ok(())
    }

    async fn list_plans(&self) -> Result<Vec<Plan>, ServiceError> {
        let plans = sqlx::query_as::<_, Plan>(&format!(
            "SELECT {} FROM plans ORDER BY duration_days, price",
            PLAN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(plans)
    }

    async fn insert_plan(&self, plan: &Plan) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO plans (id, duration_days, price, description, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(plan.id)
        .bind(plan.duration_days.days())
        .bind(plan.price)
        .bind(&plan.description)
        .bind(plan.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "plan"))?;
        Ok(())
    }

    async fn find_trial_plan(&self) -> Result<Option<Plan>, ServiceError> {
        let plan = sqlx::query_as::<_, Plan>(&format!(
            "SELECT {} FROM plans WHERE price = 0 AND duration_days = 3 ORDER BY created_at LIMIT 1",
            PLAN_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(plan)
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, ServiceError> {
        let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(profile)
    }

    async fn list_subscriptions(&self, user_id: Uuid) -> Result<Vec<Subscription>, ServiceError> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(subscriptions)
    }

    async fn list_user_payments(&self, user_id: Uuid) -> Result<Vec<PaymentRecord>, ServiceError> {
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(payments.len());
        for payment in payments {
            let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
                .bind(payment.order_id)
                .fetch_one(&self.pool)
                .await?;
            let plan = sqlx::query_as::<_, Plan>(&format!(
                "SELECT {} FROM plans WHERE id = $1",
                PLAN_COLUMNS
            ))
            .bind(order.plan_id)
            .fetch_one(&self.pool)
            .await?;
            records.push(PaymentRecord {
                payment,
                order,
                plan,
            });
        }
        Ok(records)
    }
}

pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PostgresTx {
    async fn find_or_create_user(&mut self, phone: &str) -> Result<(User, bool), ServiceError> {
        let candidate = User::new(phone);
        let inserted = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, phone, email, created_at, updated_at)
            VALUES ($1, $2, NULL, $3, $3)
            ON CONFLICT (phone) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(candidate.id)
        .bind(&candidate.phone)
        .bind(candidate.created_at)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(user) = inserted {
            return Ok((user, true));
        }

        let existing = sqlx::query_as::<_, User>("SELECT * FROM users WHERE phone = $1")
            .bind(phone)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok((existing, false))
    }

    async fn lock_user(&mut self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(user)
    }

    async fn insert_profile(&mut self, profile: &Profile) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO profiles (id, user_id, first_name, last_name, address, postal_code,
                                  national_code, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(profile.id)
        .bind(profile.user_id)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.address)
        .bind(&profile.postal_code)
        .bind(&profile.national_code)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "profile"))?;
        Ok(())
    }

    async fn lock_profile(&mut self, user_id: Uuid) -> Result<Option<Profile>, ServiceError> {
        let profile =
            sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(profile)
    }

    async fn update_profile(&mut self, profile: &Profile) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE profiles
            SET first_name = $2, last_name = $3, address = $4, postal_code = $5,
                national_code = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(profile.id)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.address)
        .bind(&profile.postal_code)
        .bind(&profile.national_code)
        .bind(profile.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_plan(&mut self, plan_id: Uuid) -> Result<Option<Plan>, ServiceError> {
        let plan = sqlx::query_as::<_, Plan>(&format!(
            "SELECT {} FROM plans WHERE id = $1",
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(plan)
    }

    async fn find_trial_plan(&mut self) -> Result<Option<Plan>, ServiceError> {
        let plan = sqlx::query_as::<_, Plan>(&format!(
            "SELECT {} FROM plans WHERE price = 0 AND duration_days = 3 ORDER BY created_at LIMIT 1",
            PLAN_COLUMNS
        ))
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(plan)
    }

    async fn active_subscriptions(
        &mut self,
        user_id: Uuid,
    ) -> Result<Vec<Subscription>, ServiceError> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE user_id = $1 AND status = 'active' FOR UPDATE",
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(subscriptions)
    }

    async fn subscription_for_order(
        &mut self,
        order_id: Uuid,
    ) -> Result<Option<Subscription>, ServiceError> {
        let subscription = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE order_id = $1 FOR UPDATE",
        )
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(subscription)
    }

    async fn insert_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, user_id, plan_id, order_id, start_date, end_date, status, is_trial, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.user_id)
        .bind(subscription.plan_id)
        .bind(subscription.order_id)
        .bind(subscription.start_date)
        .bind(subscription.end_date)
        .bind(subscription.status.as_str())
        .bind(subscription.is_trial)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "subscription"))?;
        Ok(())
    }

    async fn update_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET start_date = $2, end_date = $3, status = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.start_date)
        .bind(subscription.end_date)
        .bind(subscription.status.as_str())
        .bind(subscription.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "subscription"))?;
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO orders
                (id, user_id, plan_id, first_name, last_name, phone, city, address, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.plan_id)
        .bind(&order.first_name)
        .bind(&order.last_name)
        .bind(&order.phone)
        .bind(&order.city)
        .bind(&order.address)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_order(&mut self, order_id: Uuid) -> Result<Option<Order>, ServiceError> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(order)
    }

    async fn set_order_status(
        &mut self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), ServiceError> {
        sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(order_id)
            .bind(status.as_str())
            .bind(Utc::now())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment, plan: &Plan) -> Result<(), ServiceError> {
        if !payment.matches_plan_price(plan) {
            return Err(price_mismatch(payment, plan));
        }

        // The row is only written if the plan's stored price still matches.
        let result = sqlx::query(
            r#"
            INSERT INTO payments
                (id, user_id, order_id, status, amount, authority, ref_id, payment_url,
                 gateway_response, payment_date, created_at, updated_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12
            FROM plans p
            WHERE p.id = $13 AND p.price = $5
            "#,
        )
        .bind(payment.id)
        .bind(payment.user_id)
        .bind(payment.order_id)
        .bind(payment.status.as_str())
        .bind(payment.amount)
        .bind(&payment.authority)
        .bind(&payment.ref_id)
        .bind(&payment.payment_url)
        .bind(&payment.gateway_response)
        .bind(payment.payment_date)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .bind(plan.id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "payment"))?;

        if result.rows_affected() == 0 {
            return Err(price_mismatch(payment, plan));
        }
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, authority = $3, ref_id = $4, payment_url = $5,
                gateway_response = $6, payment_date = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(payment.status.as_str())
        .bind(&payment.authority)
        .bind(&payment.ref_id)
        .bind(&payment.payment_url)
        .bind(&payment.gateway_response)
        .bind(payment.payment_date)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "payment"))?;
        Ok(())
    }

    async fn payment_by_authority(
        &mut self,
        authority: &str,
    ) -> Result<Option<Payment>, ServiceError> {
        let payment =
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE authority = $1 FOR UPDATE")
                .bind(authority)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(payment)
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        self.tx.commit().await?;
        Ok(())
    }
}
