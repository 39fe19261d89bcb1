//! Runs the PostgreSQL adapter against a real database. Set
//! `TEST_DATABASE_URL` to enable; without it every test returns early.

use async_trait::async_trait;
use commerce_service::models::{
    ContactSnapshot, Order, Payment, Plan, PlanDuration, Subscription, SubscriptionStatus,
};
use commerce_service::services::gateway::{
    GatewayError, PaymentGateway, PaymentInitiation, PaymentRequest, PaymentVerification,
};
use commerce_service::services::store::StoreTx;
use commerce_service::services::{
    CallbackOutcome, CommerceStore, OrderService, PostgresStore, ServiceError,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

struct TestDb {
    store: PostgresStore,
    pool: PgPool,
}

async fn test_db() -> Option<TestDb> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping PostgreSQL test");
        return None;
    };
    let store = PostgresStore::connect(&url, 5)
        .await
        .expect("Failed to connect and migrate test database");
    let pool = PgPool::connect(&url)
        .await
        .expect("Failed to open inspection pool");
    Some(TestDb { store, pool })
}

fn random_phone() -> String {
    format!("09{:09}", rand::random::<u32>() % 1_000_000_000)
}

fn contact() -> ContactSnapshot {
    ContactSnapshot {
        first_name: "Sara".into(),
        last_name: "Ahmadi".into(),
        phone: "09123456789".into(),
        city: "Tehran".into(),
        address: "Valiasr St".into(),
    }
}

async fn new_user(store: &PostgresStore) -> Uuid {
    let mut tx = store.begin().await.unwrap();
    let (user, created) = tx.find_or_create_user(&random_phone()).await.unwrap();
    assert!(created);
    tx.commit().await.unwrap();
    user.id
}

async fn new_plan(store: &PostgresStore, price: i64) -> Plan {
    let plan = Plan::new(PlanDuration::Days30, price, Some("Monthly".into()));
    store.insert_plan(&plan).await.unwrap();
    plan
}

/// Issues a fresh authority per request and settles every verification.
struct ScriptedGateway {
    refuse_requests: bool,
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn request_payment(
        &self,
        _request: PaymentRequest,
    ) -> Result<PaymentInitiation, GatewayError> {
        if self.refuse_requests {
            return Err(GatewayError::Upstream {
                code: Some(-9),
                message: "The input params invalid".into(),
                raw_response: None,
            });
        }
        let authority = format!("PG{}", Uuid::new_v4().simple());
        Ok(PaymentInitiation {
            payment_url: format!("https://sandbox.zarinpal.com/pg/StartPay/{}", authority),
            raw_response: json!({"data": {"code": 100, "authority": authority}}),
            authority,
        })
    }

    async fn verify_payment(
        &self,
        _authority: &str,
        _amount: i64,
    ) -> Result<PaymentVerification, GatewayError> {
        Ok(PaymentVerification {
            code: 100,
            ref_id: Some("201".into()),
            raw_response: json!({"data": {"code": 100, "ref_id": 201}}),
        })
    }
}

async fn count(pool: &PgPool, table: &str, user_id: Uuid) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM {} WHERE user_id = $1",
        table
    ))
    .bind(user_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn payment_is_refused_when_stored_price_differs() {
    let Some(db) = test_db().await else { return };
    let user_id = new_user(&db.store).await;
    let plan = new_plan(&db.store, 50_000).await;

    // The caller's copy of the plan is stale; only the stored price counts.
    let mut stale = plan.clone();
    stale.price = 40_000;

    let mut tx = db.store.begin().await.unwrap();
    let order = Order::new(user_id, plan.id, contact());
    tx.insert_order(&order).await.unwrap();
    let payment = Payment::for_order(&order, &stale);
    assert_eq!(payment.amount, 40_000);

    let err = tx.insert_payment(&payment, &stale).await.unwrap_err();
    assert!(matches!(err, ServiceError::Internal(_)));
    drop(tx);

    assert_eq!(count(&db.pool, "orders", user_id).await, 0);
    assert_eq!(count(&db.pool, "payments", user_id).await, 0);
}

#[tokio::test]
async fn second_active_subscription_is_a_conflict() {
    let Some(db) = test_db().await else { return };
    let user_id = new_user(&db.store).await;
    let plan = new_plan(&db.store, 50_000).await;

    let mut tx = db.store.begin().await.unwrap();
    tx.insert_subscription(&Subscription::trial(user_id, &plan))
        .await
        .unwrap();
    let err = tx
        .insert_subscription(&Subscription::trial(user_id, &plan))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
}

#[tokio::test]
async fn gateway_refusal_rolls_the_order_back() {
    let Some(db) = test_db().await else { return };
    let user_id = new_user(&db.store).await;
    let plan = new_plan(&db.store, 50_000).await;

    let orders = OrderService::new(
        Arc::new(db.store.clone()),
        Arc::new(ScriptedGateway {
            refuse_requests: true,
        }),
        "http://localhost/api/v1/payments/callback".into(),
    );

    let err = orders
        .create_order(user_id, plan.id, contact())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Gateway(GatewayError::Upstream { .. })));

    assert_eq!(count(&db.pool, "orders", user_id).await, 0);
    assert_eq!(count(&db.pool, "payments", user_id).await, 0);
    assert_eq!(count(&db.pool, "subscriptions", user_id).await, 0);
}

#[tokio::test]
async fn concurrent_settlements_for_one_user_keep_one_active_window() {
    let Some(db) = test_db().await else { return };
    let user_id = new_user(&db.store).await;
    let plan = new_plan(&db.store, 50_000).await;

    let orders = OrderService::new(
        Arc::new(db.store.clone()),
        Arc::new(ScriptedGateway {
            refuse_requests: false,
        }),
        "http://localhost/api/v1/payments/callback".into(),
    );

    let first = orders.create_order(user_id, plan.id, contact()).await.unwrap();
    let second = orders.create_order(user_id, plan.id, contact()).await.unwrap();
    let first_authority = first.payment.authority.unwrap();
    let second_authority = second.payment.authority.unwrap();

    let (a, b, replay) = tokio::join!(
        orders.reconcile_callback(Some(&first_authority), Some("OK")),
        orders.reconcile_callback(Some(&second_authority), Some("OK")),
        orders.reconcile_callback(Some(&first_authority), Some("OK")),
    );
    assert!(a.is_success() && b.is_success() && replay.is_success());
    assert!([a, replay].contains(&CallbackOutcome::Paid));
    assert!([a, replay].contains(&CallbackOutcome::AlreadyPaid));
    assert_eq!(b, CallbackOutcome::Paid);

    let active = db
        .store
        .list_subscriptions(user_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|s| s.status == SubscriptionStatus::Active)
        .count();
    assert_eq!(active, 1);
}
