//! Application startup and lifecycle management.

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::middleware::{
    metrics::metrics_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::handlers;
use crate::middleware::{admin_auth_middleware, auth_middleware};
use crate::services::{
    init_metrics, CommerceStore, JwtService, LogOtpSender, MemoryOtpStore, MemoryStore,
    OrderService, OtpAuthenticator, OtpSender, OtpStore, PaymentGateway, PostgresStore,
    ProfileService, RedisOtpStore, SubscriptionService, ZarinpalClient,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn CommerceStore>,
    pub otp_store: Arc<dyn OtpStore>,
    pub jwt: JwtService,
    pub otp: OtpAuthenticator,
    pub orders: OrderService,
    pub subscriptions: SubscriptionService,
    pub profiles: ProfileService,
}

/// The adapters behind the service ports.
pub struct Dependencies {
    pub store: Arc<dyn CommerceStore>,
    pub otp_store: Arc<dyn OtpStore>,
    pub otp_sender: Arc<dyn OtpSender>,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl Dependencies {
    /// PostgreSQL and Redis when their URLs are configured, in-memory
    /// adapters otherwise.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn CommerceStore> = match &config.database.url {
            Some(url) => Arc::new(
                PostgresStore::connect(url.expose_secret(), config.database.max_connections)
                    .await?,
            ),
            None => {
                tracing::warn!("No database URL configured, using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let otp_store: Arc<dyn OtpStore> = match &config.redis.url {
            Some(url) => Arc::new(RedisOtpStore::new(url.expose_secret()).await?),
            None => {
                tracing::warn!("No Redis URL configured, keeping OTP codes in-process");
                Arc::new(MemoryOtpStore::new())
            }
        };

        let gateway = ZarinpalClient::new(&config.zarinpal)?;
        tracing::info!(sandbox = config.zarinpal.sandbox, "Zarinpal client initialized");

        Ok(Self {
            store,
            otp_store,
            otp_sender: Arc::new(LogOtpSender),
            gateway: Arc::new(gateway),
        })
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let dependencies = Dependencies::from_config(&config).await?;
        Self::build_with(config, dependencies).await
    }

    pub async fn build_with(config: Config, deps: Dependencies) -> anyhow::Result<Self> {
        init_metrics();

        let jwt = JwtService::new(&config.jwt);
        let subscriptions = SubscriptionService::new(deps.store.clone());

        if config.seed_trial_plan {
            let trial = subscriptions.ensure_trial_plan().await?;
            tracing::info!(plan_id = %trial.id, "Trial plan available");
        }

        let state = AppState {
            otp: OtpAuthenticator::new(
                deps.store.clone(),
                deps.otp_store.clone(),
                deps.otp_sender,
                jwt.clone(),
            ),
            orders: OrderService::new(
                deps.store.clone(),
                deps.gateway,
                config.zarinpal.callback_url.clone(),
            ),
            subscriptions,
            profiles: ProfileService::new(deps.store.clone()),
            store: deps.store,
            otp_store: deps.otp_store,
            jwt,
            config: config.clone(),
        };

        let router = router(state);

        let address = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&address).await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        tracing::info!("Listening on port {}", self.port);
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}

fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/orders", post(handlers::orders::create_order))
        .route(
            "/api/v1/orders/user",
            get(handlers::orders::list_user_payments),
        )
        .route(
            "/api/v1/subscriptions",
            get(handlers::subscriptions::list_subscriptions),
        )
        .route(
            "/api/v1/subscriptions/access",
            get(handlers::subscriptions::check_access),
        )
        .route(
            "/api/v1/profile",
            get(handlers::profile::get_profile).patch(handlers::profile::update_profile),
        )
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    let admin = Router::new()
        .route("/api/v1/admin/plans", post(handlers::plans::create_plan))
        .route_layer(from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route("/api/v1/auth/otp", post(handlers::auth::request_otp))
        .route("/api/v1/auth/otp/verify", post(handlers::auth::verify_otp))
        .route(
            "/api/v1/auth/token/refresh",
            post(handlers::auth::refresh_token),
        )
        .route("/api/v1/plans", get(handlers::plans::list_plans))
        .route(
            "/api/v1/payments/callback",
            get(handlers::payments::payment_callback),
        )
        .merge(protected)
        .merge(admin)
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    user_id = tracing::field::Empty,
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
