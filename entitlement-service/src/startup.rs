//! Application startup and lifecycle management.

use crate::config::{EntitlementConfig, StorageBackend};
use crate::handlers;
use crate::services::{
    init_metrics, Clock, CoinPurchaseHandler, EntitlementEvaluator, EntitlementStore,
    GatewayClient, MemoryStore, MockPaymentProvider, PaymentProvider, PgStore,
    SubscriptionManager, SystemClock, UnlockHandler,
};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{http_metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntitlementStore>,
    pub evaluator: EntitlementEvaluator,
    pub unlocks: UnlockHandler,
    pub coins: CoinPurchaseHandler,
    pub subscriptions: SubscriptionManager,
}

impl AppState {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        provider: Arc<dyn PaymentProvider>,
        clock: Arc<dyn Clock>,
        currency: &str,
    ) -> Self {
        Self {
            evaluator: EntitlementEvaluator::new(store.clone(), clock.clone()),
            unlocks: UnlockHandler::new(store.clone(), clock.clone()),
            coins: CoinPurchaseHandler::new(
                store.clone(),
                provider.clone(),
                clock.clone(),
                currency,
            ),
            subscriptions: SubscriptionManager::new(store.clone(), provider, clock, currency),
            store,
        }
    }
}

/// HTTP routes with request id, metrics, and tracing layers.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/account", get(handlers::account::get_account))
        .route("/transactions", get(handlers::account::list_transactions))
        .route("/unlocks", get(handlers::account::list_unlocks))
        .route(
            "/chapters/:chapter_id/access",
            get(handlers::chapters::check_access),
        )
        .route(
            "/chapters/:chapter_id/unlock",
            post(handlers::chapters::unlock_chapter),
        )
        .route("/coins/invoices", post(handlers::coins::create_invoice))
        .route(
            "/coins/invoices/:invoice_id/confirm",
            post(handlers::coins::confirm_invoice),
        )
        .route("/plans", get(handlers::subscriptions::list_plans))
        .route(
            "/subscriptions",
            get(handlers::subscriptions::list_subscriptions)
                .post(handlers::subscriptions::create_subscription),
        )
        .route(
            "/subscriptions/current",
            get(handlers::subscriptions::current_subscription),
        )
        .route(
            "/subscriptions/:subscription_id",
            get(handlers::subscriptions::get_subscription),
        )
        .route(
            "/subscriptions/:subscription_id/verify",
            post(handlers::subscriptions::verify_payment),
        )
        .route(
            "/subscriptions/:subscription_id/cancel",
            post(handlers::subscriptions::cancel_subscription),
        );

    let internal = Router::new()
        .route(
            "/catalog/chapters/:chapter_id",
            put(handlers::catalog::upsert_chapter),
        )
        .route("/catalog/plans/:plan_id", put(handlers::catalog::upsert_plan))
        .route("/coins/credits", post(handlers::coins::credit_coins));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics_handler))
        .nest("/v1", api)
        .nest("/internal", internal)
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
                    uri = %request.uri(),
                    user_id = tracing::field::Empty,
                )
            }),
        )
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: EntitlementConfig) -> Result<Self, AppError> {
        init_metrics();

        let store = Self::build_store(&config).await?;
        let provider = Self::build_provider(&config)?;
        let state = AppState::new(store, provider, Arc::new(SystemClock), &config.currency);

        let addr = config.common.bind_address();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Entitlement service listener bound");

        Ok(Self {
            http_port,
            listener,
            state,
        })
    }

    async fn build_store(config: &EntitlementConfig) -> Result<Arc<dyn EntitlementStore>, AppError> {
        match (config.storage, &config.database) {
            (StorageBackend::Memory, _) => {
                tracing::warn!("Using in-memory store; data is lost on restart");
                Ok(Arc::new(MemoryStore::new()))
            }
            (StorageBackend::Postgres, Some(database)) => {
                let store = PgStore::connect(
                    &database.url,
                    database.max_connections,
                    database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    AppError::from(e)
                })?;

                store.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    AppError::from(e)
                })?;

                Ok(Arc::new(store))
            }
            (StorageBackend::Postgres, None) => Err(AppError::ConfigError(anyhow::anyhow!(
                "postgres storage selected without database settings"
            ))),
        }
    }

    fn build_provider(config: &EntitlementConfig) -> Result<Arc<dyn PaymentProvider>, AppError> {
        match &config.payment_gateway {
            Some(gateway) => {
                let client = GatewayClient::new(gateway.clone())
                    .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
                tracing::info!(base_url = %gateway.base_url, "Payment gateway client initialized");
                Ok(Arc::new(client))
            }
            None => {
                tracing::warn!(
                    "PAYMENT_GATEWAY_URL not set - using mock payment provider, invoices are never paid"
                );
                Ok(Arc::new(MockPaymentProvider::new()))
            }
        }
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let app = router(self.state);

        tracing::info!(
            service = "entitlement-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, app).await
    }
}
