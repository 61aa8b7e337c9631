//! # coursectl: course checkout and enrollment service
//!
//! `coursectl` sells courses on a learning platform. It prices a course (optionally with a
//! discount code), hands the learner to a hosted payment page, and turns the confirmed payment
//! into exactly one enrollment, one completed order and at most one discount redemption, no
//! matter how many times or in which order the confirmations arrive.
//!
//! ## Architecture
//!
//! The service is an [Axum](https://github.com/tokio-rs/axum) application backed by PostgreSQL.
//!
//! ### Purchase Flow
//!
//! 1. `POST /api/v1/payments/checkout` validates the discount code ([`discounts`]), computes the
//!    price ([`pricing`]), records a PENDING order and creates a checkout session with the
//!    configured payment provider ([`payment_providers`]). Purchases that cost nothing are
//!    enrolled on the spot.
//! 2. The learner's browser comes back through `POST /api/v1/payments/verify-session`, and the
//!    provider independently calls `POST /webhooks/payments`. Both paths authenticate the payment
//!    with the provider and call the single idempotent [`reconciler::reconcile`].
//! 3. A background [`sweeper`] cancels PENDING orders nobody paid for.
//!
//! ### Core Components
//!
//! The **API layer** ([`api`]) holds the HTTP handlers and wire models. The **authentication
//! layer** ([`auth`]) verifies session JWTs issued by the platform's identity service. The
//! **database layer** ([`db`]) uses the repository pattern over `sqlx`; idempotency is enforced
//! by unique constraints and conditional updates rather than in-process locks, so any number of
//! replicas can run side by side.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use coursectl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = coursectl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     coursectl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod discounts;
pub mod errors;
mod openapi;
pub mod payment_providers;
pub mod pricing;
pub mod reconciler;
pub mod sweeper;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use crate::{
    config::{CorsOrigin, PoolSettings},
    openapi::ApiDoc,
    payment_providers::PaymentProvider,
    sweeper::OrderSweeper,
};
use axum::http::HeaderValue;
use axum::{
    Router, http,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use types::{CourseId, Money, OrderId, UserId};

/// Application state shared across all request handlers.
///
/// - `db`: the process-wide PostgreSQL pool
/// - `config`: application configuration
/// - `payment_provider`: the configured payment gateway, if any. Free purchases work without one.
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .maybe_payment_provider(provider)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub payment_provider: Option<Arc<dyn PaymentProvider>>,
}

/// Get the coursectl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

fn pool_options(settings: &PoolSettings) -> PgPoolOptions {
    let optional = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(optional(settings.idle_timeout_secs))
        .max_lifetime(optional(settings.max_lifetime_secs))
}

/// Connect to the database and bring the schema up to date
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    info!("Connecting to database");
    let pool = pool_options(&config.database.pool).connect(&config.database.url).await?;
    migrator().run(&pool).await?;
    Ok(pool)
}

/// Create CORS layer from configuration
///
/// A wildcard entry allows any origin; tower-http rejects `*` inside an explicit origin list.
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allow_origin = if config
        .auth
        .cors
        .allowed_origins
        .iter()
        .any(|origin| matches!(origin, CorsOrigin::Wildcard))
    {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.auth.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_credentials(config.auth.cors.allow_credentials);

    if let Some(max_age) = config.auth.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// - Learner API under `/api/v1`
/// - Payment provider webhook at `/webhooks/payments` (signature-authenticated, no session)
/// - OpenAPI document and docs UI
/// - Optional Prometheus metrics at `/internal/metrics`
/// - CORS and request tracing
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        .route("/payments/checkout", post(api::handlers::payments::checkout))
        .route("/payments/verify-session", post(api::handlers::payments::verify_session))
        .route("/discounts", post(api::handlers::discounts::create_discount_code))
        .route("/discounts/validate", post(api::handlers::discounts::validate_discount_code))
        .route("/orders/{id}", get(api::handlers::orders::get_order))
        .route("/enrollments", get(api::handlers::enrollments::list_my_enrollments));

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        // Webhook routes (called by the payment provider, not by learners)
        .route("/webhooks/payments", post(api::handlers::payments::webhook))
        .nest("/api/v1", api_routes)
        .with_state(state.clone())
        .route("/api-docs/openapi.json", get(|| async { axum::Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Background tasks running alongside the HTTP server.
///
/// Dropping this without calling [`shutdown`](BackgroundServices::shutdown) still signals the
/// tasks to stop through the drop guard.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Start the stale order sweeper if enabled
fn setup_background_services(pool: PgPool, config: &Config, shutdown_token: CancellationToken) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    let sweeper_config = config.background_services.order_sweeper.clone();
    if sweeper_config.enabled {
        let sweeper = OrderSweeper::new(pool, sweeper_config);
        background_tasks.push(tokio::spawn(sweeper.run(shutdown_token.clone())));
    } else {
        info!("Stale order sweeper disabled by configuration");
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] connects to the database, runs migrations, builds the
///    payment provider and starts background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests
/// 3. **Shutdown**: when the shutdown future resolves, background tasks are stopped and the pool
///    is closed
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::new_with_pool(config, None).await
    }

    /// Create an application on an existing pool (migrations are still applied), or connect to
    /// the configured database when `pool` is `None`.
    pub async fn new_with_pool(config: Config, pool: Option<PgPool>) -> anyhow::Result<Self> {
        debug!("Starting coursectl with configuration: {:#?}", config);
        config.validate()?;

        let pool = match pool {
            Some(pool) => {
                migrator().run(&pool).await?;
                pool
            }
            None => setup_database(&config).await?,
        };

        let payment_provider = match config.payment.clone() {
            Some(payment_config) => {
                let provider = payment_providers::create_provider(payment_config)?;
                info!(currency = provider.currency(), "Payment provider configured");
                Some(provider)
            }
            None => {
                info!("No payment provider configured; only free purchases are available");
                None
            }
        };

        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .maybe_payment_provider(payment_provider)
            .build();

        let router = build_router(&app_state)?;

        let shutdown_token = CancellationToken::new();
        let bg_services = setup_background_services(pool.clone(), &config, shutdown_token);

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("coursectl listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::test_utils::*;
    use serde_json::Value;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_healthz(pool: PgPool) {
        let (server, _bg) = create_test_app(pool).await;
        let response = server.get("/healthz").await;
        response.assert_status_ok();
        response.assert_text("OK");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_openapi_document_is_served(pool: PgPool) {
        let (server, _bg) = create_test_app(pool).await;
        let response = server.get("/api-docs/openapi.json").await;
        response.assert_status_ok();
        let doc: Value = response.json();
        assert!(doc["paths"]["/api/v1/payments/checkout"].is_object());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_route_is_404(pool: PgPool) {
        let (server, _bg) = create_test_app(pool).await;
        server.get("/api/v1/nope").await.assert_status_not_found();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_background_services_shut_down(pool: PgPool) {
        let mut config = create_test_config();
        config.background_services.order_sweeper.enabled = true;
        let app = crate::Application::new_with_pool(config, Some(pool)).await.unwrap();
        let (_server, bg) = app.into_test_server();

        tokio::time::timeout(std::time::Duration::from_secs(5), bg.shutdown())
            .await
            .expect("background services did not stop");
    }

    #[test]
    fn test_cors_layer_accepts_configured_origins() {
        let mut config = create_test_config();
        config.auth.cors.allowed_origins = vec![crate::config::CorsOrigin::Url(
            url::Url::parse("https://learn.example.com").unwrap(),
        )];
        config.auth.cors.allow_credentials = true;
        assert!(super::create_cors_layer(&config).is_ok());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_default_cors_config_builds_router(pool: PgPool) {
        let config = crate::Config {
            secret_key: Some("test-secret-key-for-session-tokens".to_string()),
            enable_metrics: false,
            ..Default::default()
        };
        assert!(matches!(
            config.auth.cors.allowed_origins.as_slice(),
            [crate::config::CorsOrigin::Wildcard]
        ));

        let state = crate::AppState::builder().db(pool).config(config).build();
        let router = crate::build_router(&state).expect("default config must produce a router");
        let server = axum_test::TestServer::new(router.into_make_service()).unwrap();

        let response = server
            .get("/healthz")
            .add_header("origin", "https://anywhere.example.com")
            .await;
        response.assert_status_ok();
        assert_eq!(response.header("access-control-allow-origin"), "*");
    }
}
