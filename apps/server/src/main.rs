mod alert_layer;
mod auth;
mod availability;
mod booking;
mod catalog;
mod config;
mod coupons;
mod db;
mod error;
mod handlers;
mod models;
mod payment;
mod price_sync;
mod pricing;
mod rate_limit;
mod store;
mod sweeper;
mod upstream;

#[cfg(test)]
mod testing;

use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use availability::AvailabilityEngine;
use booking::BookingLifecycle;
use catalog::FieldCatalog;
use config::Config;
use error::AppError;
use payment::PaymentReconciler;
use price_sync::{PriceSync, RetryPolicy};
use rate_limit::{rate_limit, RateLimiter, Tier};
use store::{SqliteStore, Store};
use sweeper::TimeoutSweeper;
use upstream::{Notifier, PaymentGateway, SchedulingApi};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub config: Config,
    pub db: SqlitePool,
    pub store: Arc<dyn Store>,
    pub catalog: Arc<FieldCatalog>,
    pub availability: AvailabilityEngine,
    pub lifecycle: Arc<BookingLifecycle>,
    pub payments: PaymentReconciler,
    pub sweeper: Arc<TimeoutSweeper>,
    pub started_at: Instant,
}

/// The systems of record this service talks to.
pub struct Upstreams {
    pub scheduler: Arc<dyn SchedulingApi>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    /// Wires every component over one store and one set of upstreams.
    pub async fn assemble(config: Config, db: SqlitePool, upstreams: Upstreams) -> Result<Self, AppError> {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(db.clone()));
        let catalog = Arc::new(FieldCatalog::load(store.as_ref()).await?);

        let availability = AvailabilityEngine::new(
            catalog.clone(),
            upstreams.scheduler.clone(),
            config.venue_offset,
            config.opening_minute(),
            config.closing_minute(),
        );
        let price_sync = PriceSync::new(
            upstreams.scheduler.clone(),
            RetryPolicy {
                max_attempts: config.price_sync_max_attempts,
                base_delay: config.price_sync_base_delay,
            },
        );
        let lifecycle = Arc::new(BookingLifecycle::new(
            store.clone(),
            catalog.clone(),
            upstreams.scheduler,
            upstreams.notifier,
            price_sync,
            config.payment_window,
            config.venue_offset,
        ));
        let payments = PaymentReconciler::new(store.clone(), upstreams.gateway, lifecycle.clone(), &config);
        let sweeper = Arc::new(TimeoutSweeper::new(store.clone(), lifecycle.clone()));

        Ok(Self {
            config,
            db,
            store,
            catalog,
            availability,
            lifecycle,
            payments,
            sweeper,
            started_at: Instant::now(),
        })
    }
}

/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

pub fn build_router(state: Arc<AppState>, limiter: RateLimiter) -> Router {
    // 1. No limit: health checks + payment webhooks
    let no_limit_routes = Router::new()
        .route("/api/health", get(handlers::health::health))
        .route("/api/payments/webhook", post(handlers::payment::payment_webhook));

    // 2. Public: read-only lookups
    let public_routes = Router::new()
        .route("/api/fields", get(handlers::client::list_fields))
        .route("/api/availability", get(handlers::client::availability))
        .route("/api/price", get(handlers::client::quote))
        .layer(from_fn_with_state((limiter.clone(), Tier::Public), rate_limit));

    // 3. Booking writes: strictest limit
    let booking_routes = Router::new()
        .route("/api/bookings", post(handlers::client::create_booking))
        .route("/api/bookings/{id}/cancel", post(handlers::client::cancel_booking))
        .layer(from_fn_with_state((limiter.clone(), Tier::Booking), rate_limit));

    // 4. Authenticated customer endpoints
    let account_routes = Router::new()
        .route("/api/bookings/{id}", get(handlers::client::get_booking))
        .route("/api/coupons", get(handlers::client::my_coupons))
        .route("/api/campaigns/{id}/collect", post(handlers::client::collect_coupon))
        .route("/api/payments/intent", post(handlers::payment::create_intent))
        .layer(from_fn_with_state((limiter.clone(), Tier::Account), rate_limit));

    // 5. Staff
    let staff_routes = Router::new()
        .route("/api/admin/bookings/cancel", post(handlers::admin::cancel_booking))
        .route("/api/admin/bookings/{id}/confirm", post(handlers::admin::confirm_booking))
        .route("/api/admin/sweep", post(handlers::admin::sweep))
        .layer(from_fn_with_state((limiter, Tier::Staff), rate_limit));

    let cors = match state.config.webapp_url.as_deref().map(str::parse::<HeaderValue>) {
        Some(Ok(origin)) => CorsLayer::new()
            .allow_origin(AllowOrigin::list([origin, HeaderValue::from_static("http://localhost:5173")]))
            .allow_methods(Any)
            .allow_headers(Any),
        Some(Err(_)) => {
            tracing::warn!("WEBAPP_URL is not a valid origin, allowing any");
            CorsLayer::permissive()
        }
        None => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .merge(account_routes)
        .merge(staff_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    // ── Tracing: console + operator alerts on LINE ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    if !config.line_channel_token.is_empty() && !config.ops_line_target.is_empty() {
        let alerts = alert_layer::OpsAlertLayer::new(
            config.line_channel_token.clone(),
            config.ops_line_target.clone(),
        );
        registry.with(alerts).init();
    } else {
        registry.init();
    }
    config.warn_missing();

    // ── Database ──
    let pool = db::connect(&config.database_url, 5).await?;
    db::run_migrations(&pool).await?;

    // ── Upstreams ──
    let upstreams = Upstreams {
        scheduler: Arc::new(upstream::scheduling::HttpScheduler::new(
            &config.scheduler_api_url,
            config.scheduler_api_token.clone(),
        )?),
        gateway: Arc::new(upstream::stripe::StripeGateway::new(config.stripe_secret_key.clone())),
        notifier: Arc::new(upstream::line::LineNotifier::new(config.line_channel_token.clone())),
    };

    let addr = format!("{}:{}", config.host, config.port);
    let sweep_every = config.sweep_interval;
    let state = Arc::new(AppState::assemble(config, pool, upstreams).await?);

    // ── Background task: expire unpaid bookings ──
    tokio::spawn(state.sweeper.clone().run(sweep_every));

    // ── Background task: cleanup stale rate limit entries ──
    let limiter = RateLimiter::new();
    let cleanup_limiter = limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup(Instant::now());
        }
    });

    let app = build_router(state, limiter);

    tracing::info!("Field booking server starting on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
