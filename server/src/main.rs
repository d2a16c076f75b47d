//! ShopSync Server - HTTP front for the offline sync engine.
//!
//! Point-of-sale devices upload batches of operations recorded while
//! offline. This server authenticates the caller, binds the request and
//! hands it to `shopsync-engine`; it holds no sync logic of its own.

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod routes;

use crate::config::Config;
use axum::Router;
use shopsync_engine::{MemoryStore, SyncCoordinator, SyncStore, SystemClock};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SyncCoordinator>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(coordinator: Arc<SyncCoordinator>, config: Config) -> Self {
        Self {
            coordinator,
            config: Arc::new(config),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "shopsync_server=debug,shopsync_engine=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        policy = %config.conflict_policy,
        "Starting ShopSync Server on {}:{}",
        config.host,
        config.port
    );

    let store = build_store(&config).await?;
    let coordinator = SyncCoordinator::with_config(
        store,
        Arc::new(SystemClock::new()),
        config.engine_config(),
    );

    let addr = format!("{}:{}", config.host, config.port);
    let app = build_app(AppState::new(Arc::new(coordinator), config));

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Router with middleware and state attached.
fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// PostgreSQL when `DATABASE_URL` is set, otherwise an in-memory store.
async fn build_store(config: &Config) -> Result<Arc<dyn SyncStore>, Box<dyn std::error::Error>> {
    match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;

            tracing::info!("Running database migrations...");
            db::run_migrations(&pool).await?;

            for business_id in &config.dev_businesses {
                db::ensure_business(&pool, business_id).await?;
            }
            Ok(Arc::new(db::PgStore::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, state will not survive a restart");
            let store = MemoryStore::new();
            for business_id in &config.dev_businesses {
                store.register_business(business_id.as_str());
            }
            Ok(Arc::new(store))
        }
    }
}
