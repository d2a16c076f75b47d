//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use shopsync_engine::ConflictPolicy;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Which side wins when two devices edit the same entity
    pub conflict_policy: ConflictPolicy,
    /// Whether state lives in PostgreSQL rather than in process memory
    pub persistent: bool,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        conflict_policy: state.coordinator.config().conflict_policy,
        persistent: state.config.database_url.is_some(),
    })
}

async fn root() -> &'static str {
    "ShopSync Server"
}
