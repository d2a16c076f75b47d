//! Sync endpoint routes.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use shopsync_engine::{SyncResponse, SyncStatus};

use crate::auth::AuthContext;
use crate::error::Result;
use crate::handlers::{
    handle_batch, handle_last_sync, handle_status, BatchRequest, LastSyncQuery, LastSyncResponse,
};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/businesses/{business_id}/sync/batch",
            post(batch_handler),
        )
        .route(
            "/api/v1/businesses/{business_id}/sync/status",
            get(status_handler),
        )
        .route(
            "/api/v1/businesses/{business_id}/sync/last-sync",
            get(last_sync_handler),
        )
}

/// POST /sync/batch - Upload a batch of offline operations.
async fn batch_handler(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(business_id): Path<String>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<SyncResponse>> {
    let response = handle_batch(&state.coordinator, auth, business_id, request).await?;
    Ok(Json(response))
}

/// GET /sync/status - Per-device watermarks and pending counts.
async fn status_handler(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(business_id): Path<String>,
) -> Result<Json<SyncStatus>> {
    let status = handle_status(&state.coordinator, &business_id).await?;
    Ok(Json(status))
}

/// GET /sync/last-sync?device_id= - Last completed sync of one device.
async fn last_sync_handler(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(business_id): Path<String>,
    Query(query): Query<LastSyncQuery>,
) -> Result<Json<LastSyncResponse>> {
    let response = handle_last_sync(&state.coordinator, &business_id, query).await?;
    Ok(Json(response))
}
