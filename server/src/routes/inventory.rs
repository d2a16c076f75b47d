//! Inventory endpoint routes.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};

use crate::auth::AuthContext;
use crate::error::Result;
use crate::handlers::{
    handle_history, handle_low_stock, HistoryQuery, HistoryResponse, LowStockQuery,
    LowStockResponse,
};
use crate::AppState;

/// Create inventory routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/businesses/{business_id}/inventory/low-stock",
            get(low_stock_handler),
        )
        .route(
            "/api/v1/businesses/{business_id}/inventory/{product_id}/history",
            get(history_handler),
        )
}

/// GET /inventory/low-stock?threshold= - Products at or below a quantity.
async fn low_stock_handler(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(business_id): Path<String>,
    Query(query): Query<LowStockQuery>,
) -> Result<Json<LowStockResponse>> {
    let response = handle_low_stock(&state.coordinator, &business_id, query).await?;
    Ok(Json(response))
}

/// GET /inventory/{product_id}/history?limit= - Movement log, newest first.
async fn history_handler(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path((business_id, product_id)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>> {
    let response = handle_history(&state.coordinator, &business_id, product_id, query).await?;
    Ok(Json(response))
}
