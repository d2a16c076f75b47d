//! Inventory handlers - read-only views over the stock ledger.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use shopsync_engine::{StockLevel, StockMovement, SyncCoordinator};

/// Query parameters for the low-stock report.
#[derive(Debug, Deserialize)]
pub struct LowStockQuery {
    /// Defaults to 0
    pub threshold: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct LowStockResponse {
    pub threshold: i64,
    pub products: Vec<StockLevel>,
}

/// Query parameters for movement history.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub product_id: String,
    pub quantity: i64,
    /// Newest first
    pub movements: Vec<StockMovement>,
}

pub async fn handle_low_stock(
    coordinator: &SyncCoordinator,
    business_id: &str,
    query: LowStockQuery,
) -> Result<LowStockResponse> {
    let threshold = query.threshold.unwrap_or(0);
    let products = coordinator.low_stock(business_id, Some(threshold)).await?;
    Ok(LowStockResponse {
        threshold,
        products,
    })
}

/// Movement history of one product together with its current quantity.
pub async fn handle_history(
    coordinator: &SyncCoordinator,
    business_id: &str,
    product_id: String,
    query: HistoryQuery,
) -> Result<HistoryResponse> {
    let movements = coordinator
        .stock_history(business_id, &product_id, query.limit)
        .await?;
    let quantity = coordinator.stock_quantity(business_id, &product_id).await?;
    Ok(HistoryResponse {
        product_id,
        quantity,
        movements,
    })
}
