//! Status handlers - sync watermarks per device.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use shopsync_engine::{SyncCoordinator, SyncStatus, Timestamp};

/// Query parameters for the last-sync lookup.
#[derive(Debug, Deserialize)]
pub struct LastSyncQuery {
    pub device_id: Option<String>,
}

/// Response for the last-sync lookup.
#[derive(Debug, Serialize)]
pub struct LastSyncResponse {
    pub device_id: String,
    /// `null` if the device never completed a sync
    pub last_sync: Option<Timestamp>,
}

pub async fn handle_status(coordinator: &SyncCoordinator, business_id: &str) -> Result<SyncStatus> {
    Ok(coordinator.sync_status(business_id).await?)
}

/// Look up when a device last synced.
pub async fn handle_last_sync(
    coordinator: &SyncCoordinator,
    business_id: &str,
    query: LastSyncQuery,
) -> Result<LastSyncResponse> {
    let device_id = query
        .device_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("device_id is required".to_string()))?;

    let last_sync = coordinator.last_sync(business_id, &device_id).await?;
    Ok(LastSyncResponse {
        device_id,
        last_sync,
    })
}
