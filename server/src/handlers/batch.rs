//! Batch handler - hands uploaded operations to the sync engine.

use crate::auth::AuthContext;
use crate::error::Result;
use serde::Deserialize;
use shopsync_engine::{BatchContext, SyncBatch, SyncCoordinator, SyncOperation, SyncResponse};

/// Request body for a batch upload. The business comes from the path.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    /// Uploading device; may be omitted when `X-Device-Id` is sent
    #[serde(default)]
    pub device_id: String,
    /// Operations in local commit order
    #[serde(default)]
    pub operations: Vec<SyncOperation>,
}

/// Process one batch upload.
pub async fn handle_batch(
    coordinator: &SyncCoordinator,
    auth: AuthContext,
    business_id: String,
    request: BatchRequest,
) -> Result<SyncResponse> {
    let device_id = auth
        .device_id
        .unwrap_or_else(|| request.device_id.clone());

    tracing::debug!(
        business_id = %business_id,
        device_id = %device_id,
        user_id = %auth.user_id,
        operations = request.operations.len(),
        "Batch received"
    );

    let ctx = BatchContext::new(business_id.clone(), device_id, auth.user_id);
    let batch = SyncBatch::new(business_id, request.device_id, request.operations);

    Ok(coordinator.process_batch(&ctx, batch).await?)
}
