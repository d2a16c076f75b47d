//! Per-device sync watermarks and pending counts.

use crate::{storage::SyncStore, BusinessId, DeviceId, StoreResult, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Last successful sync of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub business_id: BusinessId,
    pub device_id: DeviceId,
    pub last_sync_time: Timestamp,
}

/// What one device has not pulled yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSyncStatus {
    pub last_sync_time: Option<Timestamp>,
    /// Changes by other devices since `last_sync_time`
    pub pending_count: u64,
}

/// Sync overview of a business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub business_id: BusinessId,
    pub devices: BTreeMap<DeviceId, DeviceSyncStatus>,
    /// Pending count for a device that has never synced
    pub unsynced_pending_count: u64,
    pub server_time: Timestamp,
}

/// Reads and advances sync cursors.
pub struct SyncStatusTracker {
    store: Arc<dyn SyncStore>,
}

impl SyncStatusTracker {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    /// Advance a device's cursor after a completed batch.
    pub async fn record_batch(
        &self,
        business_id: &str,
        device_id: &str,
        received_at: Timestamp,
    ) -> StoreResult<Timestamp> {
        self.store
            .advance_cursor(business_id, device_id, received_at)
            .await
    }

    pub async fn last_sync(
        &self,
        business_id: &str,
        device_id: &str,
    ) -> StoreResult<Option<Timestamp>> {
        self.store.get_cursor(business_id, device_id).await
    }

    /// Status of one device, known or not.
    pub async fn device_status(
        &self,
        business_id: &str,
        device_id: &str,
    ) -> StoreResult<DeviceSyncStatus> {
        let last_sync_time = self.store.get_cursor(business_id, device_id).await?;
        let pending_count = self
            .store
            .count_changes_since(business_id, last_sync_time, Some(device_id))
            .await?;
        Ok(DeviceSyncStatus {
            last_sync_time,
            pending_count,
        })
    }

    pub async fn status(&self, business_id: &str, now: Timestamp) -> StoreResult<SyncStatus> {
        let cursors = self.store.list_cursors(business_id).await?;

        let mut devices = BTreeMap::new();
        for cursor in cursors {
            let pending_count = self
                .store
                .count_changes_since(
                    business_id,
                    Some(cursor.last_sync_time),
                    Some(&cursor.device_id),
                )
                .await?;
            devices.insert(
                cursor.device_id,
                DeviceSyncStatus {
                    last_sync_time: Some(cursor.last_sync_time),
                    pending_count,
                },
            );
        }

        let unsynced_pending_count = self
            .store
            .count_changes_since(business_id, None, None)
            .await?;

        Ok(SyncStatus {
            business_id: business_id.to_string(),
            devices,
            unsynced_pending_count,
            server_time: now,
        })
    }
}
