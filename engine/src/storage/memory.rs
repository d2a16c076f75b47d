//! In-memory [`SyncStore`].
//!
//! Each business sits behind its own mutex, so every trait call is atomic
//! for that business and businesses never contend with each other.

use super::SyncStore;
use crate::{
    entity::{EntityRecord, EntityWrite},
    ledger::{StockCheckpoint, StockMovement, StockState},
    result::OperationResult,
    tracker::SyncCursor,
    BusinessId, DeviceId, EntityId, EntityKind, OpId, StoreError, StoreResult, Timestamp,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct BusinessData {
    results: HashMap<OpId, OperationResult>,
    entities: HashMap<(EntityKind, EntityId), EntityRecord>,
    movements: HashMap<EntityId, Vec<StockMovement>>,
    checkpoints: HashMap<EntityId, StockCheckpoint>,
    cursors: BTreeMap<DeviceId, Timestamp>,
}

impl BusinessData {
    fn ensure_unrecorded(&self, op_id: &str) -> StoreResult<()> {
        if self.results.contains_key(op_id) {
            return Err(StoreError::AlreadyRecorded(op_id.to_string()));
        }
        Ok(())
    }

    fn last_sequence(&self, product_id: &str) -> u64 {
        self.movements
            .get(product_id)
            .and_then(|m| m.last())
            .map(|m| m.sequence)
            .or_else(|| self.checkpoints.get(product_id).map(|c| c.sequence))
            .unwrap_or(0)
    }
}

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    businesses: DashMap<BusinessId, Arc<Mutex<BusinessData>>>,
    failures: AtomicU32,
    cursor_failures: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a business known, as the CRUD layer would on signup.
    pub fn register_business(&self, business_id: impl Into<BusinessId>) {
        self.businesses.entry(business_id.into()).or_default();
    }

    /// Fail the next `count` critical-section writes with `Unavailable`.
    pub fn fail_next_writes(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` cursor advances with `Unavailable`.
    pub fn fail_next_cursor_writes(&self, count: u32) {
        self.cursor_failures.store(count, Ordering::SeqCst);
    }

    /// Number of results recorded for a business.
    pub fn recorded_results(&self, business_id: &str) -> usize {
        self.businesses
            .get(business_id)
            .map(|b| b.lock().results.len())
            .unwrap_or(0)
    }

    fn injected_failure(&self) -> StoreResult<()> {
        Self::take_failure(&self.failures)
    }

    fn take_failure(counter: &AtomicU32) -> StoreResult<()> {
        let took = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match took {
            Ok(_) => Err(StoreError::Unavailable("injected failure".into())),
            Err(_) => Ok(()),
        }
    }

    fn with_business<T>(
        &self,
        business_id: &str,
        f: impl FnOnce(&mut BusinessData) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let data = self
            .businesses
            .get(business_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::Invalid(format!("unknown business '{}'", business_id)))?;
        let mut guard = data.lock();
        f(&mut guard)
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn business_exists(&self, business_id: &str) -> StoreResult<bool> {
        Ok(self.businesses.contains_key(business_id))
    }

    async fn find_result(
        &self,
        business_id: &str,
        op_id: &str,
    ) -> StoreResult<Option<OperationResult>> {
        self.with_business(business_id, |data| Ok(data.results.get(op_id).cloned()))
    }

    async fn insert_result(&self, business_id: &str, result: &OperationResult) -> StoreResult<()> {
        self.injected_failure()?;
        self.with_business(business_id, |data| {
            data.ensure_unrecorded(&result.op_id)?;
            data.results.insert(result.op_id.clone(), result.clone());
            Ok(())
        })
    }

    async fn get_entity(
        &self,
        business_id: &str,
        kind: EntityKind,
        id: &str,
    ) -> StoreResult<Option<EntityRecord>> {
        self.with_business(business_id, |data| {
            Ok(data.entities.get(&(kind, id.to_string())).cloned())
        })
    }

    async fn commit_entity(
        &self,
        business_id: &str,
        write: &EntityWrite,
        result: &OperationResult,
    ) -> StoreResult<()> {
        self.injected_failure()?;
        self.with_business(business_id, |data| {
            data.ensure_unrecorded(&result.op_id)?;

            let key = (write.record.kind, write.record.id.clone());
            let stored = data.entities.get(&key).map(|r| r.version);
            if stored != write.expected_version {
                return Err(StoreError::VersionConflict {
                    key: format!("{}:{}", key.0, key.1),
                    expected: write.expected_version.unwrap_or(0),
                    actual: stored.unwrap_or(0),
                });
            }

            data.entities.insert(key, write.record.clone());
            data.results.insert(result.op_id.clone(), result.clone());
            Ok(())
        })
    }

    async fn list_entities(
        &self,
        business_id: &str,
        kind: EntityKind,
    ) -> StoreResult<Vec<EntityRecord>> {
        self.with_business(business_id, |data| {
            let mut records: Vec<EntityRecord> = data
                .entities
                .values()
                .filter(|r| r.kind == kind)
                .cloned()
                .collect();
            records.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(records)
        })
    }

    async fn load_stock(&self, business_id: &str, product_id: &str) -> StoreResult<StockState> {
        self.with_business(business_id, |data| {
            let checkpoint = data.checkpoints.get(product_id).cloned();
            let after = checkpoint.as_ref().map_or(0, |c| c.sequence);
            let movements = data
                .movements
                .get(product_id)
                .map(|all| {
                    all.iter()
                        .filter(|m| m.sequence > after)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            Ok(StockState {
                checkpoint,
                movements,
            })
        })
    }

    async fn append_movement(
        &self,
        business_id: &str,
        movement: &StockMovement,
        result: &OperationResult,
    ) -> StoreResult<()> {
        self.injected_failure()?;
        self.with_business(business_id, |data| {
            data.ensure_unrecorded(&result.op_id)?;

            let last = data.last_sequence(&movement.product_id);
            if movement.sequence != last + 1 {
                return Err(StoreError::VersionConflict {
                    key: format!("stock:{}", movement.product_id),
                    expected: movement.sequence.saturating_sub(1),
                    actual: last,
                });
            }

            data.movements
                .entry(movement.product_id.clone())
                .or_default()
                .push(movement.clone());
            data.results.insert(result.op_id.clone(), result.clone());
            Ok(())
        })
    }

    async fn save_checkpoint(
        &self,
        business_id: &str,
        checkpoint: &StockCheckpoint,
    ) -> StoreResult<()> {
        self.with_business(business_id, |data| {
            let newer = data
                .checkpoints
                .get(&checkpoint.product_id)
                .map_or(true, |c| c.sequence < checkpoint.sequence);
            if newer {
                data.checkpoints
                    .insert(checkpoint.product_id.clone(), checkpoint.clone());
            }
            Ok(())
        })
    }

    async fn movement_history(
        &self,
        business_id: &str,
        product_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<StockMovement>> {
        self.with_business(business_id, |data| {
            Ok(data
                .movements
                .get(product_id)
                .map(|all| all.iter().rev().take(limit).cloned().collect())
                .unwrap_or_default())
        })
    }

    async fn latest_quantities(&self, business_id: &str) -> StoreResult<HashMap<EntityId, i64>> {
        self.with_business(business_id, |data| {
            Ok(data
                .movements
                .iter()
                .filter_map(|(id, all)| all.last().map(|m| (id.clone(), m.resulting_quantity)))
                .collect())
        })
    }

    async fn get_cursor(
        &self,
        business_id: &str,
        device_id: &str,
    ) -> StoreResult<Option<Timestamp>> {
        self.with_business(business_id, |data| Ok(data.cursors.get(device_id).copied()))
    }

    async fn advance_cursor(
        &self,
        business_id: &str,
        device_id: &str,
        at: Timestamp,
    ) -> StoreResult<Timestamp> {
        Self::take_failure(&self.cursor_failures)?;
        self.with_business(business_id, |data| {
            let cursor = data.cursors.entry(device_id.to_string()).or_insert(at);
            *cursor = (*cursor).max(at);
            Ok(*cursor)
        })
    }

    async fn list_cursors(&self, business_id: &str) -> StoreResult<Vec<SyncCursor>> {
        self.with_business(business_id, |data| {
            Ok(data
                .cursors
                .iter()
                .map(|(device, at)| SyncCursor {
                    business_id: business_id.to_string(),
                    device_id: device.clone(),
                    last_sync_time: *at,
                })
                .collect())
        })
    }

    async fn count_changes_since(
        &self,
        business_id: &str,
        since: Option<Timestamp>,
        excluding_device: Option<&str>,
    ) -> StoreResult<u64> {
        let newer = |at: Timestamp| since.map_or(true, |s| at > s);
        let foreign = |device: &str| excluding_device != Some(device);

        self.with_business(business_id, |data| {
            let entities = data
                .entities
                .values()
                .filter(|r| newer(r.last_modified) && foreign(&r.modified_by))
                .count();
            let movements = data
                .movements
                .values()
                .flatten()
                .filter(|m| newer(m.applied_at) && foreign(&m.device_id))
                .count();
            Ok((entities + movements) as u64)
        })
    }
}
