//! Storage collaborator.
//!
//! The engine never talks to a database directly. Everything it persists goes
//! through [`SyncStore`], whose mutating calls are the atomic sections the
//! coordinator relies on: each one either fully happens or not at all.

mod memory;

pub use memory::MemoryStore;

use crate::{
    entity::{EntityRecord, EntityWrite},
    ledger::{StockCheckpoint, StockMovement, StockState},
    result::OperationResult,
    tracker::SyncCursor,
    EntityId, EntityKind, StoreResult, Timestamp,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// Persistence for one or many businesses.
///
/// Implementations must be safe to share across tasks. Guards on the
/// mutating calls must hold even when several processes share the backend.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Whether the business is known to the CRUD layer.
    async fn business_exists(&self, business_id: &str) -> StoreResult<bool>;

    /// Recorded result for an operation, if any.
    async fn find_result(
        &self,
        business_id: &str,
        op_id: &str,
    ) -> StoreResult<Option<OperationResult>>;

    /// Record a result that has no accompanying mutation.
    ///
    /// # Errors
    /// - `AlreadyRecorded` if the op_id already has a result
    async fn insert_result(&self, business_id: &str, result: &OperationResult) -> StoreResult<()>;

    async fn get_entity(
        &self,
        business_id: &str,
        kind: EntityKind,
        id: &str,
    ) -> StoreResult<Option<EntityRecord>>;

    /// Write an entity and record its result in one atomic step.
    ///
    /// # Errors
    /// - `AlreadyRecorded` if the op_id already has a result
    /// - `VersionConflict` if the stored version does not match `write.expected_version`
    async fn commit_entity(
        &self,
        business_id: &str,
        write: &EntityWrite,
        result: &OperationResult,
    ) -> StoreResult<()>;

    async fn list_entities(
        &self,
        business_id: &str,
        kind: EntityKind,
    ) -> StoreResult<Vec<EntityRecord>>;

    /// Latest checkpoint of a product and every movement after it.
    async fn load_stock(&self, business_id: &str, product_id: &str) -> StoreResult<StockState>;

    /// Append a movement and record its result in one atomic step.
    ///
    /// # Errors
    /// - `AlreadyRecorded` if the op_id already has a result
    /// - `VersionConflict` if `movement.sequence` is not the next in the ledger
    async fn append_movement(
        &self,
        business_id: &str,
        movement: &StockMovement,
        result: &OperationResult,
    ) -> StoreResult<()>;

    /// Store a checkpoint. Older checkpoints than the stored one are ignored.
    async fn save_checkpoint(
        &self,
        business_id: &str,
        checkpoint: &StockCheckpoint,
    ) -> StoreResult<()>;

    /// Up to `limit` movements of a product, newest first.
    async fn movement_history(
        &self,
        business_id: &str,
        product_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<StockMovement>>;

    /// Current quantity of every product that has at least one movement.
    async fn latest_quantities(&self, business_id: &str) -> StoreResult<HashMap<EntityId, i64>>;

    async fn get_cursor(&self, business_id: &str, device_id: &str)
        -> StoreResult<Option<Timestamp>>;

    /// Move a cursor forward. Returns the stored value, which never decreases.
    async fn advance_cursor(
        &self,
        business_id: &str,
        device_id: &str,
        at: Timestamp,
    ) -> StoreResult<Timestamp>;

    async fn list_cursors(&self, business_id: &str) -> StoreResult<Vec<SyncCursor>>;

    /// Entity writes and movements newer than `since` (all when `None`),
    /// skipping those made by `excluding_device`.
    async fn count_changes_since(
        &self,
        business_id: &str,
        since: Option<Timestamp>,
        excluding_device: Option<&str>,
    ) -> StoreResult<u64>;
}
