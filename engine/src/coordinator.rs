//! Batch orchestration.
//!
//! [`SyncCoordinator::process_batch`] is the single entry point for device
//! uploads. For each operation it runs one critical section under the
//! entity's lock:
//!
//! 1. replay a recorded result if the op_id was seen before
//! 2. validate the payload
//! 3. hand the command to the ledger or the resolver
//! 4. record the result, atomically with any mutation
//!
//! Operations on different entities run concurrently. Operations on the same
//! entity run in batch order.

use crate::{
    clock::{Clock, SystemClock},
    config::EngineConfig,
    entity::EntityRecord,
    idempotency::IdempotencyStore,
    ledger::{InventoryLedger, StockLevel, StockMovement},
    locks::EntityLocks,
    resolver::{ConflictResolver, Resolution},
    result::{ErrorKind, OperationResult, Outcome, SyncResponse},
    schema::Schema,
    storage::SyncStore,
    tracker::{DeviceSyncStatus, SyncStatus, SyncStatusTracker},
    BatchContext, Command, EntityKind, Error, LaneKey, OperationMeta, StoreError, StoreResult,
    SyncBatch, SyncError, SyncOperation, Timestamp,
};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

/// Merges device batches into server state.
pub struct SyncCoordinator {
    store: Arc<dyn SyncStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    schema: Schema,
    resolver: ConflictResolver,
    ledger: InventoryLedger,
    idempotency: IdempotencyStore,
    tracker: SyncStatusTracker,
    locks: Arc<EntityLocks>,
}

impl SyncCoordinator {
    /// Coordinator with the system clock and default configuration.
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self::with_config(store, Arc::new(SystemClock::new()), EngineConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn SyncStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            resolver: ConflictResolver::new(config.conflict_policy),
            ledger: InventoryLedger::new(Arc::clone(&store), config.checkpoint_interval),
            idempotency: IdempotencyStore::new(Arc::clone(&store)),
            tracker: SyncStatusTracker::new(Arc::clone(&store)),
            locks: Arc::new(EntityLocks::new()),
            schema: Schema::shop(),
            store,
            clock,
            config,
        }
    }

    /// Replace the payload schema.
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply a device batch.
    ///
    /// Only batch-level problems are errors. Every operation gets exactly one
    /// result, in input order.
    pub async fn process_batch(
        &self,
        ctx: &BatchContext,
        mut batch: SyncBatch,
    ) -> Result<SyncResponse, SyncError> {
        let received_at = self.clock.now();
        authorize(ctx, &mut batch)?;
        self.ensure_business(&batch.business_id).await?;

        for op in &mut batch.operations {
            if op.device_id.is_empty() {
                op.device_id = batch.device_id.clone();
            }
        }

        tracing::debug!(
            business_id = %batch.business_id,
            device_id = %batch.device_id,
            user_id = %ctx.user_id,
            operations = batch.operations.len(),
            "processing sync batch"
        );

        let lanes = partition(&batch.operations);
        let lane_runs = lanes.into_iter().map(|lane| {
            self.run_lane(&batch.business_id, &batch.device_id, &batch.operations, lane)
        });

        let mut slots: Vec<Option<OperationResult>> = vec![None; batch.operations.len()];
        for (index, result) in join_all(lane_runs).await.into_iter().flatten() {
            slots[index] = Some(result);
        }
        let results: Vec<OperationResult> = slots.into_iter().flatten().collect();

        let settled = results.is_empty() || results.iter().any(OperationResult::is_final);
        let cursor_advanced = settled
            && match self
                .tracker
                .record_batch(&batch.business_id, &batch.device_id, received_at)
                .await
            {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(
                        business_id = %batch.business_id,
                        device_id = %batch.device_id,
                        error = %e,
                        "failed to advance sync cursor"
                    );
                    false
                }
            };

        let response = SyncResponse {
            business_id: batch.business_id,
            results,
            server_time: self.clock.now(),
            cursor_advanced,
        };

        tracing::info!(
            business_id = %response.business_id,
            device_id = %batch.device_id,
            applied = response.count(Outcome::Applied),
            duplicate = response.count(Outcome::Duplicate),
            conflict = response.count(Outcome::Conflict),
            rejected = response.count(Outcome::Rejected),
            cursor_advanced,
            "sync batch processed"
        );

        Ok(response)
    }

    async fn run_lane(
        &self,
        business_id: &str,
        device_id: &str,
        operations: &[SyncOperation],
        lane: Vec<usize>,
    ) -> Vec<(usize, OperationResult)> {
        let mut results = Vec::with_capacity(lane.len());
        for index in lane {
            let result = self
                .process_operation(business_id, device_id, &operations[index])
                .await;
            results.push((index, result));
        }
        results
    }

    async fn process_operation(
        &self,
        business_id: &str,
        device_id: &str,
        op: &SyncOperation,
    ) -> OperationResult {
        let _guard = self.locks.acquire(business_id, &op.lane_key()).await;

        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            match self.critical_section(business_id, device_id, op).await {
                Ok(result) => {
                    tracing::debug!(
                        business_id,
                        op_id = %op.op_id,
                        outcome = %result.outcome,
                        "operation settled"
                    );
                    return result;
                }
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        business_id,
                        op_id = %op.op_id,
                        attempt,
                        ?delay,
                        error = %e,
                        "storage failure, retrying operation"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        business_id,
                        op_id = %op.op_id,
                        attempts = attempt + 1,
                        error = %e,
                        "storage failure, giving up on operation"
                    );
                    return OperationResult::rejected(
                        op.op_id.clone(),
                        self.clock.now(),
                        ErrorKind::Storage,
                        e.to_string(),
                    )
                    .retryable(e.is_retryable());
                }
            }
        }
    }

    async fn critical_section(
        &self,
        business_id: &str,
        device_id: &str,
        op: &SyncOperation,
    ) -> StoreResult<OperationResult> {
        if let Some(replay) = self.idempotency.lookup(business_id, &op.op_id).await? {
            return Ok(replay);
        }

        let meta = OperationMeta::new(op, self.clock.now());

        if op.device_id != device_id {
            let err = Error::DeviceMismatch {
                operation: op.device_id.clone(),
                batch: device_id.to_string(),
            };
            // Not remembered: the op_id still belongs to its own device.
            tracing::debug!(business_id, op_id = %meta.op_id, error = %err, "operation rejected");
            return Ok(OperationResult::rejected(
                meta.op_id.clone(),
                meta.now,
                ErrorKind::Validation,
                err.to_string(),
            ));
        }

        let command = match self.schema.validate(op) {
            Ok(command) => command,
            Err(err) => {
                return self.reject(business_id, &meta, ErrorKind::Validation, err).await;
            }
        };

        let outcome = match command {
            Command::Entity(command) => {
                let existing = self
                    .store
                    .get_entity(business_id, command.kind, &command.id)
                    .await?;
                match self.resolver.resolve(existing.as_ref(), &command, &meta) {
                    Resolution::Write { write, result } => self
                        .store
                        .commit_entity(business_id, &write, &result)
                        .await
                        .map(|()| result),
                    Resolution::Settled(result) => {
                        self.idempotency.remember(business_id, result).await
                    }
                }
            }
            Command::Stock(adjustment) => {
                match self
                    .ledger
                    .apply_adjustment(business_id, &adjustment, &meta)
                    .await
                {
                    Ok(result) if result.outcome != Outcome::Applied => {
                        self.idempotency.remember(business_id, result).await
                    }
                    other => other,
                }
            }
        };

        match outcome {
            Err(StoreError::AlreadyRecorded(op_id)) => self
                .idempotency
                .lookup(business_id, &op_id)
                .await?
                .ok_or(StoreError::AlreadyRecorded(op_id)),
            other => other,
        }
    }

    async fn reject(
        &self,
        business_id: &str,
        meta: &OperationMeta,
        kind: ErrorKind,
        err: Error,
    ) -> StoreResult<OperationResult> {
        tracing::debug!(business_id, op_id = %meta.op_id, error = %err, "operation rejected");
        let result = OperationResult::rejected(meta.op_id.clone(), meta.now, kind, err.to_string());
        self.idempotency.remember(business_id, result).await
    }

    async fn ensure_business(&self, business_id: &str) -> Result<(), SyncError> {
        if self.store.business_exists(business_id).await? {
            Ok(())
        } else {
            Err(SyncError::BusinessNotFound(business_id.to_string()))
        }
    }

    /// Per-device watermarks and pending counts.
    pub async fn sync_status(&self, business_id: &str) -> Result<SyncStatus, SyncError> {
        self.ensure_business(business_id).await?;
        Ok(self.tracker.status(business_id, self.clock.now()).await?)
    }

    /// Last completed sync of a device, if it ever synced.
    pub async fn last_sync(
        &self,
        business_id: &str,
        device_id: &str,
    ) -> Result<Option<Timestamp>, SyncError> {
        self.ensure_business(business_id).await?;
        Ok(self.tracker.last_sync(business_id, device_id).await?)
    }

    pub async fn device_status(
        &self,
        business_id: &str,
        device_id: &str,
    ) -> Result<DeviceSyncStatus, SyncError> {
        self.ensure_business(business_id).await?;
        Ok(self.tracker.device_status(business_id, device_id).await?)
    }

    /// Live products at or below `threshold` (default 0).
    pub async fn low_stock(
        &self,
        business_id: &str,
        threshold: Option<i64>,
    ) -> Result<Vec<StockLevel>, SyncError> {
        self.ensure_business(business_id).await?;
        Ok(self
            .ledger
            .low_stock(business_id, threshold.unwrap_or(0))
            .await?)
    }

    /// Movement history of a product, newest first.
    pub async fn stock_history(
        &self,
        business_id: &str,
        product_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StockMovement>, SyncError> {
        self.ensure_business(business_id).await?;
        let limit = self.config.history_limit(limit);
        Ok(self.ledger.history(business_id, product_id, limit).await?)
    }

    pub async fn stock_quantity(
        &self,
        business_id: &str,
        product_id: &str,
    ) -> Result<i64, SyncError> {
        self.ensure_business(business_id).await?;
        Ok(self.ledger.current_quantity(business_id, product_id).await?)
    }

    pub async fn entity(
        &self,
        business_id: &str,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<EntityRecord>, SyncError> {
        self.ensure_business(business_id).await?;
        Ok(self.store.get_entity(business_id, kind, id).await?)
    }
}

/// Check the batch against the authenticated context and fill in what the
/// routing layer left out.
fn authorize(ctx: &BatchContext, batch: &mut SyncBatch) -> Result<(), SyncError> {
    if batch.business_id.is_empty() {
        batch.business_id = ctx.business_id.clone();
    } else if batch.business_id != ctx.business_id {
        return Err(SyncError::Unauthorized(format!(
            "batch for business '{}' submitted under '{}'",
            batch.business_id, ctx.business_id
        )));
    }

    match (ctx.device_id.is_empty(), batch.device_id.is_empty()) {
        (true, true) => Err(SyncError::Unauthorized("missing device id".into())),
        (false, true) => {
            batch.device_id = ctx.device_id.clone();
            Ok(())
        }
        (false, false) if ctx.device_id != batch.device_id => {
            Err(SyncError::Unauthorized(format!(
                "batch from device '{}' submitted as '{}'",
                batch.device_id, ctx.device_id
            )))
        }
        _ => Ok(()),
    }
}

/// Group operation indices by lane, keeping batch order inside each lane.
fn partition(operations: &[SyncOperation]) -> Vec<Vec<usize>> {
    let mut lanes: Vec<Vec<usize>> = Vec::new();
    let mut positions: HashMap<LaneKey, usize> = HashMap::new();
    for (index, op) in operations.iter().enumerate() {
        let slot = *positions.entry(op.lane_key()).or_insert_with(|| {
            lanes.push(Vec::new());
            lanes.len() - 1
        });
        lanes[slot].push(index);
    }
    lanes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, storage::MemoryStore, Action, EntityType};
    use serde_json::json;

    fn op(op_id: &str, entity_type: EntityType, action: Action, payload: serde_json::Value) -> SyncOperation {
        SyncOperation::new(op_id, entity_type, action, payload, 100, "")
    }

    fn setup() -> (Arc<MemoryStore>, SyncCoordinator) {
        let store = Arc::new(MemoryStore::new());
        store.register_business("biz");
        let coordinator = SyncCoordinator::with_config(
            store.clone(),
            Arc::new(ManualClock::new(1_000)),
            EngineConfig::default(),
        );
        (store, coordinator)
    }

    #[test]
    fn partition_keeps_order_within_lane() {
        let ops = vec![
            op("1", EntityType::Product, Action::Create, json!({"id": "p"})),
            op("2", EntityType::Sale, Action::Create, json!({"id": "s"})),
            op("3", EntityType::StockAdjustment, Action::Create, json!({"product_id": "p"})),
            op("4", EntityType::Sale, Action::Void, json!({"id": "s"})),
        ];
        assert_eq!(partition(&ops), vec![vec![0, 2], vec![1, 3]]);
    }

    #[test]
    fn authorize_fills_and_checks() {
        let ctx = BatchContext::new("biz", "till-1", "user");

        let mut batch = SyncBatch::new("", "", vec![]);
        authorize(&ctx, &mut batch).unwrap();
        assert_eq!(batch.business_id, "biz");
        assert_eq!(batch.device_id, "till-1");

        let mut batch = SyncBatch::new("other", "till-1", vec![]);
        assert!(matches!(authorize(&ctx, &mut batch), Err(SyncError::Unauthorized(_))));

        let mut batch = SyncBatch::new("biz", "till-2", vec![]);
        assert!(matches!(authorize(&ctx, &mut batch), Err(SyncError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn unknown_business_aborts_without_cursor() {
        let (store, coordinator) = setup();
        let ctx = BatchContext::new("ghost", "till-1", "user");
        let err = coordinator
            .process_batch(&ctx, SyncBatch::new("ghost", "till-1", vec![]))
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::BusinessNotFound("ghost".into()));
        assert_eq!(store.get_cursor("biz", "till-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_batch_advances_cursor() {
        let (_, coordinator) = setup();
        let ctx = BatchContext::new("biz", "till-1", "user");
        let response = coordinator
            .process_batch(&ctx, SyncBatch::new("biz", "till-1", vec![]))
            .await
            .unwrap();
        assert!(response.results.is_empty());
        assert_eq!(coordinator.last_sync("biz", "till-1").await.unwrap(), Some(1_000));
    }

    #[tokio::test]
    async fn foreign_device_operation_is_rejected() {
        let (_, coordinator) = setup();
        let ctx = BatchContext::new("biz", "till-1", "user");
        let mut foreign = op(
            "op-1",
            EntityType::Expense,
            Action::Create,
            json!({"id": "e-1", "amount": 4, "category": "rent"}),
        );
        foreign.device_id = "till-9".into();

        let response = coordinator
            .process_batch(&ctx, SyncBatch::new("biz", "till-1", vec![foreign]))
            .await
            .unwrap();
        assert_eq!(response.results[0].outcome, Outcome::Rejected);
        assert_eq!(response.results[0].error_kind, Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn foreign_device_rejection_leaves_op_id_free() {
        let (_, coordinator) = setup();
        let mut foreign = op(
            "op-1",
            EntityType::Expense,
            Action::Create,
            json!({"id": "e-1", "amount": 4, "category": "rent"}),
        );
        foreign.device_id = "till-9".into();

        let response = coordinator
            .process_batch(
                &BatchContext::new("biz", "till-1", "user"),
                SyncBatch::new("biz", "till-1", vec![foreign.clone()]),
            )
            .await
            .unwrap();
        assert_eq!(response.results[0].outcome, Outcome::Rejected);

        let response = coordinator
            .process_batch(
                &BatchContext::new("biz", "till-9", "user"),
                SyncBatch::new("biz", "till-9", vec![foreign]),
            )
            .await
            .unwrap();
        assert_eq!(response.results[0].outcome, Outcome::Applied);
    }

    #[tokio::test]
    async fn create_then_adjust_in_one_batch() {
        let (_, coordinator) = setup();
        let ctx = BatchContext::new("biz", "till-1", "user");
        let batch = SyncBatch::new(
            "biz",
            "till-1",
            vec![
                op("op-1", EntityType::Product, Action::Create, json!({"id": "p-1", "name": "Rice", "unit_price": 3})),
                op("op-2", EntityType::StockAdjustment, Action::Create, json!({"product_id": "p-1", "delta": 10, "reason": "initial"})),
                op("op-3", EntityType::StockAdjustment, Action::Create, json!({"product_id": "p-1", "delta": -4, "reason": "sale"})),
            ],
        );

        let response = coordinator.process_batch(&ctx, batch).await.unwrap();
        assert_eq!(response.count(Outcome::Applied), 3);
        assert_eq!(response.results[0].version, Some(1));
        assert!(response.results[0].server_assigned_id.is_some());
        assert_eq!(coordinator.stock_quantity("biz", "p-1").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn history_limit_is_clamped() {
        let (_, coordinator) = setup();
        let history = coordinator
            .stock_history("biz", "p-unknown", Some(0))
            .await
            .unwrap();
        assert!(history.is_empty());
    }
}
