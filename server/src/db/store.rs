//! PostgreSQL implementation of the engine's storage seam.
//!
//! Each mutating call runs in its own transaction. The idempotency row is
//! written first so that a replayed op_id fails before touching any state.

use super::{cursors, entities, movements, results, Pool};
use async_trait::async_trait;
use shopsync_engine::{
    EntityKind, EntityRecord, EntityWrite, OperationResult, StockCheckpoint, StockMovement,
    StockState, StoreError, StoreResult, SyncCursor, SyncStore, Timestamp,
};
use std::collections::HashMap;

/// [`SyncStore`] backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn unavailable(err: sqlx::Error) -> StoreError {
    tracing::warn!(error = %err, "Database call failed");
    StoreError::Unavailable(err.to_string())
}

/// PostgreSQL unique violation, code 23505.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        db_err.code().map(|c| c == "23505").unwrap_or(false)
    } else {
        false
    }
}

fn recorded_or_unavailable(op_id: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |err| {
        if is_unique_violation(&err) {
            StoreError::AlreadyRecorded(op_id.to_string())
        } else {
            unavailable(err)
        }
    }
}

#[async_trait]
impl SyncStore for PgStore {
    async fn business_exists(&self, business_id: &str) -> StoreResult<bool> {
        let (exists,): (bool,) =
            sqlx::query_as(r#"SELECT EXISTS(SELECT 1 FROM businesses WHERE id = $1)"#)
                .bind(business_id)
                .fetch_one(&self.pool)
                .await
                .map_err(unavailable)?;
        Ok(exists)
    }

    async fn find_result(
        &self,
        business_id: &str,
        op_id: &str,
    ) -> StoreResult<Option<OperationResult>> {
        results::find_result(&self.pool, business_id, op_id)
            .await
            .map_err(unavailable)
    }

    async fn insert_result(&self, business_id: &str, result: &OperationResult) -> StoreResult<()> {
        results::insert_result(&self.pool, business_id, result)
            .await
            .map_err(recorded_or_unavailable(&result.op_id))
    }

    async fn get_entity(
        &self,
        business_id: &str,
        kind: EntityKind,
        id: &str,
    ) -> StoreResult<Option<EntityRecord>> {
        entities::get_entity(&self.pool, business_id, kind, id)
            .await
            .map_err(unavailable)?
            .map(|row| row.into_record())
            .transpose()
    }

    async fn commit_entity(
        &self,
        business_id: &str,
        write: &EntityWrite,
        result: &OperationResult,
    ) -> StoreResult<()> {
        let record = &write.record;
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        results::insert_result(&mut *tx, business_id, result)
            .await
            .map_err(recorded_or_unavailable(&result.op_id))?;

        let written = match write.expected_version {
            None => entities::insert_entity(&mut *tx, business_id, record).await,
            Some(expected) => {
                entities::replace_entity(&mut *tx, business_id, record, expected).await
            }
        }
        .map_err(unavailable)?;

        if !written {
            let actual = entities::entity_version(&mut *tx, business_id, record.kind, &record.id)
                .await
                .map_err(unavailable)?
                .unwrap_or(0);
            return Err(StoreError::VersionConflict {
                key: format!("{}:{}", record.kind, record.id),
                expected: write.expected_version.unwrap_or(0),
                actual,
            });
        }

        tx.commit().await.map_err(unavailable)
    }

    async fn list_entities(
        &self,
        business_id: &str,
        kind: EntityKind,
    ) -> StoreResult<Vec<EntityRecord>> {
        entities::list_entities(&self.pool, business_id, kind)
            .await
            .map_err(unavailable)?
            .into_iter()
            .map(|row| row.into_record())
            .collect()
    }

    async fn load_stock(&self, business_id: &str, product_id: &str) -> StoreResult<StockState> {
        let checkpoint = movements::get_checkpoint(&self.pool, business_id, product_id)
            .await
            .map_err(unavailable)?;
        let after = checkpoint.as_ref().map_or(0, |c| c.sequence);

        let movements = movements::movements_after(&self.pool, business_id, product_id, after)
            .await
            .map_err(unavailable)?
            .into_iter()
            .map(|row| row.into_movement())
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(StockState {
            checkpoint,
            movements,
        })
    }

    async fn append_movement(
        &self,
        business_id: &str,
        movement: &StockMovement,
        result: &OperationResult,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        results::insert_result(&mut *tx, business_id, result)
            .await
            .map_err(recorded_or_unavailable(&result.op_id))?;

        let expected = movement.sequence.saturating_sub(1);
        let last = movements::last_sequence(&mut *tx, business_id, &movement.product_id)
            .await
            .map_err(unavailable)?;
        let conflict = |actual| StoreError::VersionConflict {
            key: format!("stock:{}", movement.product_id),
            expected,
            actual,
        };
        if last != expected {
            return Err(conflict(last));
        }

        movements::insert_movement(&mut *tx, business_id, movement)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    conflict(movement.sequence)
                } else {
                    unavailable(err)
                }
            })?;

        tx.commit().await.map_err(unavailable)
    }

    async fn save_checkpoint(
        &self,
        business_id: &str,
        checkpoint: &StockCheckpoint,
    ) -> StoreResult<()> {
        movements::save_checkpoint(&self.pool, business_id, checkpoint)
            .await
            .map_err(unavailable)
    }

    async fn movement_history(
        &self,
        business_id: &str,
        product_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<StockMovement>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        movements::movement_history(&self.pool, business_id, product_id, limit)
            .await
            .map_err(unavailable)?
            .into_iter()
            .map(|row| row.into_movement())
            .collect()
    }

    async fn latest_quantities(&self, business_id: &str) -> StoreResult<HashMap<String, i64>> {
        movements::latest_quantities(&self.pool, business_id)
            .await
            .map_err(unavailable)
    }

    async fn get_cursor(
        &self,
        business_id: &str,
        device_id: &str,
    ) -> StoreResult<Option<Timestamp>> {
        cursors::get_cursor(&self.pool, business_id, device_id)
            .await
            .map_err(unavailable)
    }

    async fn advance_cursor(
        &self,
        business_id: &str,
        device_id: &str,
        at: Timestamp,
    ) -> StoreResult<Timestamp> {
        cursors::advance_cursor(&self.pool, business_id, device_id, at)
            .await
            .map_err(unavailable)
    }

    async fn list_cursors(&self, business_id: &str) -> StoreResult<Vec<SyncCursor>> {
        cursors::list_cursors(&self.pool, business_id)
            .await
            .map_err(unavailable)
    }

    async fn count_changes_since(
        &self,
        business_id: &str,
        since: Option<Timestamp>,
        excluding_device: Option<&str>,
    ) -> StoreResult<u64> {
        cursors::count_changes_since(&self.pool, business_id, since, excluding_device)
            .await
            .map_err(unavailable)
    }
}
