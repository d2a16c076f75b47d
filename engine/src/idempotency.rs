//! At-most-once application of operations.
//!
//! Results that come with a mutation are recorded by the same storage call
//! that performs it (`commit_entity`, `append_movement`). This type covers
//! the lookup and the results that change nothing.

use crate::{result::OperationResult, storage::SyncStore, StoreError, StoreResult};
use std::sync::Arc;

/// Remembers what each op_id produced, per business.
pub struct IdempotencyStore {
    store: Arc<dyn SyncStore>,
}

impl IdempotencyStore {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    /// The recorded result for `op_id`, replayed as a duplicate.
    pub async fn lookup(
        &self,
        business_id: &str,
        op_id: &str,
    ) -> StoreResult<Option<OperationResult>> {
        Ok(self
            .store
            .find_result(business_id, op_id)
            .await?
            .map(|recorded| recorded.as_duplicate()))
    }

    /// Record a non-mutating result.
    ///
    /// If another writer got there first, their result wins and is returned
    /// as a duplicate.
    pub async fn remember(
        &self,
        business_id: &str,
        result: OperationResult,
    ) -> StoreResult<OperationResult> {
        match self.store.insert_result(business_id, &result).await {
            Ok(()) => Ok(result),
            Err(StoreError::AlreadyRecorded(op_id)) => self
                .lookup(business_id, &op_id)
                .await?
                .ok_or(StoreError::AlreadyRecorded(op_id)),
            Err(e) => Err(e),
        }
    }
}
