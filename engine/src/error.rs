//! Error types for the sync engine.
//!
//! Three layers, matching how far a failure is allowed to travel:
//!
//! - [`Error`] describes why a single operation is invalid. It never escapes
//!   the coordinator; it becomes a `rejected` [`OperationResult`](crate::OperationResult).
//! - [`StoreError`] is raised by the storage collaborator.
//! - [`SyncError`] aborts a whole batch or status query.

use crate::{Action, BusinessId, EntityType, OpId};
use thiserror::Error;

/// Validation failures for a single operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("action '{action}' is not supported for {entity_type}")]
    UnsupportedAction {
        entity_type: EntityType,
        action: Action,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("invalid value '{value}' for field '{field}'")]
    InvalidChoice { field: String, value: String },

    #[error("operation recorded on device '{operation}' submitted in a batch from '{batch}'")]
    DeviceMismatch { operation: String, batch: String },
}

/// Result type for validation.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by a [`SyncStore`](crate::SyncStore) implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// I/O failure, lost connection, lock timeout.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A guarded write lost against a concurrent writer.
    #[error("version conflict on {key}: expected {expected}, found {actual}")]
    VersionConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// The idempotency table already holds a result for this operation.
    #[error("operation already recorded: {0}")]
    AlreadyRecorded(OpId),

    #[error("invalid storage request: {0}")]
    Invalid(String),
}

impl StoreError {
    /// Returns true if repeating the same critical section may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::VersionConflict { .. }
        )
    }
}

/// Result type for storage calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Batch-level failures. These are the only errors that abort a whole call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("business not found: {0}")]
    BusinessNotFound(BusinessId),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}
