//! Per-operation outcomes and the batch response.

use crate::{BusinessId, EntityId, EntityRecord, OpId, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    Duplicate,
    Conflict,
    Rejected,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Applied => "applied",
            Outcome::Duplicate => "duplicate",
            Outcome::Conflict => "conflict",
            Outcome::Rejected => "rejected",
        })
    }
}

/// Why an operation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed payload
    Validation,
    /// Stock would go negative
    InvariantViolation,
    /// Target entity does not exist
    NotFound,
    /// Storage failed during the critical section
    Storage,
}

/// Server state returned alongside a conflict or rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerState {
    Entity(EntityRecord),
    Stock {
        product_id: EntityId,
        quantity: i64,
    },
}

/// Outcome of one operation, aligned with its position in the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub op_id: OpId,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_assigned_id: Option<String>,
    pub server_timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_state: Option<ServerState>,
    /// Entity version after the operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Set only for storage rejections; resubmitting the same op_id may succeed
    #[serde(default)]
    pub retryable: bool,
    /// On a duplicate, what the first application produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_outcome: Option<Outcome>,
}

impl OperationResult {
    fn base(op_id: impl Into<OpId>, outcome: Outcome, now: Timestamp) -> Self {
        Self {
            op_id: op_id.into(),
            outcome,
            server_assigned_id: None,
            server_timestamp: now,
            server_state: None,
            version: None,
            reason: None,
            error_kind: None,
            retryable: false,
            original_outcome: None,
        }
    }

    pub fn applied(op_id: impl Into<OpId>, now: Timestamp) -> Self {
        Self::base(op_id, Outcome::Applied, now)
    }

    pub fn conflict(
        op_id: impl Into<OpId>,
        now: Timestamp,
        state: ServerState,
        reason: impl Into<String>,
    ) -> Self {
        let mut result = Self::base(op_id, Outcome::Conflict, now);
        result.server_state = Some(state);
        result.reason = Some(reason.into());
        result
    }

    pub fn rejected(
        op_id: impl Into<OpId>,
        now: Timestamp,
        kind: ErrorKind,
        reason: impl Into<String>,
    ) -> Self {
        let mut result = Self::base(op_id, Outcome::Rejected, now);
        result.error_kind = Some(kind);
        result.reason = Some(reason.into());
        result
    }

    /// A no-op repeat of something already in effect (e.g. voiding a voided sale).
    pub fn duplicate(op_id: impl Into<OpId>, now: Timestamp, state: ServerState) -> Self {
        let mut result = Self::base(op_id, Outcome::Duplicate, now);
        result.server_state = Some(state);
        result
    }

    pub fn with_state(mut self, state: ServerState) -> Self {
        self.server_state = Some(state);
        self
    }

    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_assigned_id = Some(server_id.into());
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Replay a recorded result for a retransmitted operation.
    pub fn as_duplicate(&self) -> Self {
        let mut replay = self.clone();
        replay.original_outcome = Some(self.original_outcome.unwrap_or(self.outcome));
        replay.outcome = Outcome::Duplicate;
        replay
    }

    /// Whether this result settles the operation. Only retryable storage
    /// rejections leave it open.
    pub fn is_final(&self) -> bool {
        !(self.outcome == Outcome::Rejected && self.retryable)
    }
}

/// Response to a batch, one result per submitted operation, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub business_id: BusinessId,
    pub results: Vec<OperationResult>,
    pub server_time: Timestamp,
    /// False when the device's last-sync time was left where it was, either
    /// because nothing settled or because the cursor write failed. The
    /// device should then treat the sync as incomplete and pull again.
    #[serde(default)]
    pub cursor_advanced: bool,
}

impl SyncResponse {
    /// Count results with the given outcome.
    pub fn count(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }
}
