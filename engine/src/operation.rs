//! Operation types submitted by devices.
//!
//! Devices record changes while offline and upload them as a [`SyncBatch`].
//! Each [`SyncOperation`] carries a client-generated `op_id` which is the
//! idempotency key for the whole system.

use crate::{
    ledger::StockAdjustment, BusinessId, DeviceId, EntityId, EntityKind, OpId, Timestamp,
    Version,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of thing an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Sale,
    Expense,
    Product,
    StockAdjustment,
}

impl EntityType {
    /// The versioned entity kind behind this type, if it is not a ledger entry.
    pub fn entity_kind(self) -> Option<EntityKind> {
        match self {
            EntityType::Sale => Some(EntityKind::Sale),
            EntityType::Expense => Some(EntityKind::Expense),
            EntityType::Product => Some(EntityKind::Product),
            EntityType::StockAdjustment => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Sale => "sale",
            EntityType::Expense => "expense",
            EntityType::Product => "product",
            EntityType::StockAdjustment => "stock_adjustment",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the operation does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Void,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Void => "void",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single change recorded on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Client-generated, unique per business, stable across retransmissions
    pub op_id: OpId,
    pub entity_type: EntityType,
    pub action: Action,
    /// Entity body; its shape is checked by [`Schema`](crate::Schema)
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Device wall-clock time at which the change was made (ms since epoch)
    pub client_timestamp: Timestamp,
    /// Empty means "the device that submitted the batch"
    #[serde(default)]
    pub device_id: DeviceId,
}

impl SyncOperation {
    /// Create a new operation.
    pub fn new(
        op_id: impl Into<OpId>,
        entity_type: EntityType,
        action: Action,
        payload: serde_json::Value,
        client_timestamp: Timestamp,
        device_id: impl Into<DeviceId>,
    ) -> Self {
        Self {
            op_id: op_id.into(),
            entity_type,
            action,
            payload,
            client_timestamp,
            device_id: device_id.into(),
        }
    }

    /// The entity id named in the payload, read leniently (before validation).
    pub fn target_id(&self) -> Option<&str> {
        let field = match self.entity_type {
            EntityType::StockAdjustment => "product_id",
            _ => "id",
        };
        self.payload
            .get(field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// The serialization lane this operation belongs to.
    ///
    /// A product and its stock adjustments share a lane, so a create followed
    /// by an adjustment in the same batch is applied in that order.
    pub fn lane_key(&self) -> LaneKey {
        let kind = self.entity_type.entity_kind().unwrap_or(EntityKind::Product);
        match self.target_id() {
            Some(id) => LaneKey::Entity(kind, id.to_string()),
            None => LaneKey::Unaddressed(self.op_id.clone()),
        }
    }
}

/// Serialization unit within a business.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LaneKey {
    Entity(EntityKind, EntityId),
    /// Operations without a readable target; they touch nothing shared.
    Unaddressed(OpId),
}

impl fmt::Display for LaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneKey::Entity(kind, id) => write!(f, "{}:{}", kind, id),
            LaneKey::Unaddressed(op_id) => write!(f, "op:{}", op_id),
        }
    }
}

/// Operations uploaded by one device in one sync call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncBatch {
    #[serde(default)]
    pub business_id: BusinessId,
    pub device_id: DeviceId,
    /// Local commit order of the device
    #[serde(default)]
    pub operations: Vec<SyncOperation>,
}

impl SyncBatch {
    pub fn new(
        business_id: impl Into<BusinessId>,
        device_id: impl Into<DeviceId>,
        operations: Vec<SyncOperation>,
    ) -> Self {
        Self {
            business_id: business_id.into(),
            device_id: device_id.into(),
            operations,
        }
    }
}

/// Authenticated caller identity supplied by the routing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchContext {
    pub business_id: BusinessId,
    pub device_id: DeviceId,
    pub user_id: String,
}

impl BatchContext {
    pub fn new(
        business_id: impl Into<BusinessId>,
        device_id: impl Into<DeviceId>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            business_id: business_id.into(),
            device_id: device_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// A validated entity operation.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCommand {
    pub kind: EntityKind,
    pub action: Action,
    pub id: EntityId,
    /// Payload without the addressing fields
    pub body: serde_json::Value,
    /// Version the device last saw; only consulted by the base-version policy
    pub base_version: Option<Version>,
    /// Void reason, if given
    pub reason: Option<String>,
}

/// A validated operation, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Entity(EntityCommand),
    Stock(StockAdjustment),
}

/// Per-operation facts the resolver and ledger need besides the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationMeta {
    pub op_id: OpId,
    pub device_id: DeviceId,
    pub client_timestamp: Timestamp,
    /// Server time at which the operation is being applied
    pub now: Timestamp,
}

impl OperationMeta {
    pub fn new(op: &SyncOperation, now: Timestamp) -> Self {
        Self {
            op_id: op.op_id.clone(),
            device_id: op.device_id.clone(),
            client_timestamp: op.client_timestamp,
            now,
        }
    }
}
