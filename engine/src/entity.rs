//! Versioned entities: sales, expenses and product metadata.

use crate::{DeviceId, EntityId, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of entity that carry a version and are merged by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Sale,
    Expense,
    Product,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Sale, EntityKind::Expense, EntityKind::Product];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Sale => "sale",
            EntityKind::Expense => "expense",
            EntityKind::Product => "product",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side state of a syncable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Client-generated natural key; every operation addresses the entity by it
    pub id: EntityId,
    pub kind: EntityKind,
    /// Assigned by the server on first write
    pub server_id: String,
    /// Incremented on each accepted mutation
    pub version: Version,
    pub payload: serde_json::Value,
    /// Server time of the first write
    pub created_at: Timestamp,
    /// Server time of the last accepted write
    pub last_modified: Timestamp,
    /// Client timestamp carried by the last accepted write
    pub client_modified: Timestamp,
    /// Device that made the last accepted write
    pub modified_by: DeviceId,
    /// Soft delete flag (tombstone)
    pub voided: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub void_reason: Option<String>,
}

impl EntityRecord {
    /// Create a live entity at version 1.
    pub fn new(
        kind: EntityKind,
        id: impl Into<EntityId>,
        payload: serde_json::Value,
        now: Timestamp,
        client_timestamp: Timestamp,
        device_id: impl Into<DeviceId>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            server_id: uuid::Uuid::new_v4().to_string(),
            version: 1,
            payload,
            created_at: now,
            last_modified: now,
            client_modified: client_timestamp,
            modified_by: device_id.into(),
            voided: false,
            void_reason: None,
        }
    }

    /// Create a voided entity that was never seen alive.
    ///
    /// Holding the tombstone makes a late-arriving create for the same id a
    /// conflict instead of a resurrection.
    pub fn tombstone(
        kind: EntityKind,
        id: impl Into<EntityId>,
        now: Timestamp,
        client_timestamp: Timestamp,
        device_id: impl Into<DeviceId>,
        reason: Option<String>,
    ) -> Self {
        let mut record = Self::new(
            kind,
            id,
            serde_json::Value::Object(Default::default()),
            now,
            client_timestamp,
            device_id,
        );
        record.voided = true;
        record.void_reason = reason;
        record
    }

    /// Check if the entity is live (not voided).
    pub fn is_live(&self) -> bool {
        !self.voided
    }

    /// Replace the payload.
    pub fn update_payload(
        &mut self,
        payload: serde_json::Value,
        now: Timestamp,
        client_timestamp: Timestamp,
        device_id: impl Into<DeviceId>,
    ) {
        self.payload = payload;
        self.touch(now, client_timestamp, device_id.into());
    }

    /// Mark as voided.
    pub fn mark_voided(
        &mut self,
        now: Timestamp,
        client_timestamp: Timestamp,
        device_id: impl Into<DeviceId>,
        reason: Option<String>,
    ) {
        self.voided = true;
        self.void_reason = reason;
        self.touch(now, client_timestamp, device_id.into());
    }

    fn touch(&mut self, now: Timestamp, client_timestamp: Timestamp, device_id: DeviceId) {
        self.version += 1;
        // Server time handed out by the engine never goes backwards, but an
        // imported record might carry a later stamp.
        self.last_modified = self.last_modified.max(now);
        self.client_modified = client_timestamp;
        self.modified_by = device_id;
    }
}

/// A guarded entity write.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityWrite {
    pub record: EntityRecord,
    /// `None`: the entity must not exist yet. `Some(v)`: stored version must be `v`.
    pub expected_version: Option<Version>,
}

impl EntityWrite {
    pub fn insert(record: EntityRecord) -> Self {
        Self {
            record,
            expected_version: None,
        }
    }

    pub fn replace(record: EntityRecord, expected_version: Version) -> Self {
        Self {
            record,
            expected_version: Some(expected_version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_entity_starts_at_version_one() {
        let record = EntityRecord::new(
            EntityKind::Sale,
            "sale-1",
            json!({"total": 12.5}),
            1000,
            900,
            "till-1",
        );

        assert_eq!(record.version, 1);
        assert_eq!(record.last_modified, 1000);
        assert_eq!(record.client_modified, 900);
        assert_eq!(record.modified_by, "till-1");
        assert!(record.is_live());
        assert!(!record.server_id.is_empty());
    }

    #[test]
    fn update_bumps_version() {
        let mut record =
            EntityRecord::new(EntityKind::Expense, "e-1", json!({"amount": 5}), 1000, 1000, "a");
        record.update_payload(json!({"amount": 7}), 2000, 1500, "b");

        assert_eq!(record.version, 2);
        assert_eq!(record.payload, json!({"amount": 7}));
        assert_eq!(record.last_modified, 2000);
        assert_eq!(record.client_modified, 1500);
        assert_eq!(record.modified_by, "b");
    }

    #[test]
    fn void_bumps_version_and_keeps_payload() {
        let mut record =
            EntityRecord::new(EntityKind::Sale, "s-1", json!({"total": 3}), 1000, 1000, "a");
        record.mark_voided(2000, 2000, "a", Some("customer refund".into()));

        assert!(!record.is_live());
        assert_eq!(record.version, 2);
        assert_eq!(record.payload, json!({"total": 3}));
        assert_eq!(record.void_reason.as_deref(), Some("customer refund"));
    }

    #[test]
    fn tombstone_is_voided_at_version_one() {
        let record = EntityRecord::tombstone(EntityKind::Sale, "s-9", 10, 5, "a", None);
        assert!(record.voided);
        assert_eq!(record.version, 1);
    }

    #[test]
    fn kind_parse_roundtrip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("stock_adjustment"), None);
    }
}
