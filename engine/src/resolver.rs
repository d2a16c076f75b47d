//! Conflict resolution for versioned entities.
//!
//! The resolver is pure: given the stored record (if any) and a validated
//! command, it decides whether to write and what to report. It never touches
//! storage, which keeps the decision deterministic and cheap to test.
//!
//! # Rules
//!
//! | stored        | create   | update            | void                |
//! |---------------|----------|-------------------|---------------------|
//! | absent        | insert   | rejected (404)    | tombstone, applied  |
//! | live          | conflict | policy decides    | policy decides      |
//! | voided        | conflict | conflict          | duplicate           |
//!
//! Ties always go to the stored state so that clock skew between two devices
//! cannot make an entity flip back and forth.

use crate::{
    entity::{EntityRecord, EntityWrite},
    result::{ErrorKind, OperationResult, ServerState},
    Action, EntityCommand, OperationMeta,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Policy used to arbitrate an update or void against stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Client timestamp must be later than the entity's `last_modified`
    #[default]
    ServerTimestamp,
    /// Client timestamp must be later than the one carried by the last
    /// accepted write
    ClientTimestamp,
    /// Client must name the version it last saw
    BaseVersion,
}

impl ConflictPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictPolicy::ClientTimestamp => "client_timestamp",
            ConflictPolicy::ServerTimestamp => "server_timestamp",
            ConflictPolicy::BaseVersion => "base_version",
        }
    }

    /// Whether an incoming change beats the stored record.
    pub fn incoming_wins(
        self,
        existing: &EntityRecord,
        command: &EntityCommand,
        meta: &OperationMeta,
    ) -> bool {
        match self {
            ConflictPolicy::ClientTimestamp => meta.client_timestamp > existing.client_modified,
            ConflictPolicy::ServerTimestamp => meta.client_timestamp > existing.last_modified,
            ConflictPolicy::BaseVersion => command.base_version == Some(existing.version),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "client_timestamp" | "lww" => Ok(ConflictPolicy::ClientTimestamp),
            "server_timestamp" => Ok(ConflictPolicy::ServerTimestamp),
            "base_version" => Ok(ConflictPolicy::BaseVersion),
            other => Err(format!("unknown conflict policy: {}", other)),
        }
    }
}

/// Decision for one entity command.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Persist the write; report `result` once it is committed.
    Write {
        write: EntityWrite,
        result: OperationResult,
    },
    /// Nothing to write.
    Settled(OperationResult),
}

impl Resolution {
    pub fn result(&self) -> &OperationResult {
        match self {
            Resolution::Write { result, .. } => result,
            Resolution::Settled(result) => result,
        }
    }
}

/// Decides entity writes under a [`ConflictPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    pub fn resolve(
        &self,
        existing: Option<&EntityRecord>,
        command: &EntityCommand,
        meta: &OperationMeta,
    ) -> Resolution {
        match (command.action, existing) {
            (Action::Create, None) => {
                let record = EntityRecord::new(
                    command.kind,
                    command.id.clone(),
                    command.body.clone(),
                    meta.now,
                    meta.client_timestamp,
                    meta.device_id.clone(),
                );
                Self::write(EntityWrite::insert(record), meta)
            }
            (Action::Create, Some(existing)) => Resolution::Settled(OperationResult::conflict(
                meta.op_id.clone(),
                meta.now,
                ServerState::Entity(existing.clone()),
                format!("{} '{}' already exists", command.kind, command.id),
            )),

            (Action::Update, None) => Resolution::Settled(OperationResult::rejected(
                meta.op_id.clone(),
                meta.now,
                ErrorKind::NotFound,
                format!("{} '{}' does not exist", command.kind, command.id),
            )),
            (Action::Update, Some(existing)) if existing.voided => {
                Resolution::Settled(OperationResult::conflict(
                    meta.op_id.clone(),
                    meta.now,
                    ServerState::Entity(existing.clone()),
                    format!("{} '{}' has been voided", command.kind, command.id),
                ))
            }
            (Action::Update, Some(existing)) => {
                if !self.policy.incoming_wins(existing, command, meta) {
                    return self.stale(existing, meta);
                }
                let mut record = existing.clone();
                record.update_payload(
                    command.body.clone(),
                    meta.now,
                    meta.client_timestamp,
                    meta.device_id.clone(),
                );
                Self::write(EntityWrite::replace(record, existing.version), meta)
            }

            (Action::Void, None) => {
                let record = EntityRecord::tombstone(
                    command.kind,
                    command.id.clone(),
                    meta.now,
                    meta.client_timestamp,
                    meta.device_id.clone(),
                    command.reason.clone(),
                );
                Self::write(EntityWrite::insert(record), meta)
            }
            (Action::Void, Some(existing)) if existing.voided => {
                Resolution::Settled(OperationResult::duplicate(
                    meta.op_id.clone(),
                    meta.now,
                    ServerState::Entity(existing.clone()),
                ))
            }
            (Action::Void, Some(existing)) => {
                if !self.policy.incoming_wins(existing, command, meta) {
                    return self.stale(existing, meta);
                }
                let mut record = existing.clone();
                record.mark_voided(
                    meta.now,
                    meta.client_timestamp,
                    meta.device_id.clone(),
                    command.reason.clone(),
                );
                Self::write(EntityWrite::replace(record, existing.version), meta)
            }
        }
    }

    fn write(write: EntityWrite, meta: &OperationMeta) -> Resolution {
        let result = OperationResult::applied(meta.op_id.clone(), meta.now)
            .with_server_id(write.record.server_id.clone())
            .with_version(write.record.version)
            .with_state(ServerState::Entity(write.record.clone()));
        Resolution::Write { write, result }
    }

    fn stale(&self, existing: &EntityRecord, meta: &OperationMeta) -> Resolution {
        let reason = match self.policy {
            ConflictPolicy::BaseVersion => format!(
                "stale base version; server is at version {}",
                existing.version
            ),
            _ => "server state is newer".to_string(),
        };
        Resolution::Settled(
            OperationResult::conflict(
                meta.op_id.clone(),
                meta.now,
                ServerState::Entity(existing.clone()),
                reason,
            )
            .with_version(existing.version),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityKind, Outcome};
    use serde_json::json;

    fn command(action: Action, body: serde_json::Value) -> EntityCommand {
        EntityCommand {
            kind: EntityKind::Sale,
            action,
            id: "sale-1".into(),
            body,
            base_version: None,
            reason: None,
        }
    }

    fn meta(client_timestamp: u64, now: u64) -> OperationMeta {
        OperationMeta {
            op_id: format!("op-{}", client_timestamp),
            device_id: "till-b".into(),
            client_timestamp,
            now,
        }
    }

    fn stored(client_modified: u64) -> EntityRecord {
        EntityRecord::new(
            EntityKind::Sale,
            "sale-1",
            json!({"total": 10}),
            5000,
            client_modified,
            "till-a",
        )
    }

    #[test]
    fn create_inserts_at_version_one() {
        let resolution = ConflictResolver::default().resolve(
            None,
            &command(Action::Create, json!({"total": 10})),
            &meta(100, 1000),
        );
        let Resolution::Write { write, result } = resolution else {
            panic!("expected write");
        };
        assert_eq!(write.expected_version, None);
        assert_eq!(write.record.version, 1);
        assert_eq!(result.outcome, Outcome::Applied);
        assert_eq!(result.version, Some(1));
        assert_eq!(result.server_assigned_id, Some(write.record.server_id));
    }

    #[test]
    fn duplicate_create_is_a_conflict() {
        let existing = stored(100);
        let resolution = ConflictResolver::default().resolve(
            Some(&existing),
            &command(Action::Create, json!({"total": 99})),
            &meta(200, 6000),
        );
        let result = resolution.result();
        assert_eq!(result.outcome, Outcome::Conflict);
        assert_eq!(result.server_state, Some(ServerState::Entity(existing)));
    }

    #[test]
    fn older_update_conflicts_and_newer_applies() {
        // last_modified is 5000
        let existing = stored(100);
        let resolver = ConflictResolver::default();

        let stale = resolver.resolve(
            Some(&existing),
            &command(Action::Update, json!({"total": 1})),
            &meta(4999, 6000),
        );
        assert!(matches!(stale, Resolution::Settled(ref r) if r.outcome == Outcome::Conflict));

        let fresh = resolver.resolve(
            Some(&existing),
            &command(Action::Update, json!({"total": 2})),
            &meta(5001, 6000),
        );
        let Resolution::Write { write, .. } = fresh else {
            panic!("expected write");
        };
        assert_eq!(write.expected_version, Some(1));
        assert_eq!(write.record.version, 2);
        assert_eq!(write.record.last_modified, 6000);
        assert_eq!(write.record.payload, json!({"total": 2}));
    }

    #[test]
    fn equal_timestamps_keep_server_state() {
        let existing = stored(100);
        let resolution = ConflictResolver::default().resolve(
            Some(&existing),
            &command(Action::Update, json!({"total": 3})),
            &meta(5000, 6000),
        );
        assert_eq!(resolution.result().outcome, Outcome::Conflict);

        let resolution = ConflictResolver::new(ConflictPolicy::ClientTimestamp).resolve(
            Some(&existing),
            &command(Action::Update, json!({"total": 3})),
            &meta(100, 6000),
        );
        assert_eq!(resolution.result().outcome, Outcome::Conflict);
    }

    #[test]
    fn default_policy_compares_against_last_modified() {
        // Written at server time 10_000 by a device whose clock said 100.
        let existing = EntityRecord::new(
            EntityKind::Sale,
            "sale-1",
            json!({"total": 10}),
            10_000,
            100,
            "till-a",
        );
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::ServerTimestamp);

        let resolution = ConflictResolver::default().resolve(
            Some(&existing),
            &command(Action::Update, json!({"total": 11})),
            &meta(5_000, 20_000),
        );
        let result = resolution.result();
        assert_eq!(result.outcome, Outcome::Conflict);
        assert_eq!(result.version, Some(1));

        // The client-clock policy only looks at the earlier device stamp.
        let resolution = ConflictResolver::new(ConflictPolicy::ClientTimestamp).resolve(
            Some(&existing),
            &command(Action::Update, json!({"total": 11})),
            &meta(5_000, 20_000),
        );
        assert_eq!(resolution.result().outcome, Outcome::Applied);
    }

    #[test]
    fn update_missing_entity_is_not_found() {
        let resolution = ConflictResolver::default().resolve(
            None,
            &command(Action::Update, json!({})),
            &meta(100, 1000),
        );
        assert_eq!(resolution.result().error_kind, Some(ErrorKind::NotFound));
    }

    #[test]
    fn void_is_idempotent() {
        let resolver = ConflictResolver::default();

        let Resolution::Write { write, .. } =
            resolver.resolve(None, &command(Action::Void, json!({})), &meta(100, 1000))
        else {
            panic!("expected tombstone");
        };
        assert!(write.record.voided);

        let again = resolver.resolve(
            Some(&write.record),
            &command(Action::Void, json!({})),
            &meta(50, 2000),
        );
        assert_eq!(again.result().outcome, Outcome::Duplicate);
    }

    #[test]
    fn voided_entity_rejects_updates_and_creates() {
        let mut existing = stored(100);
        existing.mark_voided(6000, 150, "till-a", None);
        let resolver = ConflictResolver::default();

        for action in [Action::Update, Action::Create] {
            let resolution =
                resolver.resolve(Some(&existing), &command(action, json!({})), &meta(900, 7000));
            assert_eq!(resolution.result().outcome, Outcome::Conflict);
        }
    }

    #[test]
    fn client_timestamp_policy_compares_client_modified() {
        let existing = stored(100);
        let resolver = ConflictResolver::new(ConflictPolicy::ClientTimestamp);

        let resolution = resolver.resolve(
            Some(&existing),
            &command(Action::Update, json!({})),
            &meta(90, 7000),
        );
        assert_eq!(resolution.result().outcome, Outcome::Conflict);

        let resolution = resolver.resolve(
            Some(&existing),
            &command(Action::Update, json!({})),
            &meta(110, 7000),
        );
        assert_eq!(resolution.result().outcome, Outcome::Applied);
    }

    #[test]
    fn base_version_policy_ignores_clocks() {
        let existing = stored(100);
        let resolver = ConflictResolver::new(ConflictPolicy::BaseVersion);

        let mut cmd = command(Action::Update, json!({"total": 4}));
        cmd.base_version = Some(1);
        let resolution = resolver.resolve(Some(&existing), &cmd, &meta(1, 7000));
        assert_eq!(resolution.result().outcome, Outcome::Applied);

        cmd.base_version = Some(0);
        let resolution = resolver.resolve(Some(&existing), &cmd, &meta(9999, 7000));
        assert_eq!(resolution.result().outcome, Outcome::Conflict);
        assert_eq!(resolution.result().version, Some(1));
    }

    #[test]
    fn policy_from_str() {
        assert_eq!(
            "client_timestamp".parse::<ConflictPolicy>(),
            Ok(ConflictPolicy::ClientTimestamp)
        );
        assert_eq!(
            "Base-Version".parse::<ConflictPolicy>(),
            Ok(ConflictPolicy::BaseVersion)
        );
        assert!("random".parse::<ConflictPolicy>().is_err());
    }
}
