//! Database operations for the entities table.

use shopsync_engine::{EntityKind, EntityRecord, StoreError, Version};
use sqlx::{PgExecutor, Row};

/// A stored entity row from the database.
#[derive(Debug)]
pub struct StoredEntity {
    pub kind: String,
    pub id: String,
    pub server_id: String,
    pub version: i64,
    pub payload: serde_json::Value,
    pub created_at: i64,
    pub last_modified: i64,
    pub client_modified: i64,
    pub modified_by: String,
    pub voided: bool,
    pub void_reason: Option<String>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEntity {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEntity {
            kind: row.try_get("kind")?,
            id: row.try_get("id")?,
            server_id: row.try_get("server_id")?,
            version: row.try_get("version")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            last_modified: row.try_get("last_modified")?,
            client_modified: row.try_get("client_modified")?,
            modified_by: row.try_get("modified_by")?,
            voided: row.try_get("voided")?,
            void_reason: row.try_get("void_reason")?,
        })
    }
}

impl StoredEntity {
    /// Convert database row to an engine record.
    pub fn into_record(self) -> Result<EntityRecord, StoreError> {
        let kind = EntityKind::parse(&self.kind)
            .ok_or_else(|| StoreError::Invalid(format!("unknown entity kind: {}", self.kind)))?;

        Ok(EntityRecord {
            id: self.id,
            kind,
            server_id: self.server_id,
            version: self.version as Version,
            payload: self.payload,
            created_at: self.created_at as u64,
            last_modified: self.last_modified as u64,
            client_modified: self.client_modified as u64,
            modified_by: self.modified_by,
            voided: self.voided,
            void_reason: self.void_reason,
        })
    }
}

pub async fn get_entity<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    kind: EntityKind,
    id: &str,
) -> Result<Option<StoredEntity>, sqlx::Error> {
    sqlx::query_as::<_, StoredEntity>(
        r#"
        SELECT kind, id, server_id, version, payload, created_at, last_modified,
               client_modified, modified_by, voided, void_reason
        FROM sync_entities
        WHERE business_id = $1 AND kind = $2 AND id = $3
        "#,
    )
    .bind(business_id)
    .bind(kind.as_str())
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub async fn list_entities<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    kind: EntityKind,
) -> Result<Vec<StoredEntity>, sqlx::Error> {
    sqlx::query_as::<_, StoredEntity>(
        r#"
        SELECT kind, id, server_id, version, payload, created_at, last_modified,
               client_modified, modified_by, voided, void_reason
        FROM sync_entities
        WHERE business_id = $1 AND kind = $2
        ORDER BY id ASC
        "#,
    )
    .bind(business_id)
    .bind(kind.as_str())
    .fetch_all(executor)
    .await
}

/// Current version of an entity, if it exists.
pub async fn entity_version<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    kind: EntityKind,
    id: &str,
) -> Result<Option<Version>, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"SELECT version FROM sync_entities WHERE business_id = $1 AND kind = $2 AND id = $3"#,
    )
    .bind(business_id)
    .bind(kind.as_str())
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|(version,)| version as Version))
}

/// Insert a new entity. Returns false if one with the same key exists.
pub async fn insert_entity<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    record: &EntityRecord,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO sync_entities (
            business_id, kind, id, server_id, version, payload, created_at,
            last_modified, client_modified, modified_by, voided, void_reason
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (business_id, kind, id) DO NOTHING
        "#,
    )
    .bind(business_id)
    .bind(record.kind.as_str())
    .bind(&record.id)
    .bind(&record.server_id)
    .bind(record.version as i64)
    .bind(&record.payload)
    .bind(record.created_at as i64)
    .bind(record.last_modified as i64)
    .bind(record.client_modified as i64)
    .bind(&record.modified_by)
    .bind(record.voided)
    .bind(&record.void_reason)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Replace an entity if its stored version is still `expected`.
/// Returns false when the guard did not match.
pub async fn replace_entity<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    record: &EntityRecord,
    expected: Version,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE sync_entities
        SET version = $4, payload = $5, last_modified = $6, client_modified = $7,
            modified_by = $8, voided = $9, void_reason = $10
        WHERE business_id = $1 AND kind = $2 AND id = $3 AND version = $11
        "#,
    )
    .bind(business_id)
    .bind(record.kind.as_str())
    .bind(&record.id)
    .bind(record.version as i64)
    .bind(&record.payload)
    .bind(record.last_modified as i64)
    .bind(record.client_modified as i64)
    .bind(&record.modified_by)
    .bind(record.voided)
    .bind(&record.void_reason)
    .bind(expected as i64)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}
