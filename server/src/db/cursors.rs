//! Database operations for device sync cursors.

use shopsync_engine::{SyncCursor, Timestamp};
use sqlx::{PgExecutor, Row};

pub async fn get_cursor<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    device_id: &str,
) -> Result<Option<Timestamp>, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT last_sync_time FROM sync_cursors
        WHERE business_id = $1 AND device_id = $2
        "#,
    )
    .bind(business_id)
    .bind(device_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|(at,)| at as Timestamp))
}

/// Move a cursor forward and return the stored value.
pub async fn advance_cursor<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    device_id: &str,
    at: Timestamp,
) -> Result<Timestamp, sqlx::Error> {
    let (stored,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO sync_cursors (business_id, device_id, last_sync_time)
        VALUES ($1, $2, $3)
        ON CONFLICT (business_id, device_id) DO UPDATE
        SET last_sync_time = GREATEST(sync_cursors.last_sync_time, EXCLUDED.last_sync_time)
        RETURNING last_sync_time
        "#,
    )
    .bind(business_id)
    .bind(device_id)
    .bind(at as i64)
    .fetch_one(executor)
    .await?;

    Ok(stored as Timestamp)
}

pub async fn list_cursors<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
) -> Result<Vec<SyncCursor>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT device_id, last_sync_time FROM sync_cursors
        WHERE business_id = $1
        ORDER BY device_id ASC
        "#,
    )
    .bind(business_id)
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(SyncCursor {
                business_id: business_id.to_string(),
                device_id: row.try_get("device_id")?,
                last_sync_time: row.try_get::<i64, _>("last_sync_time")? as Timestamp,
            })
        })
        .collect()
}

/// Entity writes and movements newer than `since`, not made by `excluding_device`.
pub async fn count_changes_since<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    since: Option<Timestamp>,
    excluding_device: Option<&str>,
) -> Result<u64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM sync_entities
             WHERE business_id = $1
               AND ($2::BIGINT IS NULL OR last_modified > $2)
               AND ($3::TEXT IS NULL OR modified_by <> $3))
          + (SELECT COUNT(*) FROM stock_movements
             WHERE business_id = $1
               AND ($2::BIGINT IS NULL OR applied_at > $2)
               AND ($3::TEXT IS NULL OR device_id <> $3))
        "#,
    )
    .bind(business_id)
    .bind(since.map(|at| at as i64))
    .bind(excluding_device)
    .fetch_one(executor)
    .await?;

    Ok(count as u64)
}
