//! Database operations for the idempotency table.

use shopsync_engine::OperationResult;
use sqlx::{types::Json, PgExecutor};

/// Recorded result of an operation.
pub async fn find_result<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    op_id: &str,
) -> Result<Option<OperationResult>, sqlx::Error> {
    let row: Option<(Json<OperationResult>,)> = sqlx::query_as(
        r#"SELECT result FROM sync_results WHERE business_id = $1 AND op_id = $2"#,
    )
    .bind(business_id)
    .bind(op_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|(Json(result),)| result))
}

/// Insert a result. Fails with a unique violation if the op_id is recorded.
pub async fn insert_result<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    result: &OperationResult,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sync_results (business_id, op_id, result, recorded_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(business_id)
    .bind(&result.op_id)
    .bind(Json(result))
    .bind(result.server_timestamp as i64)
    .execute(executor)
    .await?;

    Ok(())
}
