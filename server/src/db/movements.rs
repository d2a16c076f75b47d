//! Database operations for the stock ledger.

use shopsync_engine::{AdjustmentReason, StockCheckpoint, StockMovement, StoreError};
use sqlx::{PgExecutor, Row};
use std::collections::HashMap;

/// A stored movement row from the database.
#[derive(Debug)]
pub struct StoredMovement {
    pub product_id: String,
    pub sequence: i64,
    pub delta: i64,
    pub reason: String,
    pub resulting_quantity: i64,
    pub op_id: String,
    pub device_id: String,
    pub applied_at: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredMovement {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredMovement {
            product_id: row.try_get("product_id")?,
            sequence: row.try_get("sequence")?,
            delta: row.try_get("delta")?,
            reason: row.try_get("reason")?,
            resulting_quantity: row.try_get("resulting_quantity")?,
            op_id: row.try_get("op_id")?,
            device_id: row.try_get("device_id")?,
            applied_at: row.try_get("applied_at")?,
        })
    }
}

impl StoredMovement {
    /// Convert database row to an engine movement.
    pub fn into_movement(self) -> Result<StockMovement, StoreError> {
        let reason = AdjustmentReason::parse(&self.reason).ok_or_else(|| {
            StoreError::Invalid(format!("unknown adjustment reason: {}", self.reason))
        })?;

        Ok(StockMovement {
            product_id: self.product_id,
            sequence: self.sequence as u64,
            delta: self.delta,
            reason,
            resulting_quantity: self.resulting_quantity,
            op_id: self.op_id,
            device_id: self.device_id,
            applied_at: self.applied_at as u64,
        })
    }
}

/// Highest sequence in a product's ledger, 0 when empty.
pub async fn last_sequence<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    product_id: &str,
) -> Result<u64, sqlx::Error> {
    let (sequence,): (i64,) = sqlx::query_as(
        r#"
        SELECT COALESCE(MAX(sequence), 0) FROM stock_movements
        WHERE business_id = $1 AND product_id = $2
        "#,
    )
    .bind(business_id)
    .bind(product_id)
    .fetch_one(executor)
    .await?;

    Ok(sequence as u64)
}

/// Insert a movement. Fails with a unique violation if the sequence is taken.
pub async fn insert_movement<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    movement: &StockMovement,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            business_id, product_id, sequence, delta, reason,
            resulting_quantity, op_id, device_id, applied_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(business_id)
    .bind(&movement.product_id)
    .bind(movement.sequence as i64)
    .bind(movement.delta)
    .bind(movement.reason.as_str())
    .bind(movement.resulting_quantity)
    .bind(&movement.op_id)
    .bind(&movement.device_id)
    .bind(movement.applied_at as i64)
    .execute(executor)
    .await?;

    Ok(())
}

/// Movements after `after_sequence`, oldest first.
pub async fn movements_after<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    product_id: &str,
    after_sequence: u64,
) -> Result<Vec<StoredMovement>, sqlx::Error> {
    sqlx::query_as::<_, StoredMovement>(
        r#"
        SELECT product_id, sequence, delta, reason, resulting_quantity,
               op_id, device_id, applied_at
        FROM stock_movements
        WHERE business_id = $1 AND product_id = $2 AND sequence > $3
        ORDER BY sequence ASC
        "#,
    )
    .bind(business_id)
    .bind(product_id)
    .bind(after_sequence as i64)
    .fetch_all(executor)
    .await
}

/// Up to `limit` movements, newest first.
pub async fn movement_history<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    product_id: &str,
    limit: i64,
) -> Result<Vec<StoredMovement>, sqlx::Error> {
    sqlx::query_as::<_, StoredMovement>(
        r#"
        SELECT product_id, sequence, delta, reason, resulting_quantity,
               op_id, device_id, applied_at
        FROM stock_movements
        WHERE business_id = $1 AND product_id = $2
        ORDER BY sequence DESC
        LIMIT $3
        "#,
    )
    .bind(business_id)
    .bind(product_id)
    .bind(limit)
    .fetch_all(executor)
    .await
}

/// Resulting quantity of the newest movement of every product.
pub async fn latest_quantities<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
) -> Result<HashMap<String, i64>, sqlx::Error> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT DISTINCT ON (product_id) product_id, resulting_quantity
        FROM stock_movements
        WHERE business_id = $1
        ORDER BY product_id, sequence DESC
        "#,
    )
    .bind(business_id)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().collect())
}

pub async fn get_checkpoint<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    product_id: &str,
) -> Result<Option<StockCheckpoint>, sqlx::Error> {
    let row: Option<(i64, i64, i64)> = sqlx::query_as(
        r#"
        SELECT quantity, sequence, taken_at FROM stock_checkpoints
        WHERE business_id = $1 AND product_id = $2
        "#,
    )
    .bind(business_id)
    .bind(product_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|(quantity, sequence, taken_at)| StockCheckpoint {
        product_id: product_id.to_string(),
        quantity,
        sequence: sequence as u64,
        taken_at: taken_at as u64,
    }))
}

/// Store a checkpoint unless a newer one is already there.
pub async fn save_checkpoint<'e>(
    executor: impl PgExecutor<'e>,
    business_id: &str,
    checkpoint: &StockCheckpoint,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO stock_checkpoints (business_id, product_id, quantity, sequence, taken_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (business_id, product_id) DO UPDATE
        SET quantity = EXCLUDED.quantity,
            sequence = EXCLUDED.sequence,
            taken_at = EXCLUDED.taken_at
        WHERE stock_checkpoints.sequence < EXCLUDED.sequence
        "#,
    )
    .bind(business_id)
    .bind(&checkpoint.product_id)
    .bind(checkpoint.quantity)
    .bind(checkpoint.sequence as i64)
    .bind(checkpoint.taken_at as i64)
    .execute(executor)
    .await?;

    Ok(())
}
