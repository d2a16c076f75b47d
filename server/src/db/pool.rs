//! Database connection pool management.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Type alias for the database pool.
pub type Pool = PgPool;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> Result<Pool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Run database migrations.
pub async fn run_migrations(pool: &Pool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Register a business if it is not known yet.
pub async fn ensure_business(pool: &Pool, business_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(r#"INSERT INTO businesses (id) VALUES ($1) ON CONFLICT (id) DO NOTHING"#)
        .bind(business_id)
        .execute(pool)
        .await?;
    Ok(())
}
