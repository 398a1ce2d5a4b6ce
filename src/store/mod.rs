// =============================================================================
// Persistence layer — trades, credentials, settings
// =============================================================================

pub mod credentials;
pub mod settings;
pub mod trades;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Connect to Postgres and bring the schema up to date.
///
/// Migrations are idempotent, so every process runs them at startup and the
/// first one to arrive wins.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    info!("database connected");
    Ok(pool)
}
