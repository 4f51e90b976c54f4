//! SQLite persistence
//!
//! Only quota counters survive a restart; all other admission state is
//! rebuilt from scratch.

pub mod quota_store;

use crate::error::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Open (creating if needed) the database at `path` and ensure the schema
pub async fn open(path: &Path) -> Result<Pool<Sqlite>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&db_url)
        .await?;

    init_schema(&pool).await?;
    info!("Connected to database: {}", path.display());
    Ok(pool)
}

/// Create tables that do not exist yet
pub async fn init_schema(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quota_usage (
            scope TEXT NOT NULL,
            period TEXT NOT NULL,
            period_start TEXT NOT NULL,
            used INTEGER NOT NULL,
            PRIMARY KEY (scope, period)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}
