//! Database access for manthan-ingest
//!
//! SQLite persistence for ingestions, their step records, and packages.
//! The pipeline engine only talks to the database through
//! [`IngestionStateStore`]; the free functions in the submodules are the
//! SQL behind [`SqliteStateStore`].

pub mod ingestions;
pub mod packages;
pub mod retry;
pub mod steps;
pub mod store;

pub use retry::retry_on_lock;
pub use store::{IngestionStateStore, SqliteStateStore, StepCompletion};

use manthan_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Initialize database connection pool
///
/// Opens (creating if needed) the SQLite file at `db_path` in WAL mode with
/// foreign keys enforced, then creates the manthan-ingest tables.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!("Connecting to database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create manthan-ingest tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestions (
            id TEXT PRIMARY KEY,
            project_id TEXT,
            source_file_url TEXT NOT NULL,
            mime_type TEXT,
            region TEXT,
            language TEXT,
            platforms TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            current_step_index INTEGER NOT NULL DEFAULT 0,
            failed_step TEXT,
            error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS steps (
            id TEXT PRIMARY KEY,
            ingestion_id TEXT NOT NULL REFERENCES ingestions(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            output TEXT NOT NULL DEFAULT '{}',
            error TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            started_at TEXT,
            finished_at TEXT,
            UNIQUE (ingestion_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS packages (
            id TEXT PRIMARY KEY,
            ingestion_id TEXT NOT NULL UNIQUE REFERENCES ingestions(id) ON DELETE CASCADE,
            document_url TEXT,
            deck_url TEXT,
            summary TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ingestions_status ON ingestions (status)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (ingestions, steps, packages)");

    Ok(())
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(value).map_err(|e| {
        manthan_common::Error::Internal(format!("Failed to parse {} '{}': {}", column, value, e))
    })
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| {
            manthan_common::Error::Internal(format!("Failed to parse {} '{}': {}", column, value, e))
        })
}
