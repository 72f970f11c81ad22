//! Ingestion row operations
//!
//! Every status-changing UPDATE is conditional on the current status so a
//! stale writer can never move a terminal ingestion. Callers learn whether
//! the transition happened from the returned `bool`.

use chrono::Utc;
use manthan_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::models::{Ingestion, IngestionStatus, MarketHints, StageName};

const SELECT_COLUMNS: &str = r#"
    SELECT id, project_id, source_file_url, mime_type, region, language, platforms,
           status, progress, current_step_index, failed_step, error, created_at, updated_at
    FROM ingestions
"#;

/// Insert a new ingestion row
pub async fn insert_ingestion(conn: &mut SqliteConnection, ingestion: &Ingestion) -> Result<()> {
    let platforms = serde_json::to_string(&ingestion.hints.platforms)?;

    sqlx::query(
        r#"
        INSERT INTO ingestions (
            id, project_id, source_file_url, mime_type, region, language, platforms,
            status, progress, current_step_index, failed_step, error, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(ingestion.id.to_string())
    .bind(&ingestion.project_id)
    .bind(&ingestion.source_file_url)
    .bind(&ingestion.mime_type)
    .bind(&ingestion.hints.region)
    .bind(&ingestion.hints.language)
    .bind(platforms)
    .bind(ingestion.status.as_str())
    .bind(ingestion.progress as i64)
    .bind(ingestion.current_step_index as i64)
    .bind(ingestion.failed_step.map(|s| s.as_str()))
    .bind(&ingestion.error)
    .bind(ingestion.created_at.to_rfc3339())
    .bind(ingestion.updated_at.to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

/// Load one ingestion
pub async fn load_ingestion(pool: &SqlitePool, id: Uuid) -> Result<Option<Ingestion>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|row| ingestion_from_row(&row)).transpose()
}

/// All ingestions in `status`, oldest first
pub async fn list_by_status(pool: &SqlitePool, status: IngestionStatus) -> Result<Vec<Ingestion>> {
    let rows = sqlx::query(&format!(
        "{} WHERE status = ? ORDER BY created_at ASC",
        SELECT_COLUMNS
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(ingestion_from_row).collect()
}

/// Conditional status transition `from` → `to`
pub async fn transition(
    conn: &mut SqliteConnection,
    id: Uuid,
    from: IngestionStatus,
    to: IngestionStatus,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE ingestions SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .bind(from.as_str())
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Move a running ingestion past stage `expected_index`
///
/// The index guard keeps `current_step_index` monotonic even if two writers
/// ever raced on the same row.
pub async fn advance(
    conn: &mut SqliteConnection,
    id: Uuid,
    expected_index: usize,
    next_index: usize,
    progress: u8,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ingestions
        SET current_step_index = ?, progress = ?, updated_at = ?
        WHERE id = ? AND status = 'running' AND current_step_index = ? AND ? > current_step_index
        "#,
    )
    .bind(next_index as i64)
    .bind(progress as i64)
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .bind(expected_index as i64)
    .bind(next_index as i64)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Mark a running ingestion failed at `stage`
pub async fn mark_failed(
    conn: &mut SqliteConnection,
    id: Uuid,
    stage: StageName,
    error: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ingestions
        SET status = 'failed', failed_step = ?, error = ?, updated_at = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(stage.as_str())
    .bind(error)
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Mark a running ingestion succeeded with full progress
pub async fn mark_succeeded(conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ingestions
        SET status = 'succeeded', progress = 100, updated_at = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Claim a failed ingestion for retry: `failed` → `running`, failure cleared
pub async fn claim_retry(conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ingestions
        SET status = 'running', failed_step = NULL, error = NULL, updated_at = ?
        WHERE id = ? AND status = 'failed'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn ingestion_from_row(row: &SqliteRow) -> Result<Ingestion> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let platforms: String = row.get("platforms");
    let failed_step: Option<String> = row.get("failed_step");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Ingestion {
        id: parse_uuid(&id, "ingestions.id")?,
        project_id: row.get("project_id"),
        source_file_url: row.get("source_file_url"),
        mime_type: row.get("mime_type"),
        hints: MarketHints {
            region: row.get("region"),
            language: row.get("language"),
            platforms: serde_json::from_str(&platforms)?,
        },
        status: status.parse()?,
        progress: row.get::<i64, _>("progress").clamp(0, 100) as u8,
        current_step_index: row.get::<i64, _>("current_step_index").max(0) as usize,
        failed_step: failed_step.map(|s| s.parse()).transpose()?,
        error: row.get("error"),
        created_at: parse_timestamp(&created_at, "ingestions.created_at")?,
        updated_at: parse_timestamp(&updated_at, "ingestions.updated_at")?,
    })
}
