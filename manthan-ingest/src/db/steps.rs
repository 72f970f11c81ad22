//! Step row operations

use chrono::Utc;
use manthan_common::Result;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::models::{Step, StepStatus};

/// Insert a step row
pub async fn insert_step(conn: &mut SqliteConnection, step: &Step) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO steps (
            id, ingestion_id, position, name, status, output, error, attempts, started_at, finished_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(step.id.to_string())
    .bind(step.ingestion_id.to_string())
    .bind(step.position as i64)
    .bind(step.name.as_str())
    .bind(step.status.as_str())
    .bind(serde_json::to_string(&step.output)?)
    .bind(&step.error)
    .bind(step.attempts as i64)
    .bind(step.started_at.map(|t| t.to_rfc3339()))
    .bind(step.finished_at.map(|t| t.to_rfc3339()))
    .execute(conn)
    .await?;

    Ok(())
}

/// Steps of one ingestion in pipeline order
pub async fn list_steps(pool: &SqlitePool, ingestion_id: Uuid) -> Result<Vec<Step>> {
    let rows = sqlx::query(
        r#"
        SELECT id, ingestion_id, position, name, status, output, error, attempts, started_at, finished_at
        FROM steps
        WHERE ingestion_id = ?
        ORDER BY position ASC
        "#,
    )
    .bind(ingestion_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(step_from_row).collect()
}

/// Start (or restart after a crash) the step at `position`
///
/// Only a `queued` or interrupted `running` step can be started; completed
/// steps are never re-executed.
pub async fn mark_running(
    conn: &mut SqliteConnection,
    ingestion_id: Uuid,
    position: usize,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE steps
        SET status = 'running', attempts = attempts + 1, error = NULL,
            started_at = ?, finished_at = NULL
        WHERE ingestion_id = ? AND position = ? AND status IN ('queued', 'running')
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(ingestion_id.to_string())
    .bind(position as i64)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record a running step's outcome
pub async fn finish(
    conn: &mut SqliteConnection,
    ingestion_id: Uuid,
    position: usize,
    status: StepStatus,
    output: &Value,
    error: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE steps
        SET status = ?, output = ?, error = ?, finished_at = ?
        WHERE ingestion_id = ? AND position = ? AND status = 'running'
        "#,
    )
    .bind(status.as_str())
    .bind(serde_json::to_string(output)?)
    .bind(error)
    .bind(Utc::now().to_rfc3339())
    .bind(ingestion_id.to_string())
    .bind(position as i64)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Put a failed step back to `queued` for retry
pub async fn requeue_failed(
    conn: &mut SqliteConnection,
    ingestion_id: Uuid,
    position: usize,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE steps
        SET status = 'queued', error = NULL, finished_at = NULL
        WHERE ingestion_id = ? AND position = ? AND status = 'failed'
        "#,
    )
    .bind(ingestion_id.to_string())
    .bind(position as i64)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn step_from_row(row: &SqliteRow) -> Result<Step> {
    let id: String = row.get("id");
    let ingestion_id: String = row.get("ingestion_id");
    let name: String = row.get("name");
    let status: String = row.get("status");
    let output: String = row.get("output");
    let started_at: Option<String> = row.get("started_at");
    let finished_at: Option<String> = row.get("finished_at");

    Ok(Step {
        id: parse_uuid(&id, "steps.id")?,
        ingestion_id: parse_uuid(&ingestion_id, "steps.ingestion_id")?,
        position: row.get::<i64, _>("position").max(0) as usize,
        name: name.parse()?,
        status: status.parse()?,
        output: serde_json::from_str(&output)?,
        error: row.get("error"),
        attempts: row.get::<i64, _>("attempts").max(0) as u32,
        started_at: started_at
            .map(|t| parse_timestamp(&t, "steps.started_at"))
            .transpose()?,
        finished_at: finished_at
            .map(|t| parse_timestamp(&t, "steps.finished_at"))
            .transpose()?,
    })
}
