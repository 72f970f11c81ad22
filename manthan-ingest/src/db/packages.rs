//! Package row operations

use manthan_common::Result;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::models::Package;

/// Insert the package; fails on a second package for the same ingestion
pub async fn insert_package(conn: &mut SqliteConnection, package: &Package) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO packages (id, ingestion_id, document_url, deck_url, summary, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(package.id.to_string())
    .bind(package.ingestion_id.to_string())
    .bind(&package.document_url)
    .bind(&package.deck_url)
    .bind(serde_json::to_string(&package.summary)?)
    .bind(package.created_at.to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

/// Load the package of an ingestion, if it has one
pub async fn load_package(pool: &SqlitePool, ingestion_id: Uuid) -> Result<Option<Package>> {
    let row = sqlx::query(
        r#"
        SELECT id, ingestion_id, document_url, deck_url, summary, created_at
        FROM packages
        WHERE ingestion_id = ?
        "#,
    )
    .bind(ingestion_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let id: String = row.get("id");
    let owner: String = row.get("ingestion_id");
    let summary: String = row.get("summary");
    let created_at: String = row.get("created_at");

    Ok(Some(Package {
        id: parse_uuid(&id, "packages.id")?,
        ingestion_id: parse_uuid(&owner, "packages.ingestion_id")?,
        document_url: row.get("document_url"),
        deck_url: row.get("deck_url"),
        summary: serde_json::from_str(&summary)?,
        created_at: parse_timestamp(&created_at, "packages.created_at")?,
    }))
}
