//! Durable ingestion state store
//!
//! [`IngestionStateStore`] is the only persistence surface the pipeline
//! engine sees. Each method that touches more than one row runs in a single
//! transaction, so a crash between the step update and the ingestion update
//! can never leave them disagreeing.

use async_trait::async_trait;
use manthan_common::Result;
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use super::{ingestions, packages, steps};
use crate::models::{Ingestion, IngestionStatus, Package, StageName, Step, StepStatus};

/// Outcome of a successfully finished stage
#[derive(Debug, Clone)]
pub struct StepCompletion {
    /// Position of the stage that finished
    pub position: usize,
    /// `Succeeded` or `Skipped`
    pub status: StepStatus,
    pub output: Value,
    /// New `current_step_index`; always `position + 1`
    pub next_index: usize,
    pub progress: u8,
}

/// Persistence operations used by the pipeline engine and the API
///
/// Methods returning `bool` report whether the guarded transition applied.
/// `false` means the row was not in the expected state and nothing changed.
#[async_trait]
pub trait IngestionStateStore: Send + Sync {
    /// Persist a new ingestion with one `queued` step per stage
    async fn create_ingestion(&self, ingestion: &Ingestion) -> Result<Vec<Step>>;

    async fn get_ingestion(&self, id: Uuid) -> Result<Option<Ingestion>>;

    async fn list_steps(&self, id: Uuid) -> Result<Vec<Step>>;

    async fn get_package(&self, id: Uuid) -> Result<Option<Package>>;

    async fn list_by_status(&self, status: IngestionStatus) -> Result<Vec<Ingestion>>;

    /// Conditional ingestion status change `from` → `to`
    async fn transition(&self, id: Uuid, from: IngestionStatus, to: IngestionStatus)
        -> Result<bool>;

    /// `failed` → `running` and requeue the failed step at `position`
    async fn claim_retry(&self, id: Uuid, position: usize) -> Result<bool>;

    /// Mark the step at `position` running and count the attempt
    async fn start_step(&self, id: Uuid, position: usize) -> Result<bool>;

    /// Record a finished step and advance the ingestion past it
    async fn complete_step(&self, id: Uuid, completion: &StepCompletion) -> Result<bool>;

    /// Record a failed step and fail the ingestion
    async fn fail_step(
        &self,
        id: Uuid,
        stage: StageName,
        error: &str,
        partial_output: &Value,
    ) -> Result<bool>;

    /// Store the package and mark the ingestion succeeded
    async fn finalize(&self, id: Uuid, package: &Package) -> Result<bool>;
}

/// SQLite implementation of [`IngestionStateStore`]
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl IngestionStateStore for SqliteStateStore {
    async fn create_ingestion(&self, ingestion: &Ingestion) -> Result<Vec<Step>> {
        let steps: Vec<Step> = StageName::ALL
            .iter()
            .map(|stage| Step::queued(ingestion.id, *stage))
            .collect();

        retry_on_lock("create_ingestion", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let mut tx = self.pool.begin().await?;
            ingestions::insert_ingestion(&mut tx, ingestion).await?;
            for step in &steps {
                steps::insert_step(&mut tx, step).await?;
            }
            tx.commit().await?;
            Ok(())
        })
        .await?;

        Ok(steps)
    }

    async fn get_ingestion(&self, id: Uuid) -> Result<Option<Ingestion>> {
        ingestions::load_ingestion(&self.pool, id).await
    }

    async fn list_steps(&self, id: Uuid) -> Result<Vec<Step>> {
        steps::list_steps(&self.pool, id).await
    }

    async fn get_package(&self, id: Uuid) -> Result<Option<Package>> {
        packages::load_package(&self.pool, id).await
    }

    async fn list_by_status(&self, status: IngestionStatus) -> Result<Vec<Ingestion>> {
        ingestions::list_by_status(&self.pool, status).await
    }

    async fn transition(
        &self,
        id: Uuid,
        from: IngestionStatus,
        to: IngestionStatus,
    ) -> Result<bool> {
        retry_on_lock("transition", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let mut conn = self.pool.acquire().await?;
            ingestions::transition(&mut conn, id, from, to).await
        })
        .await
    }

    async fn claim_retry(&self, id: Uuid, position: usize) -> Result<bool> {
        retry_on_lock("claim_retry", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let mut tx = self.pool.begin().await?;
            if !ingestions::claim_retry(&mut tx, id).await? {
                return Ok(false);
            }
            if !steps::requeue_failed(&mut tx, id, position).await? {
                tracing::warn!(
                    ingestion_id = %id,
                    position,
                    "Retry claimed but step was not failed, rolling back"
                );
                return Ok(false);
            }
            tx.commit().await?;
            Ok(true)
        })
        .await
    }

    async fn start_step(&self, id: Uuid, position: usize) -> Result<bool> {
        retry_on_lock("start_step", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let mut conn = self.pool.acquire().await?;
            steps::mark_running(&mut conn, id, position).await
        })
        .await
    }

    async fn complete_step(&self, id: Uuid, completion: &StepCompletion) -> Result<bool> {
        retry_on_lock("complete_step", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let mut tx = self.pool.begin().await?;
            let step_done = steps::finish(
                &mut tx,
                id,
                completion.position,
                completion.status,
                &completion.output,
                None,
            )
            .await?;
            if !step_done {
                return Ok(false);
            }
            let advanced = ingestions::advance(
                &mut tx,
                id,
                completion.position,
                completion.next_index,
                completion.progress,
            )
            .await?;
            if !advanced {
                return Ok(false);
            }
            tx.commit().await?;
            Ok(true)
        })
        .await
    }

    async fn fail_step(
        &self,
        id: Uuid,
        stage: StageName,
        error: &str,
        partial_output: &Value,
    ) -> Result<bool> {
        retry_on_lock("fail_step", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let mut tx = self.pool.begin().await?;
            let step_failed = steps::finish(
                &mut tx,
                id,
                stage.index(),
                StepStatus::Failed,
                partial_output,
                Some(error),
            )
            .await?;
            if !step_failed || !ingestions::mark_failed(&mut tx, id, stage, error).await? {
                return Ok(false);
            }
            tx.commit().await?;
            Ok(true)
        })
        .await
    }

    async fn finalize(&self, id: Uuid, package: &Package) -> Result<bool> {
        retry_on_lock("finalize", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let mut tx = self.pool.begin().await?;
            if !ingestions::mark_succeeded(&mut tx, id).await? {
                return Ok(false);
            }
            packages::insert_package(&mut tx, package).await?;
            tx.commit().await?;
            Ok(true)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database_pool;
    use crate::models::NewIngestion;
    use serde_json::json;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStateStore) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database_pool(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        (temp_dir, SqliteStateStore::new(pool))
    }

    fn ingestion() -> Ingestion {
        Ingestion::new(NewIngestion {
            source_file_url: "https://x/test.fdx".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_create_persists_six_queued_steps() {
        let (_dir, store) = store().await;
        let ingestion = ingestion();
        store.create_ingestion(&ingestion).await.unwrap();

        let loaded = store.get_ingestion(ingestion.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, IngestionStatus::Queued);
        assert_eq!(loaded.source_file_url, "https://x/test.fdx");

        let steps = store.list_steps(ingestion.id).await.unwrap();
        assert_eq!(steps.len(), StageName::COUNT);
        for (i, step) in steps.iter().enumerate() {
            assert_eq!(step.position, i);
            assert_eq!(step.name, StageName::ALL[i]);
            assert_eq!(step.status, StepStatus::Queued);
        }
    }

    #[tokio::test]
    async fn test_unknown_ingestion_is_none() {
        let (_dir, store) = store().await;
        assert!(store.get_ingestion(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.get_package(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let (_dir, store) = store().await;
        let ingestion = ingestion();
        store.create_ingestion(&ingestion).await.unwrap();

        assert!(store
            .transition(ingestion.id, IngestionStatus::Queued, IngestionStatus::Running)
            .await
            .unwrap());
        // Second claim loses
        assert!(!store
            .transition(ingestion.id, IngestionStatus::Queued, IngestionStatus::Running)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_complete_step_advances_together() {
        let (_dir, store) = store().await;
        let ingestion = ingestion();
        store.create_ingestion(&ingestion).await.unwrap();
        store
            .transition(ingestion.id, IngestionStatus::Queued, IngestionStatus::Running)
            .await
            .unwrap();

        assert!(store.start_step(ingestion.id, 0).await.unwrap());
        let completion = StepCompletion {
            position: 0,
            status: StepStatus::Succeeded,
            output: json!({"format": "fdx"}),
            next_index: 1,
            progress: 16,
        };
        assert!(store.complete_step(ingestion.id, &completion).await.unwrap());

        let loaded = store.get_ingestion(ingestion.id).await.unwrap().unwrap();
        assert_eq!(loaded.current_step_index, 1);
        assert_eq!(loaded.progress, 16);

        let steps = store.list_steps(ingestion.id).await.unwrap();
        assert_eq!(steps[0].status, StepStatus::Succeeded);
        assert_eq!(steps[0].output["format"], "fdx");
        assert_eq!(steps[0].attempts, 1);
        assert!(steps[0].finished_at.is_some());

        // Replaying the same completion is rejected and changes nothing
        assert!(!store.complete_step(ingestion.id, &completion).await.unwrap());
        let loaded = store.get_ingestion(ingestion.id).await.unwrap().unwrap();
        assert_eq!(loaded.current_step_index, 1);
    }

    #[tokio::test]
    async fn test_fail_then_retry_requeues_only_failed_step() {
        let (_dir, store) = store().await;
        let ingestion = ingestion();
        store.create_ingestion(&ingestion).await.unwrap();
        store
            .transition(ingestion.id, IngestionStatus::Queued, IngestionStatus::Running)
            .await
            .unwrap();
        store.start_step(ingestion.id, 0).await.unwrap();

        assert!(store
            .fail_step(
                ingestion.id,
                StageName::ScriptPreprocess,
                "boom",
                &json!({"partial": true})
            )
            .await
            .unwrap());

        let failed = store.get_ingestion(ingestion.id).await.unwrap().unwrap();
        assert_eq!(failed.status, IngestionStatus::Failed);
        assert_eq!(failed.failed_step, Some(StageName::ScriptPreprocess));
        assert_eq!(failed.error.as_deref(), Some("boom"));

        let steps = store.list_steps(ingestion.id).await.unwrap();
        assert_eq!(steps[0].status, StepStatus::Failed);
        assert_eq!(steps[0].output["partial"], true);
        assert_eq!(steps[1].status, StepStatus::Queued);

        assert!(store.claim_retry(ingestion.id, 0).await.unwrap());
        let retried = store.get_ingestion(ingestion.id).await.unwrap().unwrap();
        assert_eq!(retried.status, IngestionStatus::Running);
        assert!(retried.failed_step.is_none());
        assert!(retried.error.is_none());
        let steps = store.list_steps(ingestion.id).await.unwrap();
        assert_eq!(steps[0].status, StepStatus::Queued);

        // Not failed any more
        assert!(!store.claim_retry(ingestion.id, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_finalize_writes_package_once() {
        let (_dir, store) = store().await;
        let ingestion = ingestion();
        store.create_ingestion(&ingestion).await.unwrap();
        store
            .transition(ingestion.id, IngestionStatus::Queued, IngestionStatus::Running)
            .await
            .unwrap();

        let package = Package::assemble(
            ingestion.id,
            &json!({"budget": {"tier": "mid"}}),
            &json!({"deck_url": "template_placeholder.png"}),
        );
        assert!(store.finalize(ingestion.id, &package).await.unwrap());

        let done = store.get_ingestion(ingestion.id).await.unwrap().unwrap();
        assert_eq!(done.status, IngestionStatus::Succeeded);
        assert_eq!(done.progress, 100);

        let stored = store.get_package(ingestion.id).await.unwrap().unwrap();
        assert_eq!(stored.deck_url.as_deref(), Some("template_placeholder.png"));
        assert_eq!(stored.summary["budget"]["tier"], "mid");

        let again = Package::assemble(ingestion.id, &json!({}), &json!({}));
        assert!(!store.finalize(ingestion.id, &again).await.unwrap());
    }
}
