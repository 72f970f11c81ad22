//! Pipeline engine
//!
//! Drives one ingestion through the fixed stage sequence, persisting every
//! transition before moving on. Runs are claimed with a conditional status
//! update in the store plus an entry in the in-process run registry, so an
//! ingestion never has two drive loops at once.
//!
//! Pause is cooperative: the registry holds a [`CancellationToken`] per
//! active run, and the drive loop checks it only between stages.

use chrono::Utc;
use manthan_common::events::{EventBus, PipelineEvent};
use manthan_common::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::{AccumulatedMetadata, StageOutcome, StepExecutor};
use crate::db::{IngestionStateStore, StepCompletion};
use crate::models::{
    progress_for, Ingestion, IngestionStatus, NewIngestion, Package, StageName, Step, StepStatus,
};

/// Why a run is being claimed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTrigger {
    /// First run of a `queued` ingestion
    Start,
    /// Continue a `paused` ingestion at its next stage
    Resume,
    /// Re-run a `failed` ingestion from the failed stage
    Retry,
}

impl RunTrigger {
    fn required_status(&self) -> IngestionStatus {
        match self {
            RunTrigger::Start => IngestionStatus::Queued,
            RunTrigger::Resume => IngestionStatus::Paused,
            RunTrigger::Retry => IngestionStatus::Failed,
        }
    }
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunTrigger::Start => "start",
            RunTrigger::Resume => "resume",
            RunTrigger::Retry => "retry",
        })
    }
}

#[derive(Clone)]
pub struct PipelineEngine {
    store: Arc<dyn IngestionStateStore>,
    executor: Arc<StepExecutor>,
    event_bus: EventBus,
    /// Pause signals for runs driven by this process
    active_runs: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    auto_start: bool,
}

impl PipelineEngine {
    pub fn new(
        store: Arc<dyn IngestionStateStore>,
        executor: StepExecutor,
        event_bus: EventBus,
        auto_start: bool,
    ) -> Self {
        Self {
            store,
            executor: Arc::new(executor),
            event_bus,
            active_runs: Arc::new(RwLock::new(HashMap::new())),
            auto_start,
        }
    }

    /// Whether newly created ingestions should be launched immediately
    pub fn auto_start(&self) -> bool {
        self.auto_start
    }

    /// Validate and persist a new `queued` ingestion with its six steps
    pub async fn create(&self, request: NewIngestion) -> Result<Ingestion> {
        request.validate()?;

        let ingestion = Ingestion::new(request);
        self.store.create_ingestion(&ingestion).await?;

        info!(
            ingestion_id = %ingestion.id,
            source_file_url = %ingestion.source_file_url,
            "Ingestion created"
        );
        self.event_bus.emit_lossy(PipelineEvent::IngestionCreated {
            ingestion_id: ingestion.id,
            source_file_url: ingestion.source_file_url.clone(),
            timestamp: Utc::now(),
        });

        Ok(ingestion)
    }

    pub async fn get(&self, id: Uuid) -> Result<Ingestion> {
        self.store
            .get_ingestion(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Ingestion not found: {}", id)))
    }

    pub async fn steps(&self, id: Uuid) -> Result<Vec<Step>> {
        self.get(id).await?;
        self.store.list_steps(id).await
    }

    pub async fn package(&self, id: Uuid) -> Result<Package> {
        let ingestion = self.get(id).await?;
        self.store.get_package(id).await?.ok_or_else(|| {
            Error::NotFound(format!(
                "No package for ingestion {} (status {})",
                id,
                ingestion.status.as_str()
            ))
        })
    }

    /// Claim and drive a run to completion, failure or pause
    pub async fn run(&self, id: Uuid, trigger: RunTrigger) -> Result<Ingestion> {
        let token = self.claim(id, trigger).await?;
        self.drive(id, token).await;
        self.get(id).await
    }

    /// Claim a run and drive it on a background task
    ///
    /// Returns the ingestion as it stands right after the claim.
    pub async fn launch(&self, id: Uuid, trigger: RunTrigger) -> Result<Ingestion> {
        let token = self.claim(id, trigger).await?;
        self.spawn_drive(id, token);
        self.get(id).await
    }

    /// Request a pause
    ///
    /// A `running` ingestion stops at the next stage boundary; a `queued`
    /// one moves straight to `paused`.
    pub async fn pause(&self, id: Uuid) -> Result<Ingestion> {
        let ingestion = self.get(id).await?;

        match ingestion.status {
            IngestionStatus::Running => {
                let token = self.active_runs.read().await.get(&id).cloned();
                match token {
                    Some(token) => {
                        token.cancel();
                        info!(ingestion_id = %id, "Pause requested, stopping at next stage boundary");
                    }
                    // Running with no local drive loop: interrupted run not yet recovered
                    None => {
                        self.pause_now(id, IngestionStatus::Running, ingestion.current_step_index)
                            .await?
                    }
                }
            }
            IngestionStatus::Queued => {
                self.pause_now(id, IngestionStatus::Queued, ingestion.current_step_index)
                    .await?
            }
            other => {
                return Err(Error::Conflict(format!(
                    "Cannot pause ingestion {} in status {}",
                    id,
                    other.as_str()
                )))
            }
        }

        self.get(id).await
    }

    /// Resume runs interrupted by a restart
    ///
    /// `running` ingestions continue at their `current_step_index`. With
    /// auto-start on, `queued` ingestions are started too. Returns how many
    /// runs were launched.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut launched = 0;

        for ingestion in self.store.list_by_status(IngestionStatus::Running).await? {
            let token = CancellationToken::new();
            {
                let mut runs = self.active_runs.write().await;
                if runs.contains_key(&ingestion.id) {
                    continue;
                }
                runs.insert(ingestion.id, token.clone());
            }
            info!(
                ingestion_id = %ingestion.id,
                step_index = ingestion.current_step_index,
                "Resuming interrupted ingestion"
            );
            self.spawn_drive(ingestion.id, token);
            launched += 1;
        }

        if self.auto_start {
            for ingestion in self.store.list_by_status(IngestionStatus::Queued).await? {
                match self.launch(ingestion.id, RunTrigger::Start).await {
                    Ok(_) => launched += 1,
                    Err(e) => warn!(ingestion_id = %ingestion.id, error = %e, "Failed to start queued ingestion"),
                }
            }
        }

        Ok(launched)
    }

    /// Register the run locally, then claim it in the store
    ///
    /// Refusal leaves no trace: the registry entry is removed and the
    /// conditional update changed nothing.
    async fn claim(&self, id: Uuid, trigger: RunTrigger) -> Result<CancellationToken> {
        let ingestion = self.get(id).await?;
        let token = CancellationToken::new();

        {
            let mut runs = self.active_runs.write().await;
            if runs.contains_key(&id) {
                return Err(Error::Conflict(format!(
                    "Ingestion {} already has an active run",
                    id
                )));
            }
            runs.insert(id, token.clone());
        }

        let from = trigger.required_status();
        let claimed = match trigger {
            RunTrigger::Start | RunTrigger::Resume => {
                self.store.transition(id, from, IngestionStatus::Running).await
            }
            RunTrigger::Retry => {
                self.store
                    .claim_retry(id, ingestion.current_step_index)
                    .await
            }
        };

        match claimed {
            Ok(true) => {
                info!(ingestion_id = %id, trigger = %trigger, "Run claimed");
                Ok(token)
            }
            Ok(false) => {
                self.active_runs.write().await.remove(&id);
                let current = self
                    .store
                    .get_ingestion(id)
                    .await?
                    .map(|i| i.status)
                    .unwrap_or(ingestion.status);
                Err(Error::Conflict(format!(
                    "Cannot {} ingestion {} in status {} (requires {})",
                    trigger,
                    id,
                    current.as_str(),
                    from.as_str()
                )))
            }
            Err(e) => {
                self.active_runs.write().await.remove(&id);
                Err(e)
            }
        }
    }

    fn spawn_drive(&self, id: Uuid, token: CancellationToken) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(id, token).await;
        });
    }

    /// Run the stage loop, release the run, then announce how it ended
    async fn drive(&self, id: Uuid, token: CancellationToken) {
        let result = self.drive_stages(id, &token).await;
        self.active_runs.write().await.remove(&id);

        match result {
            Ok(Some(event)) => self.event_bus.emit_lossy(event),
            Ok(None) => {}
            Err(e) => error!(
                ingestion_id = %id,
                error = %e,
                "Pipeline run aborted; ingestion left for recovery"
            ),
        }
    }

    /// Execute stages until the ingestion succeeds, fails or pauses
    ///
    /// Returns the terminal event to broadcast, if any.
    async fn drive_stages(
        &self,
        id: Uuid,
        token: &CancellationToken,
    ) -> Result<Option<PipelineEvent>> {
        loop {
            let ingestion = self.get(id).await?;
            if ingestion.status != IngestionStatus::Running {
                debug!(ingestion_id = %id, status = ingestion.status.as_str(), "Run no longer active");
                return Ok(None);
            }

            if token.is_cancelled() {
                if !self
                    .store
                    .transition(id, IngestionStatus::Running, IngestionStatus::Paused)
                    .await?
                {
                    return Ok(None);
                }
                info!(
                    ingestion_id = %id,
                    next_step_index = ingestion.current_step_index,
                    "Ingestion paused"
                );
                return Ok(Some(PipelineEvent::IngestionPaused {
                    ingestion_id: id,
                    next_step_index: ingestion.current_step_index,
                    timestamp: Utc::now(),
                }));
            }

            let Some(stage) = ingestion.next_stage() else {
                return self.finish(id).await;
            };

            let metadata = AccumulatedMetadata::from_steps(&self.store.list_steps(id).await?);

            if !self.store.start_step(id, stage.index()).await? {
                return Err(Error::Internal(format!(
                    "Step {} of ingestion {} is not runnable",
                    stage, id
                )));
            }
            self.event_bus.emit_lossy(PipelineEvent::StageStarted {
                ingestion_id: id,
                stage: stage.to_string(),
                step_index: stage.index(),
                timestamp: Utc::now(),
            });

            let started = Instant::now();
            let outcome = self.executor.execute(stage, &ingestion, &metadata).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let (status, output) = match outcome {
                StageOutcome::Succeeded(output) => (StepStatus::Succeeded, output),
                StageOutcome::Failed { error, partial } => {
                    return self
                        .fail(id, stage, &error.to_string(), partial.unwrap_or_else(|| json!({})))
                        .await;
                }
            };

            let next_index = stage.index() + 1;
            let completion = StepCompletion {
                position: stage.index(),
                status,
                output,
                next_index,
                progress: progress_for(next_index, StageName::COUNT),
            };
            if !self.store.complete_step(id, &completion).await? {
                return Err(Error::Internal(format!(
                    "Ingestion {} changed state while {} was running",
                    id, stage
                )));
            }

            info!(
                ingestion_id = %id,
                stage = %stage,
                status = status.as_str(),
                progress = completion.progress,
                duration_ms,
                "Stage completed"
            );
            self.event_bus.emit_lossy(PipelineEvent::StageCompleted {
                ingestion_id: id,
                stage: stage.to_string(),
                status: status.as_str().to_string(),
                progress: completion.progress,
                duration_ms,
                timestamp: Utc::now(),
            });
        }
    }

    async fn fail(
        &self,
        id: Uuid,
        stage: StageName,
        message: &str,
        partial: Value,
    ) -> Result<Option<PipelineEvent>> {
        warn!(ingestion_id = %id, stage = %stage, error = %message, "Stage failed");

        if !self.store.fail_step(id, stage, message, &partial).await? {
            return Ok(None);
        }
        self.event_bus.emit_lossy(PipelineEvent::StageFailed {
            ingestion_id: id,
            stage: stage.to_string(),
            error: message.to_string(),
            timestamp: Utc::now(),
        });

        Ok(Some(PipelineEvent::IngestionFailed {
            ingestion_id: id,
            failed_stage: stage.to_string(),
            timestamp: Utc::now(),
        }))
    }

    /// Build and store the package once every stage has completed
    async fn finish(&self, id: Uuid) -> Result<Option<PipelineEvent>> {
        let metadata = AccumulatedMetadata::from_steps(&self.store.list_steps(id).await?);
        let empty = json!({});
        let package = Package::assemble(
            id,
            metadata.get(StageName::PackageAssembly).unwrap_or(&empty),
            metadata.get(StageName::FinalPackage).unwrap_or(&empty),
        );

        if !self.store.finalize(id, &package).await? {
            return Ok(None);
        }

        info!(ingestion_id = %id, package_id = %package.id, "Ingestion succeeded");
        Ok(Some(PipelineEvent::IngestionSucceeded {
            ingestion_id: id,
            package_id: package.id,
            timestamp: Utc::now(),
        }))
    }

    async fn pause_now(&self, id: Uuid, from: IngestionStatus, next_step_index: usize) -> Result<()> {
        if !self
            .store
            .transition(id, from, IngestionStatus::Paused)
            .await?
        {
            return Err(Error::Conflict(format!(
                "Ingestion {} left status {} before it could be paused",
                id,
                from.as_str()
            )));
        }

        info!(ingestion_id = %id, "Ingestion paused");
        self.event_bus.emit_lossy(PipelineEvent::IngestionPaused {
            ingestion_id: id,
            next_step_index,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
