//! Ingestion API handlers
//!
//! POST /api/ingestions, GET /api/ingestions/:id (+ /steps, /package),
//! POST /api/ingestions/:id/{run,pause,resume,retry}

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::extract::{ApiJson, ApiPath};
use crate::error::ApiResult;
use crate::models::{Ingestion, IngestionStatus, NewIngestion, Package, StageName, Step, StepStatus};
use crate::pipeline::RunTrigger;
use crate::AppState;

/// Ingestion status response
#[derive(Debug, Serialize)]
pub struct IngestionResponse {
    pub id: Uuid,
    pub status: IngestionStatus,
    pub progress: u8,
    pub current_step_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<StageName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Ingestion> for IngestionResponse {
    fn from(ingestion: Ingestion) -> Self {
        Self {
            id: ingestion.id,
            status: ingestion.status,
            progress: ingestion.progress,
            current_step_index: ingestion.current_step_index,
            failed_step: ingestion.failed_step,
            error: ingestion.error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepResponse {
    pub id: Uuid,
    pub name: StageName,
    pub status: StepStatus,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
}

impl From<Step> for StepResponse {
    fn from(step: Step) -> Self {
        Self {
            id: step.id,
            name: step.name,
            status: step.status,
            output: step.output,
            error: step.error,
            attempts: step.attempts,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PackageResponse {
    pub id: Uuid,
    pub document_url: Option<String>,
    pub deck_url: Option<String>,
    pub summary: serde_json::Map<String, Value>,
}

impl From<Package> for PackageResponse {
    fn from(package: Package) -> Self {
        Self {
            id: package.id,
            document_url: package.document_url,
            deck_url: package.deck_url,
            summary: package.summary,
        }
    }
}

/// POST /api/ingestions
///
/// Creates a `queued` ingestion; with auto-start on, its run is launched
/// immediately.
pub async fn create_ingestion(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<NewIngestion>,
) -> ApiResult<Json<IngestionResponse>> {
    let ingestion = state.engine.create(request).await?;

    if state.engine.auto_start() {
        let launched = state.engine.launch(ingestion.id, RunTrigger::Start).await?;
        return Ok(Json(launched.into()));
    }

    Ok(Json(ingestion.into()))
}

/// GET /api/ingestions/:id
pub async fn get_ingestion(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<IngestionResponse>> {
    let ingestion = state.engine.get(id).await?;
    tracing::debug!(ingestion_id = %id, status = ingestion.status.as_str(), "Status query");
    Ok(Json(ingestion.into()))
}

/// GET /api/ingestions/:id/steps
///
/// Steps in pipeline order.
pub async fn list_steps(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Vec<StepResponse>>> {
    let steps = state.engine.steps(id).await?;
    Ok(Json(steps.into_iter().map(StepResponse::from).collect()))
}

/// GET /api/ingestions/:id/package
pub async fn get_package(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<PackageResponse>> {
    let package = state.engine.package(id).await?;
    Ok(Json(package.into()))
}

/// POST /api/ingestions/:id/run
pub async fn run_ingestion(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<IngestionResponse>> {
    control(state, id, RunTrigger::Start).await
}

/// POST /api/ingestions/:id/resume
pub async fn resume_ingestion(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<IngestionResponse>> {
    control(state, id, RunTrigger::Resume).await
}

/// POST /api/ingestions/:id/retry
pub async fn retry_ingestion(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<IngestionResponse>> {
    control(state, id, RunTrigger::Retry).await
}

/// POST /api/ingestions/:id/pause
pub async fn pause_ingestion(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<IngestionResponse>> {
    let ingestion = state.engine.pause(id).await?;
    Ok(Json(ingestion.into()))
}

async fn control(
    state: AppState,
    id: Uuid,
    trigger: RunTrigger,
) -> ApiResult<Json<IngestionResponse>> {
    let ingestion = state.engine.launch(id, trigger).await?;
    tracing::info!(ingestion_id = %id, trigger = %trigger, "Run launched");
    Ok(Json(ingestion.into()))
}

/// Build ingestion routes
pub fn ingestion_routes() -> Router<AppState> {
    Router::new()
        .route("/api/ingestions", post(create_ingestion))
        .route("/api/ingestions/", post(create_ingestion))
        .route("/api/ingestions/:id", get(get_ingestion))
        .route("/api/ingestions/:id/steps", get(list_steps))
        .route("/api/ingestions/:id/package", get(get_package))
        .route("/api/ingestions/:id/run", post(run_ingestion))
        .route("/api/ingestions/:id/pause", post(pause_ingestion))
        .route("/api/ingestions/:id/resume", post(resume_ingestion))
        .route("/api/ingestions/:id/retry", post(retry_ingestion))
}
