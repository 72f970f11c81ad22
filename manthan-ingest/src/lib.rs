//! manthan-ingest library interface
//!
//! Exposes the pipeline, persistence and HTTP surface for the binary and
//! for integration tests.

pub mod api;
pub mod capabilities;
pub mod config;
pub mod db;
pub mod error;
pub mod market;
pub mod models;
pub mod pipeline;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use manthan_common::events::EventBus;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::pipeline::PipelineEngine;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: PipelineEngine,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub config: Arc<ServiceConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(engine: PipelineEngine, event_bus: EventBus, config: ServiceConfig) -> Self {
        Self {
            engine,
            event_bus,
            config: Arc::new(config),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::ingestion_routes())
        .merge(api::recommendation_routes())
        .route("/api/events", get(api::event_stream))
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
