//! Test helper utilities
//!
//! Shared fixtures for manthan-ingest integration tests: a temp-file
//! database, an engine wired to capability fakes, and polling helpers.

#![allow(dead_code)]

pub mod fakes;

pub use fakes::{
    FlakyLlm, GatedLlm, MissingDocuments, OfflineLlm, PanickingLlm, SleepingLlm,
    StaticDocuments,
};

use manthan_common::events::EventBus;
use manthan_ingest::capabilities::{
    Capabilities, DocumentSource, LlmCapability, VisualAssetService,
};
use manthan_ingest::config::ServiceConfig;
use manthan_ingest::db::{init_database_pool, SqliteStateStore};
use manthan_ingest::models::{Ingestion, IngestionStatus, MarketHints, NewIngestion};
use manthan_ingest::pipeline::{PipelineEngine, StepExecutor};
use manthan_ingest::AppState;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

pub const SOURCE_URL: &str = "https://x/test.fdx";

/// A short plain-text screenplay
pub const SCREENPLAY: &str = "INT. POLICE STATION - NIGHT

INSPECTOR DESAI
Where were you on the night of the fire?

RAVI
At home. With my mother.

EXT. MUMBAI DOCKS - DAY

RAVI
They will come for the ledger.

INSPECTOR DESAI
Then we move first.
";

pub struct TestEnv {
    pub engine: PipelineEngine,
    pub store: Arc<SqliteStateStore>,
    pub event_bus: EventBus,
    pub config: ServiceConfig,
    _temp_dir: TempDir,
}

impl TestEnv {
    pub fn app_state(&self) -> AppState {
        AppState::new(self.engine.clone(), self.event_bus.clone(), self.config.clone())
    }

    pub fn router(&self) -> axum::Router {
        manthan_ingest::build_router(self.app_state())
    }
}

/// Engine over a fresh database, with no credentials configured
pub async fn setup(llm: Arc<dyn LlmCapability>) -> TestEnv {
    setup_with(llm, Arc::new(StaticDocuments::new(SCREENPLAY)), false).await
}

pub async fn setup_with(
    llm: Arc<dyn LlmCapability>,
    documents: Arc<dyn DocumentSource>,
    auto_start: bool,
) -> TestEnv {
    build_env(llm, documents, auto_start, Duration::from_secs(5)).await
}

/// Engine whose capability calls are cut off after `capability_timeout`
pub async fn setup_with_timeout(
    llm: Arc<dyn LlmCapability>,
    capability_timeout: Duration,
) -> TestEnv {
    build_env(
        llm,
        Arc::new(StaticDocuments::new(SCREENPLAY)),
        false,
        capability_timeout,
    )
    .await
}

async fn build_env(
    llm: Arc<dyn LlmCapability>,
    documents: Arc<dyn DocumentSource>,
    auto_start: bool,
    capability_timeout: Duration,
) -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database_pool(&temp_dir.path().join("test.db"))
        .await
        .unwrap();
    let store = Arc::new(SqliteStateStore::new(pool));

    let config = ServiceConfig {
        root_folder: temp_dir.path().to_path_buf(),
        capability_timeout,
        auto_start,
        ..Default::default()
    };

    let capabilities = Capabilities {
        llm,
        visual: Arc::new(VisualAssetService::from_config(&config)),
        documents,
    };

    let event_bus = EventBus::new(100);
    let engine = PipelineEngine::new(
        store.clone(),
        StepExecutor::new(capabilities, config.capability_timeout),
        event_bus.clone(),
        auto_start,
    );

    TestEnv {
        engine,
        store,
        event_bus,
        config,
        _temp_dir: temp_dir,
    }
}

pub fn request() -> NewIngestion {
    NewIngestion {
        source_file_url: SOURCE_URL.to_string(),
        ..Default::default()
    }
}

pub fn request_with_language(language: &str) -> NewIngestion {
    NewIngestion {
        source_file_url: SOURCE_URL.to_string(),
        hints: MarketHints {
            language: Some(language.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn request_with_region(region: &str) -> NewIngestion {
    NewIngestion {
        source_file_url: SOURCE_URL.to_string(),
        hints: MarketHints {
            region: Some(region.to_string()),
            language: Some("Hindi".to_string()),
            platforms: vec!["Disney+ Hotstar".to_string()],
        },
        ..Default::default()
    }
}

/// Poll until the ingestion reaches `status` (5s limit)
pub async fn wait_for_status(engine: &PipelineEngine, id: Uuid, status: IngestionStatus) -> Ingestion {
    for _ in 0..500 {
        let ingestion = engine.get(id).await.unwrap();
        if ingestion.status == status {
            return ingestion;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("ingestion {} never reached {:?}", id, status);
}

/// Wait for the next `event_type` event of ingestion `id` (5s limit)
pub async fn wait_for_event(
    rx: &mut tokio::sync::broadcast::Receiver<manthan_common::events::PipelineEvent>,
    id: Uuid,
    event_type: &str,
) -> manthan_common::events::PipelineEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if event.ingestion_id() == id && event.event_type() == event_type => {
                    return event
                }
                Ok(_) => continue,
                Err(e) => panic!("event stream failed: {}", e),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {} on {}", event_type, id))
}
