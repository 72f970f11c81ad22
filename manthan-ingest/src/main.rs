//! manthan-ingest - content packaging service
//!
//! Accepts screenplay ingestions over HTTP and drives each one through the
//! six-stage packaging pipeline, persisting progress in SQLite so runs
//! survive restarts.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use manthan_common::config::{default_config_path, load_toml_config, prepare_root_folder};
use manthan_common::events::EventBus;
use manthan_ingest::capabilities::Capabilities;
use manthan_ingest::config::{CliOverrides, ServiceConfig};
use manthan_ingest::db::SqliteStateStore;
use manthan_ingest::pipeline::{PipelineEngine, StepExecutor};
use manthan_ingest::AppState;

/// Command-line arguments for manthan-ingest
#[derive(Parser, Debug)]
#[command(name = "manthan-ingest")]
#[command(about = "Content packaging pipeline service")]
#[command(version)]
struct Args {
    /// Config file (default: <config_dir>/manthan/manthan-ingest.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder holding the database
    #[arg(short, long, env = "MANTHAN_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:5730
    #[arg(short, long, env = "MANTHAN_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| default_config_path("manthan-ingest"));
    let toml_config = match &config_path {
        Some(path) => load_toml_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Default::default(),
    };

    // RUST_LOG wins over the config file level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("manthan_ingest={0},manthan_common={0},tower_http=info", toml_config.logging.level)
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting manthan-ingest (content packaging) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Config file: {}", path.display());
    }

    let config = ServiceConfig::resolve(
        &CliOverrides {
            root_folder: args.root_folder,
            bind: args.bind,
        },
        &toml_config,
    )?;

    let db_path = prepare_root_folder(&config.root_folder)?;
    info!("Database: {}", db_path.display());
    let db_pool = manthan_ingest::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    let event_bus = EventBus::new(100);

    let executor = StepExecutor::new(Capabilities::from_config(&config), config.capability_timeout);
    let engine = PipelineEngine::new(
        Arc::new(SqliteStateStore::new(db_pool)),
        executor,
        event_bus.clone(),
        config.auto_start,
    );

    match engine.recover_interrupted().await {
        Ok(0) => {}
        Ok(count) => info!("Recovered {} interrupted ingestion(s)", count),
        Err(e) => warn!("Crash recovery failed: {}", e),
    }

    let bind = config.bind.clone();
    let state = AppState::new(engine, event_bus, config);
    let app = manthan_ingest::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
