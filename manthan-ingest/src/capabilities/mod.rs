//! External capability clients
//!
//! Stages reach the outside world only through these traits: the LLM, the
//! visual asset services, and the source document fetcher. Each concrete
//! client is chosen from [`ServiceConfig`] at startup. A missing credential
//! selects degraded behaviour rather than an error.

pub mod document;
pub mod llm;
pub mod visual;

pub use document::{DocumentSource, HttpDocumentSource, SourceDocument};
pub use llm::{create_llm, LlmCapability, LlmError};
pub use visual::{VisualAssetCapability, VisualAssetService, VisualBrief};

use crate::config::ServiceConfig;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a non-LLM capability call
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Capability not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Service returned error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Limit in milliseconds
    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

impl From<reqwest::Error> for CapabilityError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => CapabilityError::ApiError {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => CapabilityError::RequestFailed(err.to_string()),
        }
    }
}

/// The capability set handed to the step executor
#[derive(Clone)]
pub struct Capabilities {
    pub llm: Arc<dyn LlmCapability>,
    pub visual: Arc<dyn VisualAssetCapability>,
    pub documents: Arc<dyn DocumentSource>,
}

impl Capabilities {
    /// Build live or degraded clients from configuration
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            llm: create_llm(config),
            visual: Arc::new(VisualAssetService::from_config(config)),
            documents: Arc::new(HttpDocumentSource::new(config.capability_timeout)),
        }
    }
}

/// Shared HTTP client with a request timeout
pub(crate) fn http_client(timeout: std::time::Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build HTTP client with timeout ({}), using defaults", e);
            reqwest::Client::new()
        })
}
