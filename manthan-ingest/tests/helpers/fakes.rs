//! Capability fakes

use async_trait::async_trait;
use manthan_ingest::capabilities::{
    CapabilityError, DocumentSource, LlmCapability, LlmError, SourceDocument,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

fn not_configured() -> Result<Value, LlmError> {
    Err(LlmError::NotConfigured("no key in tests".to_string()))
}

/// LLM with no credential: every stage runs degraded
#[derive(Debug, Default)]
pub struct OfflineLlm;

#[async_trait]
impl LlmCapability for OfflineLlm {
    async fn run(&self, _prompt: &str) -> Result<Value, LlmError> {
        not_configured()
    }

    fn provider_name(&self) -> &'static str {
        "offline"
    }

    fn model_name(&self) -> &str {
        "none"
    }
}

/// Fails the first `failures` calls with a provider error, then degrades
#[derive(Debug)]
pub struct FlakyLlm {
    failures: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FlakyLlm {
    pub fn new(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmCapability for FlakyLlm {
    async fn run(&self, _prompt: &str) -> Result<Value, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LlmError::ApiError {
                status: 500,
                message: "upstream exploded".to_string(),
            });
        }
        not_configured()
    }

    fn provider_name(&self) -> &'static str {
        "flaky"
    }

    fn model_name(&self) -> &str {
        "none"
    }
}

/// Blocks every call until a permit is released
///
/// `entered` is notified each time a call starts waiting.
#[derive(Debug)]
pub struct GatedLlm {
    pub entered: Notify,
    pub release: Semaphore,
}

impl GatedLlm {
    pub fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }
}

#[async_trait]
impl LlmCapability for GatedLlm {
    async fn run(&self, _prompt: &str) -> Result<Value, LlmError> {
        self.entered.notify_one();
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
        not_configured()
    }

    fn provider_name(&self) -> &'static str {
        "gated"
    }

    fn model_name(&self) -> &str {
        "none"
    }
}

/// Answers only after `delay`, longer than any test timeout
#[derive(Debug)]
pub struct SleepingLlm {
    pub delay: Duration,
}

#[async_trait]
impl LlmCapability for SleepingLlm {
    async fn run(&self, _prompt: &str) -> Result<Value, LlmError> {
        tokio::time::sleep(self.delay).await;
        not_configured()
    }

    fn provider_name(&self) -> &'static str {
        "sleeping"
    }

    fn model_name(&self) -> &str {
        "none"
    }
}

#[derive(Debug, Default)]
pub struct PanickingLlm;

#[async_trait]
impl LlmCapability for PanickingLlm {
    async fn run(&self, _prompt: &str) -> Result<Value, LlmError> {
        panic!("llm client exploded");
    }

    fn provider_name(&self) -> &'static str {
        "panicking"
    }

    fn model_name(&self) -> &str {
        "none"
    }
}

/// Serves the same text for every URL
pub struct StaticDocuments {
    text: String,
}

impl StaticDocuments {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

#[async_trait]
impl DocumentSource for StaticDocuments {
    async fn load(&self, url: &str) -> Result<SourceDocument, CapabilityError> {
        Ok(SourceDocument {
            url: url.to_string(),
            content_type: Some("text/plain".to_string()),
            text: self.text.clone(),
        })
    }
}

pub struct MissingDocuments;

#[async_trait]
impl DocumentSource for MissingDocuments {
    async fn load(&self, url: &str) -> Result<SourceDocument, CapabilityError> {
        Err(CapabilityError::ApiError {
            status: 404,
            message: format!("{} not found", url),
        })
    }
}
