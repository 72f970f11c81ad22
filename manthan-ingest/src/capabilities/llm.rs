//! LLM capability
//!
//! Provider variants are selected from configuration, never by inspecting
//! types at runtime. Without a credential for the selected provider the
//! [`PlaceholderProvider`] is used, which reports `NotConfigured` on every
//! call; stages treat that as degraded mode and fall back to heuristics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{LlmProviderKind, ServiceConfig};

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

const MAX_TOKENS: u32 = 4096;

/// Error type for LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    RequestFailed(String),

    #[error("API returned error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// A prompt-in, structured-result-out language model
#[async_trait]
pub trait LlmCapability: Send + Sync + fmt::Debug {
    /// Run `prompt` and return the model's answer as JSON
    ///
    /// Answers that are not JSON come back as `{"text": <answer>}`.
    async fn run(&self, prompt: &str) -> Result<Value, LlmError>;

    fn provider_name(&self) -> &'static str;

    fn model_name(&self) -> &str;
}

/// Select the provider named in configuration
pub fn create_llm(config: &ServiceConfig) -> Arc<dyn LlmCapability> {
    let client = super::http_client(config.capability_timeout);

    match config.llm_provider {
        LlmProviderKind::Anthropic => match &config.anthropic_api_key {
            Some(key) => Arc::new(AnthropicProvider::new(
                client,
                key.clone(),
                config
                    .llm_model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            )),
            None => Arc::new(PlaceholderProvider::new("ANTHROPIC_API_KEY not set")),
        },
        LlmProviderKind::OpenAi => match &config.openai_api_key {
            Some(key) => Arc::new(OpenAiProvider::new(
                client,
                key.clone(),
                config
                    .llm_model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            )),
            None => Arc::new(PlaceholderProvider::new("OPENAI_API_KEY not set")),
        },
    }
}

/// Turn a model answer into structured output
///
/// Accepts bare JSON objects and JSON wrapped in a markdown code fence.
pub fn parse_structured(text: &str) -> Value {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    match serde_json::from_str::<Value>(unfenced) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({ "text": trimmed }),
    }
}

// ============================================================================
// Anthropic
// ============================================================================

/// Anthropic Messages API provider
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(client: reqwest::Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }
}

impl fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[async_trait]
impl LlmCapability for AnthropicProvider {
    async fn run(&self, prompt: &str) -> Result<Value, LlmError> {
        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let body = read_body(response).await?;
        let response: AnthropicResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::ParseError(e.to_string()))?;

        let text = response
            .content
            .into_iter()
            .find_map(|c| if c.content_type == "text" { c.text } else { None })
            .ok_or_else(|| LlmError::ParseError("No text content in response".to_string()))?;

        Ok(parse_structured(&text))
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// OpenAI
// ============================================================================

/// OpenAI chat completions provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[async_trait]
impl LlmCapability for OpenAiProvider {
    async fn run(&self, prompt: &str) -> Result<Value, LlmError> {
        let request = OpenAiRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(OPENAI_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let body = read_body(response).await?;
        let response: OpenAiResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::ParseError(e.to_string()))?;

        let text = response
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| LlmError::ParseError("No message content in response".to_string()))?;

        Ok(parse_structured(&text))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Read a response body, mapping non-2xx statuses to `ApiError`
async fn read_body(response: reqwest::Response) -> Result<String, LlmError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|envelope| envelope.error.message)
            .unwrap_or(body);
        return Err(LlmError::ApiError {
            status: status.as_u16(),
            message,
        });
    }

    Ok(body)
}

// ============================================================================
// Placeholder
// ============================================================================

/// Stand-in used when no credential is configured
#[derive(Debug, Clone)]
pub struct PlaceholderProvider {
    reason: String,
}

impl PlaceholderProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl LlmCapability for PlaceholderProvider {
    async fn run(&self, _prompt: &str) -> Result<Value, LlmError> {
        Err(LlmError::NotConfigured(self.reason.clone()))
    }

    fn provider_name(&self) -> &'static str {
        "placeholder"
    }

    fn model_name(&self) -> &str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structured_plain_json() {
        let value = parse_structured(r#"{"logline": "A clerk takes on a cartel"}"#);
        assert_eq!(value["logline"], "A clerk takes on a cartel");
    }

    #[test]
    fn test_parse_structured_fenced_json() {
        let value = parse_structured("```json\n{\"themes\": [\"family\"]}\n```");
        assert_eq!(value["themes"][0], "family");
    }

    #[test]
    fn test_parse_structured_free_text() {
        let value = parse_structured("  Just prose.  ");
        assert_eq!(value, json!({"text": "Just prose."}));

        // Arrays are not a structured result
        let value = parse_structured("[1, 2]");
        assert_eq!(value, json!({"text": "[1, 2]"}));
    }

    #[test]
    fn test_missing_key_selects_placeholder() {
        let config = ServiceConfig::default();
        assert_eq!(create_llm(&config).provider_name(), "placeholder");

        let config = ServiceConfig {
            llm_provider: LlmProviderKind::OpenAi,
            anthropic_api_key: Some("sk-ant".to_string()),
            ..Default::default()
        };
        // Key for the other provider does not count
        assert_eq!(create_llm(&config).provider_name(), "placeholder");
    }

    #[test]
    fn test_configured_provider_and_model() {
        let config = ServiceConfig {
            anthropic_api_key: Some("sk-ant".to_string()),
            ..Default::default()
        };
        let llm = create_llm(&config);
        assert_eq!(llm.provider_name(), "anthropic");
        assert_eq!(llm.model_name(), DEFAULT_ANTHROPIC_MODEL);

        let config = ServiceConfig {
            llm_provider: LlmProviderKind::OpenAi,
            openai_api_key: Some("sk-oai".to_string()),
            llm_model: Some("gpt-4o-mini".to_string()),
            ..Default::default()
        };
        let llm = create_llm(&config);
        assert_eq!(llm.provider_name(), "openai");
        assert_eq!(llm.model_name(), "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_placeholder_reports_not_configured() {
        let llm = PlaceholderProvider::new("ANTHROPIC_API_KEY not set");
        let err = llm.run("prompt").await.unwrap_err();
        assert!(matches!(err, LlmError::NotConfigured(_)));
    }
}
