//! Visual asset capability
//!
//! A visual brief is built from three independent sub-calls: AI image
//! generation, stock image search, and template rendering. Each sub-call
//! degrades to its placeholder on a missing credential, an error, or a
//! timeout. The brief itself never fails.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::CapabilityError;
use crate::config::ServiceConfig;

pub const STABLE_DIFFUSION_URL: &str =
    "https://api.stability.ai/v1/generation/stable-diffusion-v1-5/text-to-image";
pub const PEXELS_URL: &str = "https://api.pexels.com/v1/search";
pub const CANVA_RENDER_URL: &str = "https://api.canva.com/v1/render";

/// Stand-in for each AI image that could not be generated
pub const PLACEHOLDER_AI_IMAGE: &str = "placeholder_ai_image.png";
/// Stand-in for a template that could not be rendered
pub const PLACEHOLDER_TEMPLATE: &str = "template_placeholder.png";

/// AI images requested per brief
pub const AI_IMAGE_SAMPLES: usize = 3;
/// Stock photos requested per brief
pub const STOCK_IMAGE_LIMIT: usize = 5;

/// Template used to lay out the mood board
pub const MOOD_BOARD_TEMPLATE: &str = "mood_board";

/// Mood board and art direction for one project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualBrief {
    /// AI images followed by stock references
    pub mood_board: Vec<String>,
    pub art_direction_notes: String,
    pub reference_images: Vec<String>,
    /// Rendered mood board layout
    pub board_url: String,
}

/// Enrich an art-direction prompt with Indian aesthetic cues
pub fn art_direction_prompt(description: &str) -> String {
    format!(
        "{}, Indian style, Bollywood visuals, vibrant colors",
        description.trim()
    )
}

/// Visual asset operations used by the packaging stages
#[async_trait]
pub trait VisualAssetCapability: Send + Sync {
    async fn generate_brief(&self, description: &str) -> VisualBrief;

    /// Render assets into a template and return the asset URL
    async fn render_template(
        &self,
        template_id: &str,
        images: &[String],
        text: &BTreeMap<String, String>,
    ) -> String;
}

/// Text-to-image generation
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, samples: usize) -> Result<Vec<String>, CapabilityError>;
}

/// Stock photo search
#[async_trait]
pub trait StockImageSearch: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, CapabilityError>;
}

/// Template rendering
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(
        &self,
        template_id: &str,
        images: &[String],
        text: &BTreeMap<String, String>,
    ) -> Result<String, CapabilityError>;
}

/// [`VisualAssetCapability`] over three independently degrading sub-calls
pub struct VisualAssetService {
    images: Arc<dyn ImageGenerator>,
    stock: Arc<dyn StockImageSearch>,
    renderer: Arc<dyn TemplateRenderer>,
    timeout: Duration,
}

impl VisualAssetService {
    pub fn new(
        images: Arc<dyn ImageGenerator>,
        stock: Arc<dyn StockImageSearch>,
        renderer: Arc<dyn TemplateRenderer>,
        timeout: Duration,
    ) -> Self {
        Self {
            images,
            stock,
            renderer,
            timeout,
        }
    }

    /// HTTP clients for the configured services
    pub fn from_config(config: &ServiceConfig) -> Self {
        let client = super::http_client(config.capability_timeout);
        Self::new(
            Arc::new(StabilityClient::new(
                client.clone(),
                config.stability_api_key.clone(),
            )),
            Arc::new(PexelsClient::new(client.clone(), config.stock_api_key.clone())),
            Arc::new(CanvaClient::new(client, config.canva_api_key.clone())),
            config.capability_timeout,
        )
    }

    async fn generate_images(&self, prompt: &str) -> Vec<String> {
        let placeholder = || vec![PLACEHOLDER_AI_IMAGE.to_string(); AI_IMAGE_SAMPLES];
        match bounded(self.timeout, self.images.generate(prompt, AI_IMAGE_SAMPLES)).await {
            Ok(images) if !images.is_empty() => images,
            Ok(_) => {
                debug!("Image generation returned no artifacts, using placeholders");
                placeholder()
            }
            Err(e) => {
                degraded("image_generation", &e);
                placeholder()
            }
        }
    }

    async fn search_stock(&self, query: &str) -> Vec<String> {
        match bounded(self.timeout, self.stock.search(query, STOCK_IMAGE_LIMIT)).await {
            Ok(images) => images,
            Err(e) => {
                degraded("stock_search", &e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl VisualAssetCapability for VisualAssetService {
    async fn generate_brief(&self, description: &str) -> VisualBrief {
        let prompt = art_direction_prompt(description);

        let ai_images = self.generate_images(&prompt).await;
        let reference_images = self.search_stock(description).await;

        let mut mood_board = ai_images;
        mood_board.extend(reference_images.iter().cloned());

        let mut text = BTreeMap::new();
        text.insert("art_direction".to_string(), prompt.clone());
        let board_url = self
            .render_template(MOOD_BOARD_TEMPLATE, &mood_board, &text)
            .await;

        VisualBrief {
            mood_board,
            art_direction_notes: prompt,
            reference_images,
            board_url,
        }
    }

    async fn render_template(
        &self,
        template_id: &str,
        images: &[String],
        text: &BTreeMap<String, String>,
    ) -> String {
        match bounded(self.timeout, self.renderer.render(template_id, images, text)).await {
            Ok(url) => url,
            Err(e) => {
                degraded("template_render", &e);
                PLACEHOLDER_TEMPLATE.to_string()
            }
        }
    }
}

async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, CapabilityError>>,
) -> Result<T, CapabilityError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(CapabilityError::Timeout(timeout.as_millis() as u64)),
    }
}

fn degraded(capability: &str, err: &CapabilityError) {
    match err {
        CapabilityError::NotConfigured(reason) => {
            debug!(capability, reason = %reason, "Capability not configured, using placeholder")
        }
        other => warn!(capability, error = %other, "Capability call failed, using placeholder"),
    }
}

// ============================================================================
// HTTP clients
// ============================================================================

/// Stable Diffusion text-to-image
pub struct StabilityClient {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl StabilityClient {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }
}

#[derive(Debug, Deserialize)]
struct StabilityResponse {
    #[serde(default)]
    artifacts: Vec<StabilityArtifact>,
}

#[derive(Debug, Deserialize)]
struct StabilityArtifact {
    base64: Option<String>,
}

#[async_trait]
impl ImageGenerator for StabilityClient {
    async fn generate(&self, prompt: &str, samples: usize) -> Result<Vec<String>, CapabilityError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CapabilityError::NotConfigured("STABILITY_API_KEY not set".to_string()))?;

        let payload = json!({
            "text_prompts": [{ "text": prompt }],
            "cfg_scale": 7,
            "samples": samples,
        });

        let response: StabilityResponse = self
            .client
            .post(STABLE_DIFFUSION_URL)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| CapabilityError::ParseError(e.to_string()))?;

        Ok(response
            .artifacts
            .into_iter()
            .filter_map(|artifact| artifact.base64)
            .map(|data| format!("data:image/png;base64,{}", data))
            .collect())
    }
}

/// Pexels stock photo search
pub struct PexelsClient {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl PexelsClient {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }
}

#[derive(Debug, Deserialize)]
struct PexelsResponse {
    #[serde(default)]
    photos: Vec<PexelsPhoto>,
}

#[derive(Debug, Deserialize)]
struct PexelsPhoto {
    src: Option<BTreeMap<String, String>>,
}

#[async_trait]
impl StockImageSearch for PexelsClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, CapabilityError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CapabilityError::NotConfigured("STOCK_API_KEY not set".to_string()))?;

        let response: PexelsResponse = self
            .client
            .get(PEXELS_URL)
            .header("Authorization", api_key)
            .query(&[("query", query.to_string()), ("per_page", limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| CapabilityError::ParseError(e.to_string()))?;

        Ok(response
            .photos
            .into_iter()
            .filter_map(|photo| photo.src.and_then(|mut src| src.remove("original")))
            .collect())
    }
}

/// Canva template rendering
pub struct CanvaClient {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl CanvaClient {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl TemplateRenderer for CanvaClient {
    async fn render(
        &self,
        template_id: &str,
        images: &[String],
        text: &BTreeMap<String, String>,
    ) -> Result<String, CapabilityError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CapabilityError::NotConfigured("CANVA_API_KEY not set".to_string()))?;

        let payload = json!({
            "template_id": template_id,
            "images": images,
            "text": text,
        });

        let response: Value = self
            .client
            .post(CANVA_RENDER_URL)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| CapabilityError::ParseError(e.to_string()))?;

        response
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CapabilityError::ParseError("render response has no url".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedImages(Vec<String>);

    #[async_trait]
    impl ImageGenerator for FixedImages {
        async fn generate(&self, _: &str, _: usize) -> Result<Vec<String>, CapabilityError> {
            Ok(self.0.clone())
        }
    }

    struct FailingStock;

    #[async_trait]
    impl StockImageSearch for FailingStock {
        async fn search(&self, _: &str, _: usize) -> Result<Vec<String>, CapabilityError> {
            Err(CapabilityError::ApiError {
                status: 500,
                message: "upstream down".to_string(),
            })
        }
    }

    struct SlowRenderer;

    #[async_trait]
    impl TemplateRenderer for SlowRenderer {
        async fn render(
            &self,
            _: &str,
            _: &[String],
            _: &BTreeMap<String, String>,
        ) -> Result<String, CapabilityError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("never".to_string())
        }
    }

    #[test]
    fn test_art_direction_prompt() {
        assert_eq!(
            art_direction_prompt(" monsoon romance in Kolkata "),
            "monsoon romance in Kolkata, Indian style, Bollywood visuals, vibrant colors"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_service_yields_placeholders() {
        let service = VisualAssetService::from_config(&ServiceConfig::default());
        let brief = service.generate_brief("heist thriller").await;

        assert_eq!(brief.mood_board, vec![PLACEHOLDER_AI_IMAGE; AI_IMAGE_SAMPLES]);
        assert!(brief.reference_images.is_empty());
        assert_eq!(brief.board_url, PLACEHOLDER_TEMPLATE);
        assert!(brief.art_direction_notes.starts_with("heist thriller, Indian style"));

        let url = service
            .render_template("pitch_deck", &[], &BTreeMap::new())
            .await;
        assert_eq!(url, PLACEHOLDER_TEMPLATE);
    }

    #[tokio::test]
    async fn test_bounded_reports_limit_in_millis() {
        let result = bounded(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .await;
        match result {
            Err(err @ CapabilityError::Timeout(20)) => {
                assert_eq!(err.to_string(), "Timed out after 20ms")
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sub_calls_degrade_independently() {
        let service = VisualAssetService::new(
            Arc::new(FixedImages(vec!["data:image/png;base64,AAA".to_string()])),
            Arc::new(FailingStock),
            Arc::new(SlowRenderer),
            Duration::from_millis(20),
        );

        let brief = service.generate_brief("family drama").await;
        assert_eq!(brief.mood_board, vec!["data:image/png;base64,AAA".to_string()]);
        assert!(brief.reference_images.is_empty());
        assert_eq!(brief.board_url, PLACEHOLDER_TEMPLATE);
    }

    #[tokio::test]
    async fn test_empty_generation_falls_back_to_placeholders() {
        let service = VisualAssetService::new(
            Arc::new(FixedImages(Vec::new())),
            Arc::new(FailingStock),
            Arc::new(SlowRenderer),
            Duration::from_millis(20),
        );

        let brief = service.generate_brief("period epic").await;
        assert_eq!(brief.mood_board.len(), AI_IMAGE_SAMPLES);
        assert!(brief.mood_board.iter().all(|url| url == PLACEHOLDER_AI_IMAGE));
    }
}
