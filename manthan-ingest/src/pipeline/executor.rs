//! Step executor
//!
//! Runs one stage for one ingestion: assembles the stage's typed inputs
//! from accumulated metadata, performs the capability calls, and hands the
//! results to the pure transformation in [`super::stages`]. Capability
//! errors, timeouts and panics all come back as [`StageOutcome::Failed`];
//! nothing a stage does can take the engine down.

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, info_span, warn, Instrument};

use super::error::StageError;
use super::stages::character_bible::{self, CharacterBible};
use super::stages::core_extraction::{self, CoreStory};
use super::stages::final_package;
use super::stages::market_adaptation::{self, MarketAdaptation, MarketInput};
use super::stages::package_assembly::{self, AssemblyInput, PackageAssembly};
use super::stages::script_preprocess::{self, ScriptAnalysis};
use crate::capabilities::visual::{PLACEHOLDER_AI_IMAGE, PLACEHOLDER_TEMPLATE};
use crate::capabilities::{Capabilities, CapabilityError, LlmError, SourceDocument};
use crate::models::{Ingestion, StageName, Step, StepStatus};

/// Outputs of completed stages, keyed by stage name
#[derive(Debug, Clone, Default)]
pub struct AccumulatedMetadata {
    outputs: BTreeMap<StageName, Value>,
    skipped: BTreeSet<StageName>,
}

impl AccumulatedMetadata {
    /// Collect outputs of succeeded and skipped steps
    pub fn from_steps(steps: &[Step]) -> Self {
        let mut metadata = Self::default();
        for step in steps {
            match step.status {
                StepStatus::Succeeded => metadata.insert(step.name, step.output.clone(), false),
                StepStatus::Skipped => metadata.insert(step.name, step.output.clone(), true),
                _ => {}
            }
        }
        metadata
    }

    pub fn insert(&mut self, stage: StageName, output: Value, skipped: bool) {
        if skipped {
            self.skipped.insert(stage);
        } else {
            self.skipped.remove(&stage);
        }
        self.outputs.insert(stage, output);
    }

    pub fn get(&self, stage: StageName) -> Option<&Value> {
        self.outputs.get(&stage)
    }

    pub fn is_skipped(&self, stage: StageName) -> bool {
        self.skipped.contains(&stage)
    }

    /// Decode a required upstream output
    pub fn typed<T: DeserializeOwned>(&self, stage: StageName) -> Result<T, StageError> {
        let value = self.get(stage).ok_or_else(|| StageError::MalformedMetadata {
            stage,
            message: "no output recorded".to_string(),
        })?;
        serde_json::from_value(value.clone()).map_err(|e| StageError::MalformedMetadata {
            stage,
            message: e.to_string(),
        })
    }

    /// Decode an upstream output that is absent when the stage was skipped
    pub fn optional<T: DeserializeOwned>(&self, stage: StageName) -> Result<Option<T>, StageError> {
        if self.is_skipped(stage) {
            return Ok(None);
        }
        self.typed(stage).map(Some)
    }
}

/// Result of executing one stage
#[derive(Debug)]
pub enum StageOutcome {
    Succeeded(Value),
    Failed {
        error: StageError,
        /// What the stage had produced before failing
        partial: Option<Value>,
    },
}

pub struct StepExecutor {
    capabilities: Capabilities,
    timeout: Duration,
}

impl StepExecutor {
    pub fn new(capabilities: Capabilities, timeout: Duration) -> Self {
        Self {
            capabilities,
            timeout,
        }
    }

    /// Execute `stage` against the outputs accumulated so far
    pub async fn execute(
        &self,
        stage: StageName,
        ingestion: &Ingestion,
        metadata: &AccumulatedMetadata,
    ) -> StageOutcome {
        let span = info_span!("pipeline_stage", ingestion_id = %ingestion.id, stage = %stage);

        let result = AssertUnwindSafe(self.dispatch(stage, ingestion, metadata))
            .catch_unwind()
            .instrument(span)
            .await;

        match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => StageOutcome::Failed {
                error,
                partial: None,
            },
            Err(panic) => StageOutcome::Failed {
                error: StageError::Panicked(panic_message(panic.as_ref())),
                partial: None,
            },
        }
    }

    async fn dispatch(
        &self,
        stage: StageName,
        ingestion: &Ingestion,
        metadata: &AccumulatedMetadata,
    ) -> Result<StageOutcome, StageError> {
        match stage {
            StageName::ScriptPreprocess => {
                let (analysis, notes) = match self.load_document(&ingestion.source_file_url).await {
                    Ok(document) => (script_preprocess::parse_document(&document), Vec::new()),
                    Err(e) => {
                        warn!(
                            url = %ingestion.source_file_url,
                            error = %e,
                            "Source document unavailable, continuing with empty script"
                        );
                        (ScriptAnalysis::unavailable(), vec!["document_source"])
                    }
                };
                succeeded(&analysis, &notes)
            }

            StageName::CoreExtraction => {
                let script: ScriptAnalysis = metadata.typed(StageName::ScriptPreprocess)?;
                let answer = match self.ask_llm(core_extraction::prompt(&script)).await {
                    Ok(answer) => answer,
                    Err(error) => return failed(error, &core_extraction::heuristic(&script)),
                };
                succeeded(
                    &core_extraction::build(&script, answer.as_ref()),
                    &llm_notes(&answer),
                )
            }

            StageName::CharacterBible => {
                let script: ScriptAnalysis = metadata.typed(StageName::ScriptPreprocess)?;
                let story: CoreStory = metadata.typed(StageName::CoreExtraction)?;
                let answer = match self.ask_llm(character_bible::prompt(&script, &story)).await {
                    Ok(answer) => answer,
                    Err(error) => return failed(error, &character_bible::heuristic(&script)),
                };
                succeeded(
                    &character_bible::build(&script, answer.as_ref()),
                    &llm_notes(&answer),
                )
            }

            StageName::MarketAdaptation => {
                let story: CoreStory = metadata.typed(StageName::CoreExtraction)?;
                let input = MarketInput::assemble(&ingestion.hints, &story);
                let answer = match self.ask_llm(market_adaptation::prompt(&input)).await {
                    Ok(answer) => answer,
                    Err(error) => return failed(error, &market_adaptation::heuristic(&input)),
                };
                succeeded(
                    &market_adaptation::build(&input, answer.as_ref()),
                    &llm_notes(&answer),
                )
            }

            StageName::PackageAssembly => {
                let script: ScriptAnalysis = metadata.typed(StageName::ScriptPreprocess)?;
                let story: CoreStory = metadata.typed(StageName::CoreExtraction)?;
                let bible: CharacterBible = metadata.typed(StageName::CharacterBible)?;
                let market: Option<MarketAdaptation> =
                    metadata.optional(StageName::MarketAdaptation)?;

                let input = AssemblyInput {
                    title: package_assembly::project_title(&story, &ingestion.source_file_url),
                    story,
                    bible,
                    script,
                    market,
                };
                let brief = self
                    .capabilities
                    .visual
                    .generate_brief(&package_assembly::visual_description(&input))
                    .await;

                let mut notes = Vec::new();
                if brief.mood_board.iter().any(|url| url == PLACEHOLDER_AI_IMAGE) {
                    notes.push("image_generation");
                }
                if brief.reference_images.is_empty() {
                    notes.push("stock_search");
                }
                if brief.board_url == PLACEHOLDER_TEMPLATE {
                    notes.push("template_render");
                }
                succeeded(&package_assembly::build(&input, brief), &notes)
            }

            StageName::FinalPackage => {
                let assembly: PackageAssembly = metadata.typed(StageName::PackageAssembly)?;
                let story: CoreStory = metadata.typed(StageName::CoreExtraction)?;

                let deck = final_package::deck_request(&assembly);
                let document = final_package::document_request(&assembly, &story.synopsis);
                let visual = &self.capabilities.visual;
                let deck_url = visual
                    .render_template(deck.template_id, &deck.images, &deck.text)
                    .await;
                let document_url = visual
                    .render_template(document.template_id, &document.images, &document.text)
                    .await;

                let notes = if deck_url == PLACEHOLDER_TEMPLATE || document_url == PLACEHOLDER_TEMPLATE
                {
                    vec!["template_render"]
                } else {
                    Vec::new()
                };
                succeeded(&final_package::build(&assembly, deck_url, document_url), &notes)
            }
        }
    }

    async fn load_document(&self, url: &str) -> Result<SourceDocument, CapabilityError> {
        bounded(self.timeout, self.capabilities.documents.load(url))
            .await
            .unwrap_or(Err(CapabilityError::Timeout(self.timeout.as_millis() as u64)))
    }

    /// Ask the LLM; `Ok(None)` means degraded mode (no credential)
    async fn ask_llm(&self, prompt: String) -> Result<Option<Value>, StageError> {
        let llm = &self.capabilities.llm;
        match bounded(self.timeout, llm.run(&prompt)).await {
            Some(Ok(answer)) => Ok(Some(answer)),
            Some(Err(LlmError::NotConfigured(reason))) => {
                debug!(reason = %reason, "LLM not configured, using heuristic output");
                Ok(None)
            }
            Some(Err(e)) => Err(StageError::Capability {
                capability: "llm",
                message: format!("{} ({}): {}", llm.provider_name(), llm.model_name(), e),
            }),
            None => Err(StageError::Timeout {
                capability: "llm",
                millis: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// `None` on timeout
async fn bounded<T>(timeout: Duration, call: impl Future<Output = T>) -> Option<T> {
    tokio::time::timeout(timeout, call).await.ok()
}

fn llm_notes(answer: &Option<Value>) -> Vec<&'static str> {
    if answer.is_none() {
        vec!["llm"]
    } else {
        Vec::new()
    }
}

/// Serialize a stage output, recording any degraded capabilities
fn encode<T: Serialize>(output: &T, degraded: &[&str]) -> Result<Value, StageError> {
    let mut value = serde_json::to_value(output)?;
    if !degraded.is_empty() {
        if let Value::Object(map) = &mut value {
            map.insert("degraded".to_string(), json!(degraded));
        }
    }
    Ok(value)
}

fn succeeded<T: Serialize>(output: &T, degraded: &[&str]) -> Result<StageOutcome, StageError> {
    Ok(StageOutcome::Succeeded(encode(output, degraded)?))
}

fn failed<T: Serialize>(error: StageError, partial: &T) -> Result<StageOutcome, StageError> {
    let mut partial = encode(partial, &[])?;
    if let Value::Object(map) = &mut partial {
        map.insert("partial".to_string(), Value::Bool(true));
        map.insert("error_kind".to_string(), json!(error.kind()));
    }
    Ok(StageOutcome::Failed {
        error,
        partial: Some(partial),
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
