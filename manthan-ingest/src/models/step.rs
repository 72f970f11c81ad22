//! Pipeline stage names and per-stage step records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The six fixed pipeline stages, in execution order
///
/// The order of `StageName::ALL` is the pipeline order and never changes at
/// runtime. Step records, executor dispatch, and persisted names all use the
/// snake_case form returned by [`StageName::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Parse screenplay structure (scenes, characters, dialogue)
    ScriptPreprocess,
    /// Logline, synopsis, themes
    CoreExtraction,
    /// Character profiles
    CharacterBible,
    /// Region/platform adaptation recommendations
    MarketAdaptation,
    /// Deck outline, budget, visual brief
    PackageAssembly,
    /// Rendered document and deck
    FinalPackage,
}

impl StageName {
    pub const ALL: [StageName; 6] = [
        StageName::ScriptPreprocess,
        StageName::CoreExtraction,
        StageName::CharacterBible,
        StageName::MarketAdaptation,
        StageName::PackageAssembly,
        StageName::FinalPackage,
    ];

    /// Number of stages in the pipeline
    pub const COUNT: usize = Self::ALL.len();

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::ScriptPreprocess => "script_preprocess",
            StageName::CoreExtraction => "core_extraction",
            StageName::CharacterBible => "character_bible",
            StageName::MarketAdaptation => "market_adaptation",
            StageName::PackageAssembly => "package_assembly",
            StageName::FinalPackage => "final_package",
        }
    }

    /// Position of this stage in the pipeline (0-based)
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Stage at `index`, or None past the end of the pipeline
    pub fn at(index: usize) -> Option<StageName> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = manthan_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| manthan_common::Error::Internal(format!("Unknown stage name: {}", s)))
    }
}

/// Step execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Queued,
    Running,
    Failed,
    Succeeded,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Queued => "queued",
            StepStatus::Running => "running",
            StepStatus::Failed => "failed",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Skipped => "skipped",
        }
    }

    /// Succeeded or skipped: later stages may run
    pub fn is_complete(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Skipped)
    }
}

impl FromStr for StepStatus {
    type Err = manthan_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(StepStatus::Queued),
            "running" => Ok(StepStatus::Running),
            "failed" => Ok(StepStatus::Failed),
            "succeeded" => Ok(StepStatus::Succeeded),
            "skipped" => Ok(StepStatus::Skipped),
            other => Err(manthan_common::Error::Internal(format!(
                "Unknown step status: {}",
                other
            ))),
        }
    }
}

/// One execution record of a pipeline stage, owned by one ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub ingestion_id: Uuid,
    /// Index into `StageName::ALL`
    pub position: usize,
    pub name: StageName,
    pub status: StepStatus,
    /// Stage output (JSON object); partial output on failure, `{}` if none
    pub output: Value,
    pub error: Option<String>,
    /// How many times the stage has been started
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Step {
    /// Fresh `queued` record for `stage`
    pub fn queued(ingestion_id: Uuid, stage: StageName) -> Self {
        Self {
            id: Uuid::new_v4(),
            ingestion_id,
            position: stage.index(),
            name: stage,
            status: StepStatus::Queued,
            output: Value::Object(Default::default()),
            error: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }
}
