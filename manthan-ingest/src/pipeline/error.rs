//! Stage failure type

use thiserror::Error;

use crate::models::StageName;

/// Why a stage failed
///
/// Any of these halts the run and marks the ingestion `failed`. A capability
/// that is merely not configured never produces a `StageError`; the stage
/// degrades instead.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{capability} call failed: {message}")]
    Capability {
        capability: &'static str,
        message: String,
    },

    #[error("{capability} call timed out after {millis}ms")]
    Timeout {
        capability: &'static str,
        millis: u64,
    },

    #[error("output of {stage} is missing or malformed: {message}")]
    MalformedMetadata { stage: StageName, message: String },

    #[error("failed to encode stage output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("stage panicked: {0}")]
    Panicked(String),
}

impl StageError {
    /// Short machine-readable kind, recorded with partial output
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Capability { .. } => "capability",
            StageError::Timeout { .. } => "timeout",
            StageError::MalformedMetadata { .. } => "malformed_metadata",
            StageError::Output(_) => "output",
            StageError::Panicked(_) => "panic",
        }
    }
}
