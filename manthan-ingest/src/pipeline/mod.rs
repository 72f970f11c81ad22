//! Content packaging pipeline
//!
//! - `engine`: run claiming, stage loop, pause/resume/retry, crash recovery
//! - `executor`: per-stage dispatch and capability isolation
//! - `stages`: the six pure stage transformations

pub mod engine;
pub mod error;
pub mod executor;
pub mod stages;

pub use engine::{PipelineEngine, RunTrigger};
pub use error::StageError;
pub use executor::{AccumulatedMetadata, StageOutcome, StepExecutor};
