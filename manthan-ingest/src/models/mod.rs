//! Data models for manthan-ingest
//!
//! - Ingestion: one packaging request and its lifecycle record
//! - Step: one execution record of a named pipeline stage
//! - Package: final artifact summary of a succeeded ingestion

pub mod ingestion;
pub mod package;
pub mod step;

pub use ingestion::{progress_for, Ingestion, IngestionStatus, MarketHints, NewIngestion};
pub use package::Package;
pub use step::{StageName, Step, StepStatus};
