//! HTTP API handlers for manthan-ingest
//!
//! REST endpoints for ingestions and recommendations, plus SSE pipeline
//! events and a health check.

pub mod events;
pub mod extract;
pub mod health;
pub mod ingestions;
pub mod recommendations;

pub use events::event_stream;
pub use health::health_routes;
pub use ingestions::ingestion_routes;
pub use recommendations::recommendation_routes;
