//! Pipeline event types and EventBus
//!
//! Events are broadcast over a tokio broadcast channel and serialized for SSE
//! transmission. Emission is lossy: having no subscribers is not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Ingestion row created in `queued`
    IngestionCreated {
        ingestion_id: Uuid,
        source_file_url: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage was marked running
    StageStarted {
        ingestion_id: Uuid,
        stage: String,
        step_index: usize,
        timestamp: DateTime<Utc>,
    },

    /// A stage finished as `succeeded` or `skipped`
    StageCompleted {
        ingestion_id: Uuid,
        stage: String,
        status: String,
        /// Ingestion progress after this stage (0-100)
        progress: u8,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A stage failed; the run stops here
    StageFailed {
        ingestion_id: Uuid,
        stage: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Run stopped at a stage boundary after a pause request
    IngestionPaused {
        ingestion_id: Uuid,
        next_step_index: usize,
        timestamp: DateTime<Utc>,
    },

    /// All stages completed and the package was stored
    IngestionSucceeded {
        ingestion_id: Uuid,
        package_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Ingestion marked failed
    IngestionFailed {
        ingestion_id: Uuid,
        failed_stage: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::IngestionCreated { .. } => "IngestionCreated",
            PipelineEvent::StageStarted { .. } => "StageStarted",
            PipelineEvent::StageCompleted { .. } => "StageCompleted",
            PipelineEvent::StageFailed { .. } => "StageFailed",
            PipelineEvent::IngestionPaused { .. } => "IngestionPaused",
            PipelineEvent::IngestionSucceeded { .. } => "IngestionSucceeded",
            PipelineEvent::IngestionFailed { .. } => "IngestionFailed",
        }
    }

    /// Ingestion the event belongs to
    pub fn ingestion_id(&self) -> Uuid {
        match self {
            PipelineEvent::IngestionCreated { ingestion_id, .. }
            | PipelineEvent::StageStarted { ingestion_id, .. }
            | PipelineEvent::StageCompleted { ingestion_id, .. }
            | PipelineEvent::StageFailed { ingestion_id, .. }
            | PipelineEvent::IngestionPaused { ingestion_id, .. }
            | PipelineEvent::IngestionSucceeded { ingestion_id, .. }
            | PipelineEvent::IngestionFailed { ingestion_id, .. } => *ingestion_id,
        }
    }
}

/// Broadcast bus for pipeline events
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lag (and lose the oldest events) once `capacity`
    /// events are buffered.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();

        bus.emit_lossy(PipelineEvent::StageStarted {
            ingestion_id: id,
            stage: "script_preprocess".to_string(),
            step_index: 0,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "StageStarted");
        assert_eq!(event.ingestion_id(), id);
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit_lossy(PipelineEvent::IngestionPaused {
            ingestion_id: Uuid::new_v4(),
            next_step_index: 2,
            timestamp: Utc::now(),
        });
        assert_eq!(bus.capacity(), 4);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = PipelineEvent::IngestionFailed {
            ingestion_id: Uuid::nil(),
            failed_stage: "core_extraction".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "IngestionFailed");
        assert_eq!(json["failed_stage"], "core_extraction");
    }
}
