//! Ingestion lifecycle record
//!
//! Status progression (driven only by the pipeline engine):
//! queued → running → (paused → running)* → succeeded | failed
//!
//! `failed` and `succeeded` are terminal. A failed ingestion can only leave
//! `failed` through an explicit retry.

use chrono::{DateTime, Utc};
use manthan_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::step::StageName;

/// Ingestion status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Queued,
    Running,
    Paused,
    Failed,
    Succeeded,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Queued => "queued",
            IngestionStatus::Running => "running",
            IngestionStatus::Paused => "paused",
            IngestionStatus::Failed => "failed",
            IngestionStatus::Succeeded => "succeeded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestionStatus::Failed | IngestionStatus::Succeeded)
    }
}

impl FromStr for IngestionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(IngestionStatus::Queued),
            "running" => Ok(IngestionStatus::Running),
            "paused" => Ok(IngestionStatus::Paused),
            "failed" => Ok(IngestionStatus::Failed),
            "succeeded" => Ok(IngestionStatus::Succeeded),
            other => Err(Error::Internal(format!("Unknown ingestion status: {}", other))),
        }
    }
}

/// Region/platform hints consumed by market adaptation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketHints {
    pub region: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
}

/// Validated creation request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewIngestion {
    pub project_id: Option<String>,
    pub source_file_url: String,
    pub mime_type: Option<String>,
    #[serde(flatten)]
    pub hints: MarketHints,
}

impl NewIngestion {
    /// Reject malformed requests before anything is persisted
    ///
    /// `source_file_url` must be an absolute http(s) URL with a host.
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(self.source_file_url.trim()).map_err(|e| {
            Error::InvalidInput(format!(
                "source_file_url is not a valid URL ({}): {}",
                e, self.source_file_url
            ))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "source_file_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(Error::InvalidInput(
                "source_file_url must include a host".to_string(),
            ));
        }
        if self
            .hints
            .platforms
            .iter()
            .any(|platform| platform.trim().is_empty())
        {
            return Err(Error::InvalidInput(
                "platforms must not contain empty names".to_string(),
            ));
        }
        Ok(())
    }
}

/// One packaging request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingestion {
    pub id: Uuid,
    pub project_id: Option<String>,
    pub source_file_url: String,
    pub mime_type: Option<String>,
    pub hints: MarketHints,
    pub status: IngestionStatus,
    /// Percentage of stages completed (0-100)
    pub progress: u8,
    /// Index of the next stage to run; only moves forward
    pub current_step_index: usize,
    /// Stage that caused the `failed` status, if any
    pub failed_step: Option<StageName>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ingestion {
    /// Create a `queued` ingestion from a validated request
    pub fn new(request: NewIngestion) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id: request.project_id,
            source_file_url: request.source_file_url.trim().to_string(),
            mime_type: request.mime_type,
            hints: request.hints,
            status: IngestionStatus::Queued,
            progress: 0,
            current_step_index: 0,
            failed_step: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stage the next run would execute, None once all stages are done
    pub fn next_stage(&self) -> Option<StageName> {
        StageName::at(self.current_step_index)
    }
}

/// Progress percentage after `completed` of `total` stages
pub fn progress_for(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((100 * completed.min(total)) / total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> NewIngestion {
        NewIngestion {
            source_file_url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_accepts_https_url() {
        assert!(request("https://x/test.fdx").validate().is_ok());
        assert!(request("http://cdn.example.com/scripts/pilot.txt").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        for url in ["", "not a url", "ftp://host/file.fdx", "file:///tmp/script.fdx"] {
            let err = request(url).validate().unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "accepted {:?}", url);
        }
    }

    #[test]
    fn test_validate_rejects_blank_platform() {
        let mut req = request("https://x/test.fdx");
        req.hints.platforms = vec!["Prime Video India".to_string(), " ".to_string()];
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_new_ingestion_is_queued_at_first_stage() {
        let ingestion = Ingestion::new(request(" https://x/test.fdx "));
        assert_eq!(ingestion.status, IngestionStatus::Queued);
        assert_eq!(ingestion.progress, 0);
        assert_eq!(ingestion.current_step_index, 0);
        assert_eq!(ingestion.source_file_url, "https://x/test.fdx");
        assert_eq!(ingestion.next_stage(), Some(StageName::ScriptPreprocess));
    }

    #[test]
    fn test_progress_for() {
        assert_eq!(progress_for(0, 6), 0);
        assert_eq!(progress_for(1, 6), 16);
        assert_eq!(progress_for(3, 6), 50);
        assert_eq!(progress_for(6, 6), 100);
        assert_eq!(progress_for(9, 6), 100);
        assert_eq!(progress_for(1, 0), 0);
    }

    #[test]
    fn test_status_round_trip_and_terminal() {
        for status in [
            IngestionStatus::Queued,
            IngestionStatus::Running,
            IngestionStatus::Paused,
            IngestionStatus::Failed,
            IngestionStatus::Succeeded,
        ] {
            assert_eq!(status.as_str().parse::<IngestionStatus>().unwrap(), status);
        }
        assert!(IngestionStatus::Failed.is_terminal());
        assert!(IngestionStatus::Succeeded.is_terminal());
        assert!(!IngestionStatus::Paused.is_terminal());
    }
}
