//! Source document loading

use async_trait::async_trait;
use std::time::Duration;

use super::CapabilityError;

/// Largest source document accepted (screenplays are far smaller)
pub const MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

/// A fetched source document
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub url: String,
    pub content_type: Option<String>,
    pub text: String,
}

/// Fetches the source file an ingestion points at
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn load(&self, url: &str) -> Result<SourceDocument, CapabilityError>;
}

/// http(s) fetcher
pub struct HttpDocumentSource {
    client: reqwest::Client,
}

impl HttpDocumentSource {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: super::http_client(timeout),
        }
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn load(&self, url: &str) -> Result<SourceDocument, CapabilityError> {
        let response = self.client.get(url).send().await?.error_for_status()?;

        if let Some(length) = response.content_length() {
            if length as usize > MAX_DOCUMENT_BYTES {
                return Err(CapabilityError::RequestFailed(format!(
                    "source document is {} bytes (limit {})",
                    length, MAX_DOCUMENT_BYTES
                )));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await?;
        if bytes.len() > MAX_DOCUMENT_BYTES {
            return Err(CapabilityError::RequestFailed(format!(
                "source document exceeds {} bytes",
                MAX_DOCUMENT_BYTES
            )));
        }

        Ok(SourceDocument {
            url: url.to_string(),
            content_type,
            text: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}
