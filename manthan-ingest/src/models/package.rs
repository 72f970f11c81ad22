//! Final package artifact

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Final artifact summary, created once when the last stage succeeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: Uuid,
    pub ingestion_id: Uuid,
    pub document_url: Option<String>,
    pub deck_url: Option<String>,
    /// Merged `package_assembly` and `final_package` outputs
    pub summary: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Package {
    /// Build the package from the two packaging stage outputs
    ///
    /// `final_package` keys win over `package_assembly` keys on collision.
    /// Non-object outputs contribute nothing to the summary.
    pub fn assemble(ingestion_id: Uuid, package_assembly: &Value, final_package: &Value) -> Self {
        let mut summary = Map::new();
        for output in [package_assembly, final_package] {
            if let Value::Object(map) = output {
                for (key, value) in map {
                    summary.insert(key.clone(), value.clone());
                }
            }
        }

        let url_field = |key: &str| {
            final_package
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        Self {
            id: Uuid::new_v4(),
            ingestion_id,
            document_url: url_field("document_url"),
            deck_url: url_field("deck_url"),
            summary,
            created_at: Utc::now(),
        }
    }
}
