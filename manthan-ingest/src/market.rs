//! Static Indian market suggestion table
//!
//! Backs the recommendations endpoint and the degraded form of the
//! `market_adaptation` stage.

use serde::{Deserialize, Serialize};

const GENRES: [&str; 2] = ["Bollywood Drama", "Thriller/Crime"];
const PLATFORMS: [&str; 2] = ["Disney+ Hotstar", "Prime Video India"];
const NOTES: [&str; 1] = ["Festive season favors family dramas"];

/// Suggested genres, platforms and release notes for a region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSuggestions {
    pub region: Option<String>,
    pub genres: Vec<String>,
    pub platforms: Vec<String>,
    pub notes: Vec<String>,
}

/// Suggestions for `region` from the static table
pub fn static_suggestions(region: Option<&str>) -> ContentSuggestions {
    ContentSuggestions {
        region: region.map(str::to_string),
        genres: GENRES.iter().map(|s| s.to_string()).collect(),
        platforms: PLATFORMS.iter().map(|s| s.to_string()).collect(),
        notes: NOTES.iter().map(|s| s.to_string()).collect(),
    }
}
