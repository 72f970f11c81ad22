//! Region and platform adaptation
//!
//! Needs the ingestion's market hints plus the story from `core_extraction`;
//! the executor assembles both into a [`MarketInput`]. Every ingestion runs
//! this stage; without a region the pan-India table applies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::core_extraction::CoreStory;
use super::{string_field, string_list};
use crate::market::static_suggestions;
use crate::models::MarketHints;

/// Structured input assembled from hints and earlier stage outputs
#[derive(Debug, Clone, PartialEq)]
pub struct MarketInput {
    pub region: Option<String>,
    pub language: Option<String>,
    pub platforms: Vec<String>,
    pub logline: String,
    pub synopsis: String,
    pub themes: Vec<String>,
    pub genre: Option<String>,
}

impl MarketInput {
    pub fn assemble(hints: &MarketHints, story: &CoreStory) -> Self {
        Self {
            region: hints.region.clone(),
            language: hints.language.clone(),
            platforms: hints.platforms.clone(),
            logline: story.logline.clone(),
            synopsis: story.synopsis.clone(),
            themes: story.themes.clone(),
            genre: story.genre.clone(),
        }
    }
}

/// Output of the `market_adaptation` stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketAdaptation {
    pub region: Option<String>,
    pub language: Option<String>,
    pub platforms: Vec<String>,
    pub recommendations: Vec<String>,
    pub suggested_genres: Vec<String>,
    pub suggested_platforms: Vec<String>,
    pub notes: Vec<String>,
}

pub fn prompt(input: &MarketInput) -> String {
    format!(
        "Advise on adapting this project for the Indian market.\n\
         Region: {region}\n\
         Language: {language}\n\
         Target platforms: {platforms}\n\
         Logline: {logline}\n\
         Synopsis: {synopsis}\n\
         Themes: {themes}\n\n\
         Answer with a JSON object with keys \"recommendations\" (array of concrete \
         adaptation suggestions), \"suggested_genres\", \"suggested_platforms\" and \"notes\".\n",
        region = input.region.as_deref().unwrap_or("pan-India"),
        language = input.language.as_deref().unwrap_or("unspecified"),
        platforms = if input.platforms.is_empty() {
            "open".to_string()
        } else {
            input.platforms.join(", ")
        },
        logline = input.logline,
        synopsis = input.synopsis,
        themes = input.themes.join(", "),
    )
}

/// Recommendations from the static suggestion table
pub fn heuristic(input: &MarketInput) -> MarketAdaptation {
    let table = static_suggestions(input.region.as_deref());

    let lead_genre = input
        .genre
        .clone()
        .or_else(|| table.genres.first().cloned())
        .unwrap_or_default();
    let targets = if input.platforms.is_empty() {
        table.platforms.clone()
    } else {
        input.platforms.clone()
    };

    let mut recommendations: Vec<String> = targets
        .iter()
        .map(|platform| format!("Position for {} as a {}", platform, lead_genre))
        .collect();
    if let Some(region) = &input.region {
        recommendations.push(format!("Ground locations and casting in {}", region));
    }
    if let Some(language) = &input.language {
        recommendations.push(format!("Plan {} dialogue with subtitle tracks", language));
    }

    MarketAdaptation {
        region: input.region.clone(),
        language: input.language.clone(),
        platforms: input.platforms.clone(),
        recommendations,
        suggested_genres: table.genres,
        suggested_platforms: table.platforms,
        notes: table.notes,
    }
}

/// Stage output from the LLM answer, falling back to the table per field
pub fn build(input: &MarketInput, answer: Option<&Value>) -> MarketAdaptation {
    let fallback = heuristic(input);
    let Some(answer) = answer else {
        return fallback;
    };

    let or_fallback = |key: &str, fallback: Vec<String>| {
        let values = string_list(answer, key);
        if values.is_empty() {
            fallback
        } else {
            values
        }
    };

    let mut recommendations = string_list(answer, "recommendations");
    if recommendations.is_empty() {
        recommendations = string_field(answer, "text")
            .map(|text| vec![text])
            .unwrap_or(fallback.recommendations);
    }

    MarketAdaptation {
        region: fallback.region,
        language: fallback.language,
        platforms: fallback.platforms,
        recommendations,
        suggested_genres: or_fallback("suggested_genres", fallback.suggested_genres),
        suggested_platforms: or_fallback("suggested_platforms", fallback.suggested_platforms),
        notes: or_fallback("notes", fallback.notes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(region: Option<&str>, platforms: &[&str]) -> MarketInput {
        MarketInput::assemble(
            &MarketHints {
                region: region.map(str::to_string),
                language: Some("Hindi".to_string()),
                platforms: platforms.iter().map(|s| s.to_string()).collect(),
            },
            &CoreStory {
                logline: "A clerk takes on a cartel".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_heuristic_without_hints_uses_pan_india_table() {
        let input = MarketInput::assemble(&MarketHints::default(), &CoreStory::default());
        let result = heuristic(&input);
        assert_eq!(
            result.recommendations,
            vec![
                "Position for Disney+ Hotstar as a Bollywood Drama",
                "Position for Prime Video India as a Bollywood Drama",
            ]
        );
        assert!(result.region.is_none());
    }

    #[test]
    fn test_language_only_hint_is_carried() {
        let hints = MarketHints {
            language: Some("Tamil".to_string()),
            ..Default::default()
        };
        let result = heuristic(&MarketInput::assemble(&hints, &CoreStory::default()));
        assert_eq!(result.language.as_deref(), Some("Tamil"));
        assert_eq!(
            result.recommendations.last().map(String::as_str),
            Some("Plan Tamil dialogue with subtitle tracks")
        );
    }

    #[test]
    fn test_heuristic_targets_requested_platforms() {
        let result = heuristic(&input(Some("Mumbai"), &["Disney+ Hotstar"]));
        assert_eq!(
            result.recommendations,
            vec![
                "Position for Disney+ Hotstar as a Bollywood Drama",
                "Ground locations and casting in Mumbai",
                "Plan Hindi dialogue with subtitle tracks",
            ]
        );
        assert_eq!(result.suggested_platforms, vec!["Disney+ Hotstar", "Prime Video India"]);
        assert_eq!(result.notes, vec!["Festive season favors family dramas"]);
    }

    #[test]
    fn test_heuristic_defaults_to_table_platforms() {
        let result = heuristic(&input(Some("Chennai"), &[]));
        assert_eq!(result.recommendations.len(), 4);
        assert!(result.recommendations[1].contains("Prime Video India"));
    }

    #[test]
    fn test_build_uses_answer() {
        let answer = json!({
            "recommendations": ["Shift climax to Diwali"],
            "suggested_genres": ["Family Drama"]
        });
        let result = build(&input(Some("Delhi"), &[]), Some(&answer));
        assert_eq!(result.recommendations, vec!["Shift climax to Diwali"]);
        assert_eq!(result.suggested_genres, vec!["Family Drama"]);
        assert_eq!(result.suggested_platforms.len(), 2);
        assert_eq!(result.region.as_deref(), Some("Delhi"));
    }
}
