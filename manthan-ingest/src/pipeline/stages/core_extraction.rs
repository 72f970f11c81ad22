//! Logline, synopsis and themes

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::script_preprocess::ScriptAnalysis;
use super::{string_field, string_list};

/// Output of the `core_extraction` stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreStory {
    pub title: Option<String>,
    pub logline: String,
    pub synopsis: String,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub genre: Option<String>,
}

pub fn prompt(script: &ScriptAnalysis) -> String {
    let headings: Vec<&str> = script
        .scenes
        .iter()
        .take(40)
        .map(|s| s.heading.as_str())
        .collect();
    let cast: Vec<String> = script
        .characters
        .iter()
        .take(12)
        .map(|c| format!("{} ({} lines)", c.name, c.dialogue_lines))
        .collect();

    format!(
        "You are a development executive at an Indian film and streaming studio.\n\
         Read the screenplay summary below and answer with a single JSON object with keys \
         \"title\", \"logline\" (one sentence), \"synopsis\" (one paragraph), \
         \"themes\" (array of short strings) and \"genre\".\n\n\
         Scenes ({scene_count}):\n{headings}\n\n\
         Speaking cast:\n{cast}\n\n\
         Opening excerpt:\n{excerpt}\n",
        scene_count = script.stats.scene_count,
        headings = headings.join("\n"),
        cast = cast.join("\n"),
        excerpt = script.excerpt,
    )
}

/// Heuristic story summary from parse statistics alone
pub fn heuristic(script: &ScriptAnalysis) -> CoreStory {
    if !script.source_available {
        return CoreStory {
            logline: "Logline pending: source script could not be loaded".to_string(),
            ..Default::default()
        };
    }

    let logline = match script.lead() {
        Some(lead) => format!(
            "{} drives a story told across {} scenes and {} dialogue exchanges.",
            title_case(&lead.name),
            script.stats.scene_count,
            script.stats.dialogue_blocks
        ),
        None => format!(
            "A story told across {} scenes (about {} pages).",
            script.stats.scene_count, script.stats.estimated_pages
        ),
    };

    let synopsis = match (script.scenes.first(), script.scenes.last()) {
        (Some(first), Some(last)) if first.index != last.index => format!(
            "Opens at {} and closes at {}. {}",
            title_case(&first.location),
            title_case(&last.location),
            script.excerpt
        ),
        (Some(only), _) => format!("Set at {}. {}", title_case(&only.location), script.excerpt),
        _ => script.excerpt.clone(),
    };

    CoreStory {
        title: None,
        logline,
        synopsis: synopsis.trim().to_string(),
        themes: Vec::new(),
        genre: None,
    }
}

/// Stage output from the LLM answer, falling back to the heuristic per field
pub fn build(script: &ScriptAnalysis, answer: Option<&Value>) -> CoreStory {
    let fallback = heuristic(script);
    let Some(answer) = answer else {
        return fallback;
    };

    CoreStory {
        title: string_field(answer, "title"),
        logline: string_field(answer, "logline").unwrap_or(fallback.logline),
        synopsis: string_field(answer, "synopsis")
            .or_else(|| string_field(answer, "text"))
            .unwrap_or(fallback.synopsis),
        themes: string_list(answer, "themes"),
        genre: string_field(answer, "genre"),
    }
}

/// `INSPECTOR DESAI` → `Inspector Desai`
pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
