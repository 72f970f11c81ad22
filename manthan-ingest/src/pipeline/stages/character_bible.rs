//! Character profiles
//!
//! Profiles always start from parsed dialogue statistics. When the LLM
//! answers, its descriptions are merged onto the parsed profiles by name.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::core_extraction::CoreStory;
use super::script_preprocess::ScriptAnalysis;
use super::string_field;

/// Share of all dialogue blocks that makes a lead
pub const LEAD_SHARE: f64 = 0.25;
/// Share of all dialogue blocks that makes a supporting role
pub const SUPPORTING_SHARE: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Lead,
    Supporting,
    Minor,
}

impl Role {
    /// Role tier from a character's share of dialogue
    pub fn from_share(share: f64) -> Self {
        if share >= LEAD_SHARE {
            Role::Lead
        } else if share >= SUPPORTING_SHARE {
            Role::Supporting
        } else {
            Role::Minor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub name: String,
    pub role: Role,
    pub dialogue_lines: usize,
    pub scene_count: usize,
    /// Heading of the first scene the character speaks in
    pub first_appearance: Option<String>,
    pub description: Option<String>,
    pub arc: Option<String>,
}

/// Output of the `character_bible` stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterBible {
    pub characters: Vec<CharacterProfile>,
}

impl CharacterBible {
    /// Lead and supporting characters
    pub fn principal_cast(&self) -> impl Iterator<Item = &CharacterProfile> {
        self.characters.iter().filter(|c| c.role != Role::Minor)
    }
}

pub fn prompt(script: &ScriptAnalysis, story: &CoreStory) -> String {
    let cast: Vec<String> = script
        .characters
        .iter()
        .take(15)
        .map(|c| {
            format!(
                "- {}: {} dialogue blocks in {} scenes",
                c.name,
                c.dialogue_lines,
                c.scenes.len()
            )
        })
        .collect();

    format!(
        "Write a character bible for this screenplay.\n\
         Logline: {logline}\n\
         Synopsis: {synopsis}\n\n\
         Speaking cast:\n{cast}\n\n\
         Answer with a JSON object {{\"characters\": [{{\"name\", \"description\", \"arc\"}}]}} \
         using the names exactly as listed.\n",
        logline = story.logline,
        synopsis = story.synopsis,
        cast = cast.join("\n"),
    )
}

/// Profiles from dialogue statistics alone
pub fn heuristic(script: &ScriptAnalysis) -> CharacterBible {
    let total_blocks = script.stats.dialogue_blocks.max(1) as f64;

    let characters = script
        .characters
        .iter()
        .map(|stats| {
            let role = Role::from_share(stats.dialogue_lines as f64 / total_blocks);
            let first_appearance = stats
                .scenes
                .first()
                .and_then(|index| script.scenes.get(*index))
                .map(|scene| scene.heading.clone());
            CharacterProfile {
                name: stats.name.clone(),
                role,
                dialogue_lines: stats.dialogue_lines,
                scene_count: stats.scenes.len(),
                first_appearance,
                description: None,
                arc: None,
            }
        })
        .collect();

    CharacterBible { characters }
}

/// Merge the LLM answer onto the heuristic profiles
pub fn build(script: &ScriptAnalysis, answer: Option<&Value>) -> CharacterBible {
    let mut bible = heuristic(script);
    let Some(described) = answer
        .and_then(|a| a.get("characters"))
        .and_then(Value::as_array)
    else {
        return bible;
    };

    for entry in described {
        let Some(name) = string_field(entry, "name") else {
            continue;
        };
        let description = string_field(entry, "description");
        let arc = string_field(entry, "arc");

        match bible
            .characters
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(&name))
        {
            Some(profile) => {
                profile.description = description.or(profile.description.take());
                profile.arc = arc.or(profile.arc.take());
            }
            // Named by the model but never speaks on the page
            None => bible.characters.push(CharacterProfile {
                name: name.to_uppercase(),
                role: Role::Minor,
                dialogue_lines: 0,
                scene_count: 0,
                first_appearance: None,
                description,
                arc,
            }),
        }
    }

    bible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::SourceDocument;
    use crate::pipeline::stages::script_preprocess::parse_document;
    use serde_json::json;

    /// RAJ 6 blocks, MEERA 3, AMMA 1: 60% / 30% / 10%
    fn script() -> ScriptAnalysis {
        let mut text = String::from("INT. HOME - DAY\n\n");
        for _ in 0..6 {
            text.push_str("RAJ\nLine.\n\n");
        }
        text.push_str("EXT. STREET - NIGHT\n\n");
        for _ in 0..3 {
            text.push_str("MEERA\nLine.\n\n");
        }
        text.push_str("AMMA\nLine.\n\n");
        parse_document(&SourceDocument {
            url: "https://x/s.txt".to_string(),
            content_type: None,
            text,
        })
    }

    #[test]
    fn test_role_tiers() {
        assert_eq!(Role::from_share(0.25), Role::Lead);
        assert_eq!(Role::from_share(0.249), Role::Supporting);
        assert_eq!(Role::from_share(0.10), Role::Supporting);
        assert_eq!(Role::from_share(0.05), Role::Minor);
    }

    #[test]
    fn test_heuristic_profiles() {
        let bible = heuristic(&script());
        let roles: Vec<(&str, Role)> = bible
            .characters
            .iter()
            .map(|c| (c.name.as_str(), c.role))
            .collect();
        assert_eq!(
            roles,
            vec![
                ("RAJ", Role::Lead),
                ("MEERA", Role::Lead),
                ("AMMA", Role::Supporting)
            ]
        );
        assert_eq!(
            bible.characters[1].first_appearance.as_deref(),
            Some("EXT. STREET - NIGHT")
        );
        assert_eq!(bible.principal_cast().count(), 3);
    }

    #[test]
    fn test_build_merges_descriptions_by_name() {
        let answer = json!({
            "characters": [
                {"name": "Raj", "description": "A dockworker in debt", "arc": "Learns to ask for help"},
                {"name": "Inspector Desai", "description": "Never seen, always felt"},
                {"description": "no name, ignored"}
            ]
        });
        let bible = build(&script(), Some(&answer));

        let raj = &bible.characters[0];
        assert_eq!(raj.description.as_deref(), Some("A dockworker in debt"));
        assert_eq!(raj.role, Role::Lead);

        let desai = bible.characters.last().unwrap();
        assert_eq!(desai.name, "INSPECTOR DESAI");
        assert_eq!(desai.role, Role::Minor);
        assert_eq!(bible.characters.len(), 4);
    }

    #[test]
    fn test_empty_script_has_no_profiles() {
        assert!(heuristic(&ScriptAnalysis::unavailable()).characters.is_empty());
    }
}
