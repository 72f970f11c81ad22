//! Deck outline, production budget and visual brief

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::character_bible::{CharacterBible, Role};
use super::core_extraction::{title_case, CoreStory};
use super::market_adaptation::MarketAdaptation;
use super::script_preprocess::{Scene, ScriptAnalysis};
use crate::capabilities::VisualBrief;

/// Budget figures are in lakh rupees
pub const BUDGET_CURRENCY: &str = "INR";
pub const BUDGET_UNIT: &str = "lakh";

const INTERIOR_SCENE_COST: f64 = 2.0;
const EXTERIOR_SCENE_COST: f64 = 3.5;
const MIXED_SCENE_COST: f64 = 4.0;
const ESTABLISHING_SCENE_COST: f64 = 1.0;
const UNKNOWN_SCENE_COST: f64 = 2.5;
const NIGHT_MULTIPLIER: f64 = 1.4;

const LEAD_FEE: f64 = 25.0;
const SUPPORTING_FEE: f64 = 8.0;
const MINOR_FEE: f64 = 1.0;
const LOCATION_COST: f64 = 1.5;
const CONTINGENCY_RATE: f64 = 0.10;

const MICRO_CEILING: f64 = 100.0;
const MID_CEILING: f64 = 500.0;

/// Everything the packaging stage reads from earlier stages
#[derive(Debug, Clone)]
pub struct AssemblyInput {
    pub title: String,
    pub story: CoreStory,
    pub bible: CharacterBible,
    pub script: ScriptAnalysis,
    /// Absent when market adaptation was skipped
    pub market: Option<MarketAdaptation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slide {
    pub index: usize,
    pub title: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetTier {
    Micro,
    Mid,
    Tentpole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub currency: String,
    pub unit: String,
    pub scenes: f64,
    pub cast: f64,
    pub locations: f64,
    pub contingency: f64,
    pub total: f64,
    pub tier: BudgetTier,
    pub assumptions: Vec<String>,
}

/// Output of the `package_assembly` stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageAssembly {
    pub title: String,
    pub logline: String,
    pub deck_outline: Vec<Slide>,
    pub budget: Budget,
    pub visual_brief: VisualBrief,
}

/// Project title: the model's title, else the source file name
pub fn project_title(story: &CoreStory, source_file_url: &str) -> String {
    if let Some(title) = story.title.as_deref().filter(|t| !t.trim().is_empty()) {
        return title.trim().to_string();
    }

    let stem = url::Url::parse(source_file_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .map(|file| match file.rsplit_once('.') {
            Some((stem, _)) => stem.to_string(),
            None => file,
        })
        .map(|stem| stem.replace(['_', '-'], " "))
        .filter(|stem| !stem.trim().is_empty());

    match stem {
        Some(stem) => title_case(&stem),
        None => "Untitled Project".to_string(),
    }
}

/// Description handed to the visual asset capability
pub fn visual_description(input: &AssemblyInput) -> String {
    let genre = input
        .story
        .genre
        .clone()
        .or_else(|| {
            input
                .market
                .as_ref()
                .and_then(|m| m.suggested_genres.first().cloned())
        })
        .unwrap_or_else(|| "drama".to_string());

    let locations: Vec<String> = distinct_locations(&input.script.scenes)
        .into_iter()
        .take(3)
        .map(|l| title_case(&l))
        .collect();

    let mut description = format!("{} {}: {}", input.title, genre, input.story.logline);
    if !locations.is_empty() {
        description.push_str(&format!(" Key locations: {}.", locations.join(", ")));
    }
    description
}

pub fn deck_outline(input: &AssemblyInput) -> Vec<Slide> {
    let mut slides = vec![
        ("Title", input.title.clone()),
        ("Logline", input.story.logline.clone()),
        ("Synopsis", input.story.synopsis.clone()),
    ];

    let principal: Vec<String> = input
        .bible
        .principal_cast()
        .map(|c| {
            let role = match c.role {
                Role::Lead => "lead",
                Role::Supporting => "supporting",
                Role::Minor => "minor",
            };
            format!("{} ({})", title_case(&c.name), role)
        })
        .collect();
    if !principal.is_empty() {
        slides.push(("Characters", principal.join(", ")));
    }

    if !input.story.themes.is_empty() {
        slides.push(("Themes", input.story.themes.join(", ")));
    }

    if let Some(market) = &input.market {
        slides.push(("Market Positioning", market.recommendations.join("; ")));
    }

    slides.push(("Visual Direction", "Mood board and art direction notes".to_string()));
    slides.push(("Budget Snapshot", "Heuristic production estimate".to_string()));

    slides
        .into_iter()
        .enumerate()
        .map(|(index, (title, summary))| Slide {
            index,
            title: title.to_string(),
            summary,
        })
        .collect()
}

fn scene_cost(scene: &Scene) -> f64 {
    let base = match scene.setting.as_deref() {
        Some("INT") => INTERIOR_SCENE_COST,
        Some("EXT") => EXTERIOR_SCENE_COST,
        Some("INT/EXT") => MIXED_SCENE_COST,
        Some("EST") => ESTABLISHING_SCENE_COST,
        _ => UNKNOWN_SCENE_COST,
    };
    let is_night = scene
        .time_of_day
        .as_deref()
        .map_or(false, |t| t.contains("NIGHT"));
    if is_night {
        base * NIGHT_MULTIPLIER
    } else {
        base
    }
}

fn distinct_locations(scenes: &[Scene]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    scenes
        .iter()
        .filter(|s| !s.location.is_empty())
        .filter(|s| seen.insert(s.location.clone()))
        .map(|s| s.location.clone())
        .collect()
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Heuristic production budget
pub fn estimate_budget(script: &ScriptAnalysis, bible: &CharacterBible) -> Budget {
    let scenes: f64 = script.scenes.iter().map(scene_cost).sum();
    let cast: f64 = bible
        .characters
        .iter()
        .map(|c| match c.role {
            Role::Lead => LEAD_FEE,
            Role::Supporting => SUPPORTING_FEE,
            Role::Minor => MINOR_FEE,
        })
        .sum();
    let location_count = distinct_locations(&script.scenes).len();
    let locations = location_count as f64 * LOCATION_COST;
    let contingency = (scenes + cast + locations) * CONTINGENCY_RATE;
    let total = scenes + cast + locations + contingency;

    let tier = if total < MICRO_CEILING {
        BudgetTier::Micro
    } else if total < MID_CEILING {
        BudgetTier::Mid
    } else {
        BudgetTier::Tentpole
    };

    Budget {
        currency: BUDGET_CURRENCY.to_string(),
        unit: BUDGET_UNIT.to_string(),
        scenes: round1(scenes),
        cast: round1(cast),
        locations: round1(locations),
        contingency: round1(contingency),
        total: round1(total),
        tier,
        assumptions: vec![
            format!(
                "{} scenes priced by setting, night shoots x{}",
                script.scenes.len(),
                NIGHT_MULTIPLIER
            ),
            format!("{} distinct locations", location_count),
            format!("{}% contingency", (CONTINGENCY_RATE * 100.0) as u32),
        ],
    }
}

pub fn build(input: &AssemblyInput, visual_brief: VisualBrief) -> PackageAssembly {
    PackageAssembly {
        title: input.title.clone(),
        logline: input.story.logline.clone(),
        deck_outline: deck_outline(input),
        budget: estimate_budget(&input.script, &input.bible),
        visual_brief,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::SourceDocument;
    use crate::pipeline::stages::{character_bible, script_preprocess::parse_document};

    fn input(market: Option<MarketAdaptation>) -> AssemblyInput {
        let script = parse_document(&SourceDocument {
            url: "https://x/test.fdx".to_string(),
            content_type: None,
            text: "INT. OFFICE - DAY\n\nRAJ\nSign it.\n\nEXT. DOCKS - NIGHT\n\nRAJ\nRun.\n\nMEERA\nNo.\n"
                .to_string(),
        });
        let bible = character_bible::heuristic(&script);
        AssemblyInput {
            title: "Test".to_string(),
            story: CoreStory {
                logline: "A clerk takes on a cartel".to_string(),
                themes: vec!["loyalty".to_string()],
                ..Default::default()
            },
            bible,
            script,
            market,
        }
    }

    #[test]
    fn test_project_title() {
        let story = CoreStory::default();
        assert_eq!(project_title(&story, "https://x/test.fdx"), "Test");
        assert_eq!(
            project_title(&story, "https://cdn.example.com/scripts/monsoon_wedding-v2.txt?sig=1"),
            "Monsoon Wedding V2"
        );
        assert_eq!(project_title(&story, "https://x/"), "Untitled Project");

        let named = CoreStory {
            title: Some("Harbour Lights".to_string()),
            ..Default::default()
        };
        assert_eq!(project_title(&named, "https://x/test.fdx"), "Harbour Lights");
    }

    #[test]
    fn test_budget_heuristic() {
        let input = input(None);
        let budget = estimate_budget(&input.script, &input.bible);

        // INT day 2.0 + EXT night 3.5 * 1.4
        assert_eq!(budget.scenes, 6.9);
        // RAJ 2/3 and MEERA 1/3 of dialogue are both leads
        assert_eq!(budget.cast, 50.0);
        assert_eq!(budget.locations, 3.0);
        assert_eq!(budget.total, 65.9);
        assert_eq!(budget.tier, BudgetTier::Micro);
        assert_eq!(budget.currency, "INR");
    }

    #[test]
    fn test_empty_script_budget_is_zero() {
        let budget = estimate_budget(&ScriptAnalysis::unavailable(), &CharacterBible::default());
        assert_eq!(budget.total, 0.0);
        assert_eq!(budget.tier, BudgetTier::Micro);
    }

    #[test]
    fn test_deck_outline_includes_market_when_present() {
        let without: Vec<String> = deck_outline(&input(None))
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(
            without,
            vec![
                "Title",
                "Logline",
                "Synopsis",
                "Characters",
                "Themes",
                "Visual Direction",
                "Budget Snapshot"
            ]
        );

        let market = MarketAdaptation {
            recommendations: vec!["Release before Diwali".to_string()],
            ..Default::default()
        };
        let with = deck_outline(&input(Some(market)));
        let slide = with.iter().find(|s| s.title == "Market Positioning").unwrap();
        assert_eq!(slide.summary, "Release before Diwali");
        assert_eq!(with.last().unwrap().index, with.len() - 1);
    }

    #[test]
    fn test_visual_description() {
        let description = visual_description(&input(None));
        assert_eq!(
            description,
            "Test drama: A clerk takes on a cartel Key locations: Office, Docks."
        );
    }
}
