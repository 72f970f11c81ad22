//! Rendered pitch deck and story document

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::package_assembly::PackageAssembly;

pub const DECK_TEMPLATE: &str = "pitch_deck";
pub const DOCUMENT_TEMPLATE: &str = "story_document";

/// One template render the executor must perform
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub template_id: &'static str,
    pub images: Vec<String>,
    pub text: BTreeMap<String, String>,
}

/// Output of the `final_package` stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalPackage {
    pub title: String,
    pub deck_url: Option<String>,
    pub document_url: Option<String>,
    pub templates: Vec<String>,
}

/// Deck render: one text block per slide over the mood board images
pub fn deck_request(assembly: &PackageAssembly) -> RenderRequest {
    let mut text = BTreeMap::new();
    for slide in &assembly.deck_outline {
        text.insert(
            format!("slide_{:02}_{}", slide.index, slug(&slide.title)),
            slide.summary.clone(),
        );
    }
    RenderRequest {
        template_id: DECK_TEMPLATE,
        images: assembly.visual_brief.mood_board.clone(),
        text,
    }
}

/// Story document render: title, logline and budget summary
pub fn document_request(assembly: &PackageAssembly, synopsis: &str) -> RenderRequest {
    let mut text = BTreeMap::new();
    text.insert("title".to_string(), assembly.title.clone());
    text.insert("logline".to_string(), assembly.logline.clone());
    text.insert("synopsis".to_string(), synopsis.to_string());
    text.insert(
        "budget".to_string(),
        format!(
            "{} {} {} ({:?})",
            assembly.budget.currency, assembly.budget.total, assembly.budget.unit, assembly.budget.tier
        )
        .to_lowercase(),
    );
    RenderRequest {
        template_id: DOCUMENT_TEMPLATE,
        images: assembly.visual_brief.reference_images.clone(),
        text,
    }
}

pub fn build(assembly: &PackageAssembly, deck_url: String, document_url: String) -> FinalPackage {
    FinalPackage {
        title: assembly.title.clone(),
        deck_url: Some(deck_url),
        document_url: Some(document_url),
        templates: vec![DECK_TEMPLATE.to_string(), DOCUMENT_TEMPLATE.to_string()],
    }
}

fn slug(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
