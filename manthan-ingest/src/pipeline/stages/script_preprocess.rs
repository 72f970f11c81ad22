//! Screenplay structure parsing
//!
//! Accepts Final Draft XML (`.fdx`) and plain-text screenplays. Both are
//! reduced to the same element stream (scene headings, character cues,
//! dialogue, parentheticals, action, transitions) before analysis, so the
//! output shape does not depend on the source format.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::capabilities::SourceDocument;

/// Words per screenplay page used for the page estimate
pub const WORDS_PER_PAGE: usize = 180;

const EXCERPT_CHARS: usize = 280;
const MAX_CUE_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptFormat {
    Fdx,
    PlainText,
    /// Source could not be loaded
    Empty,
}

/// One scene, keyed by its heading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub index: usize,
    pub heading: String,
    /// `INT`, `EXT`, `INT/EXT` or `EST`
    pub setting: Option<String>,
    pub location: String,
    pub time_of_day: Option<String>,
    /// Speaking characters, in order of first line
    pub characters: Vec<String>,
}

/// Dialogue statistics for one speaking character
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterStats {
    pub name: String,
    /// Dialogue blocks (one per cue)
    pub dialogue_lines: usize,
    pub dialogue_words: usize,
    /// Indexes of scenes the character speaks in
    pub scenes: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptStats {
    pub scene_count: usize,
    pub dialogue_blocks: usize,
    pub word_count: usize,
    pub estimated_pages: usize,
}

/// Output of the `script_preprocess` stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptAnalysis {
    pub format: ScriptFormat,
    pub source_available: bool,
    pub scenes: Vec<Scene>,
    /// Most dialogue first
    pub characters: Vec<CharacterStats>,
    pub stats: ScriptStats,
    pub excerpt: String,
}

impl ScriptAnalysis {
    /// Analysis of a source that could not be loaded
    pub fn unavailable() -> Self {
        Self {
            format: ScriptFormat::Empty,
            source_available: false,
            scenes: Vec::new(),
            characters: Vec::new(),
            stats: ScriptStats::default(),
            excerpt: String::new(),
        }
    }

    /// Character with the most dialogue
    pub fn lead(&self) -> Option<&CharacterStats> {
        self.characters.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    SceneHeading,
    Character,
    Dialogue,
    Parenthetical,
    Action,
    Transition,
}

#[derive(Debug, Clone, PartialEq)]
struct Element {
    kind: ElementKind,
    text: String,
}

/// Parse a loaded source document
pub fn parse_document(document: &SourceDocument) -> ScriptAnalysis {
    if is_fdx(document) {
        analyze(ScriptFormat::Fdx, parse_fdx(&document.text))
    } else {
        analyze(ScriptFormat::PlainText, parse_plain_text(&document.text))
    }
}

fn is_fdx(document: &SourceDocument) -> bool {
    if document.text.contains("<FinalDraft") {
        return true;
    }
    let path_is_fdx = document
        .url
        .split(['?', '#'])
        .next()
        .map_or(false, |path| path.to_ascii_lowercase().ends_with(".fdx"));
    path_is_fdx && document.text.trim_start().starts_with('<')
}

// ============================================================================
// Final Draft XML
// ============================================================================

fn paragraph_kind(type_attr: &str) -> ElementKind {
    match type_attr {
        "Scene Heading" => ElementKind::SceneHeading,
        "Character" => ElementKind::Character,
        "Dialogue" => ElementKind::Dialogue,
        "Parenthetical" => ElementKind::Parenthetical,
        "Transition" => ElementKind::Transition,
        _ => ElementKind::Action,
    }
}

/// Walk `<Paragraph>` elements and join the runs of their `<Text>` children.
///
/// Malformed XML ends the walk; whatever parsed before the error is kept.
fn parse_fdx(xml: &str) -> Vec<Element> {
    let mut reader = Reader::from_str(xml);
    let mut elements = Vec::new();
    let mut paragraph: Option<(ElementKind, String)> = None;
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) => match tag.name().as_ref() {
                b"Paragraph" => {
                    let kind = match tag.try_get_attribute("Type") {
                        Ok(Some(attr)) => attr
                            .unescape_value()
                            .map_or(ElementKind::Action, |value| paragraph_kind(&value)),
                        _ => ElementKind::Action,
                    };
                    paragraph = Some((kind, String::new()));
                }
                b"Text" => in_text = paragraph.is_some(),
                _ => {}
            },
            Ok(Event::Text(run)) if in_text => {
                if let Some((_, text)) = paragraph.as_mut() {
                    match run.unescape() {
                        Ok(value) => text.push_str(&value),
                        Err(_) => text.push_str(&String::from_utf8_lossy(&run)),
                    }
                }
            }
            Ok(Event::CData(run)) if in_text => {
                if let Some((_, text)) = paragraph.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&run));
                }
            }
            Ok(Event::End(tag)) => match tag.name().as_ref() {
                b"Text" => in_text = false,
                b"Paragraph" => {
                    in_text = false;
                    if let Some((kind, text)) = paragraph.take() {
                        let text = text.trim();
                        if !text.is_empty() {
                            elements.push(Element {
                                kind,
                                text: text.to_string(),
                            });
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(
                    "Final Draft XML error at byte {}: {}",
                    reader.buffer_position(),
                    e
                );
                break;
            }
        }
    }

    elements
}

// ============================================================================
// Plain text
// ============================================================================

fn parse_plain_text(text: &str) -> Vec<Element> {
    let mut elements = Vec::new();
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.is_empty() {
            i += 1;
            continue;
        }

        if is_scene_heading(line) {
            elements.push(Element {
                kind: ElementKind::SceneHeading,
                text: line.to_string(),
            });
            i += 1;
            continue;
        }

        if is_transition(line) {
            elements.push(Element {
                kind: ElementKind::Transition,
                text: line.to_string(),
            });
            i += 1;
            continue;
        }

        let next_is_text = lines.get(i + 1).map_or(false, |next| !next.is_empty());
        if is_character_cue(line) && next_is_text {
            elements.push(Element {
                kind: ElementKind::Character,
                text: line.to_string(),
            });
            i += 1;
            while i < lines.len() && !lines[i].is_empty() {
                let kind = if lines[i].starts_with('(') {
                    ElementKind::Parenthetical
                } else {
                    ElementKind::Dialogue
                };
                elements.push(Element {
                    kind,
                    text: lines[i].to_string(),
                });
                i += 1;
            }
            continue;
        }

        // Action runs to the next blank line
        let start = i;
        while i < lines.len() && !lines[i].is_empty() && !is_scene_heading(lines[i]) {
            i += 1;
        }
        elements.push(Element {
            kind: ElementKind::Action,
            text: lines[start..i].join(" "),
        });
    }

    elements
}

const HEADING_PREFIXES: [&str; 10] = [
    "INT./EXT", "EXT./INT", "INT/EXT", "EXT/INT", "I/E", "INT.", "EXT.", "EST.", "INT ", "EXT ",
];

fn is_scene_heading(line: &str) -> bool {
    let upper = line.to_ascii_uppercase();
    HEADING_PREFIXES.iter().any(|prefix| upper.starts_with(prefix))
}

fn is_transition(line: &str) -> bool {
    is_all_caps(line)
        && (line.ends_with("TO:")
            || line.starts_with("FADE IN")
            || line.starts_with("FADE OUT")
            || line.starts_with("FADE TO"))
}

fn is_character_cue(line: &str) -> bool {
    line.chars().count() <= MAX_CUE_CHARS && is_all_caps(line) && !line.ends_with(':')
}

fn is_all_caps(line: &str) -> bool {
    let name_part = line.split('(').next().unwrap_or(line);
    name_part.chars().any(|c| c.is_alphabetic()) && !name_part.chars().any(|c| c.is_lowercase())
}

// ============================================================================
// Analysis
// ============================================================================

/// Split a heading into setting, location and time of day
///
/// `INT. CHAWL ROOFTOP - NIGHT` → (`INT`, `CHAWL ROOFTOP`, `NIGHT`)
fn parse_heading(heading: &str) -> (Option<String>, String, Option<String>) {
    let upper = heading.trim().to_ascii_uppercase();

    let (setting, rest) = [
        ("INT./EXT.", "INT/EXT"),
        ("EXT./INT.", "INT/EXT"),
        ("INT/EXT.", "INT/EXT"),
        ("INT/EXT", "INT/EXT"),
        ("EXT/INT", "INT/EXT"),
        ("I/E.", "INT/EXT"),
        ("I/E", "INT/EXT"),
        ("INT.", "INT"),
        ("EXT.", "EXT"),
        ("EST.", "EST"),
        ("INT ", "INT"),
        ("EXT ", "EXT"),
    ]
    .iter()
    .find_map(|(prefix, setting)| {
        upper
            .strip_prefix(prefix)
            .map(|rest| (Some(setting.to_string()), rest.trim().to_string()))
    })
    .unwrap_or((None, upper.clone()));

    match rest.rsplit_once(" - ") {
        Some((location, time)) if !time.trim().is_empty() => (
            setting,
            location.trim().to_string(),
            Some(time.trim().to_string()),
        ),
        _ => (setting, rest, None),
    }
}

/// Strip cue extensions: `RAJ (V.O.)` → `RAJ`, `MEERA (CONT'D)` → `MEERA`
fn normalize_cue(cue: &str) -> String {
    let name = cue.split('(').next().unwrap_or(cue);
    name.trim().trim_end_matches('^').trim().to_string()
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn analyze(format: ScriptFormat, elements: Vec<Element>) -> ScriptAnalysis {
    let mut scenes: Vec<Scene> = Vec::new();
    let mut characters: BTreeMap<String, CharacterStats> = BTreeMap::new();
    let mut current_speaker: Option<String> = None;
    let mut dialogue_blocks = 0;
    let mut total_words = 0;
    let mut excerpt = String::new();

    for element in &elements {
        total_words += word_count(&element.text);

        match element.kind {
            ElementKind::SceneHeading => {
                let (setting, location, time_of_day) = parse_heading(&element.text);
                scenes.push(Scene {
                    index: scenes.len(),
                    heading: element.text.clone(),
                    setting,
                    location,
                    time_of_day,
                    characters: Vec::new(),
                });
                current_speaker = None;
            }
            ElementKind::Character => {
                let name = normalize_cue(&element.text);
                if name.is_empty() {
                    current_speaker = None;
                    continue;
                }
                dialogue_blocks += 1;

                let stats = characters
                    .entry(name.clone())
                    .or_insert_with(|| CharacterStats {
                        name: name.clone(),
                        dialogue_lines: 0,
                        dialogue_words: 0,
                        scenes: Vec::new(),
                    });
                stats.dialogue_lines += 1;

                if let Some(scene) = scenes.last_mut() {
                    if !stats.scenes.contains(&scene.index) {
                        stats.scenes.push(scene.index);
                    }
                    if !scene.characters.contains(&name) {
                        scene.characters.push(name.clone());
                    }
                }
                current_speaker = Some(name);
            }
            ElementKind::Dialogue => {
                if let Some(stats) = current_speaker
                    .as_ref()
                    .and_then(|name| characters.get_mut(name))
                {
                    stats.dialogue_words += word_count(&element.text);
                }
                push_excerpt(&mut excerpt, &element.text);
            }
            ElementKind::Action => {
                current_speaker = None;
                push_excerpt(&mut excerpt, &element.text);
            }
            ElementKind::Parenthetical | ElementKind::Transition => {}
        }
    }

    let mut characters: Vec<CharacterStats> = characters.into_values().collect();
    characters.sort_by(|a, b| {
        b.dialogue_lines
            .cmp(&a.dialogue_lines)
            .then_with(|| a.name.cmp(&b.name))
    });

    let stats = ScriptStats {
        scene_count: scenes.len(),
        dialogue_blocks,
        word_count: total_words,
        estimated_pages: total_words.div_ceil(WORDS_PER_PAGE),
    };

    ScriptAnalysis {
        format,
        source_available: true,
        scenes,
        characters,
        stats,
        excerpt,
    }
}

fn push_excerpt(excerpt: &mut String, text: &str) {
    let used = excerpt.chars().count();
    if used >= EXCERPT_CHARS {
        return;
    }
    if !excerpt.is_empty() {
        excerpt.push(' ');
    }
    excerpt.extend(text.chars().take(EXCERPT_CHARS - used));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(url: &str, text: &str) -> SourceDocument {
        SourceDocument {
            url: url.to_string(),
            content_type: None,
            text: text.to_string(),
        }
    }

    const PLAIN: &str = "\
FADE IN:

INT. CHAWL ROOFTOP - NIGHT

Laundry lines sway. RAJ (30s) paces with a phone.

RAJ
(whispering)
They know about the ledger.

MEERA (O.S.)
Come inside before someone sees you.

EXT. DHARAVI LANE - DAY

RAJ
We leave tonight.

MEERA
And Amma?

RAJ (CONT'D)
She comes with us.

CUT TO:
";

    const FDX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<FinalDraft DocumentType="Script" Version="1">
  <Content>
    <Paragraph Type="Scene Heading"><Text>INT. POLICE STATION - DAY</Text></Paragraph>
    <Paragraph Type="Action"><Text>Fans whir. Files everywhere.</Text></Paragraph>
    <Paragraph Type="Character"><Text>INSPECTOR DESAI</Text></Paragraph>
    <Paragraph Type="Dialogue"><Text>Bring me the </Text><Text Style="Bold">Bhatt &amp; Sons</Text><Text> file.</Text></Paragraph>
    <Paragraph Type="Character"><Text>CONSTABLE</Text></Paragraph>
    <Paragraph Type="Dialogue"><Text>Sir.</Text></Paragraph>
  </Content>
</FinalDraft>"#;

    #[test]
    fn test_plain_text_scenes_and_characters() {
        let analysis = parse_document(&document("https://x/pilot.txt", PLAIN));

        assert_eq!(analysis.format, ScriptFormat::PlainText);
        assert!(analysis.source_available);
        assert_eq!(analysis.stats.scene_count, 2);

        let rooftop = &analysis.scenes[0];
        assert_eq!(rooftop.setting.as_deref(), Some("INT"));
        assert_eq!(rooftop.location, "CHAWL ROOFTOP");
        assert_eq!(rooftop.time_of_day.as_deref(), Some("NIGHT"));
        assert_eq!(rooftop.characters, vec!["RAJ", "MEERA"]);

        assert_eq!(analysis.characters[0].name, "RAJ");
        assert_eq!(analysis.characters[0].dialogue_lines, 3);
        assert_eq!(analysis.characters[0].scenes, vec![0, 1]);
        assert_eq!(analysis.characters[1].name, "MEERA");
        assert_eq!(analysis.characters[1].dialogue_lines, 2);
        assert_eq!(analysis.stats.dialogue_blocks, 5);
        assert!(analysis.excerpt.starts_with("Laundry lines sway."));
    }

    #[test]
    fn test_fdx_paragraphs() {
        let analysis = parse_document(&document("https://x/test.fdx", FDX));

        assert_eq!(analysis.format, ScriptFormat::Fdx);
        assert_eq!(analysis.scenes.len(), 1);
        assert_eq!(analysis.scenes[0].location, "POLICE STATION");
        assert_eq!(analysis.scenes[0].characters, vec!["INSPECTOR DESAI", "CONSTABLE"]);

        // Tied on dialogue blocks, so ordered by name
        assert_eq!(analysis.characters[0].name, "CONSTABLE");
        assert_eq!(analysis.characters[1].name, "INSPECTOR DESAI");
        assert_eq!(analysis.characters[1].dialogue_words, 7);
        assert!(analysis.excerpt.contains("Bhatt & Sons file."));
    }

    #[test]
    fn test_fdx_character_references_decoded() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<FinalDraft DocumentType="Script" Version="1">
  <Content>
    <Paragraph Type="Scene Heading"><Text>INT. RAVI&#8217;S FLAT - NIGHT</Text></Paragraph>
    <Paragraph Type="Character"><Text>RAVI</Text></Paragraph>
    <Paragraph Type="Dialogue"><Text>It&#x2019;s &lt;late&gt;.</Text></Paragraph>
    <Paragraph Type="Action"/>
  </Content>
</FinalDraft>"#;
        let analysis = parse_document(&document("https://x/flat.fdx", xml));

        let heading = &analysis.scenes[0].heading;
        assert!(!heading.contains("&#"), "undecoded heading: {heading}");
        assert_eq!(analysis.scenes[0].location, "RAVI\u{2019}S FLAT");
        assert_eq!(analysis.characters[0].name, "RAVI");
        assert!(analysis.excerpt.contains("It\u{2019}s <late>."));
    }

    #[test]
    fn test_fdx_malformed_keeps_parsed_paragraphs() {
        let xml = r#"<FinalDraft><Content>
    <Paragraph Type="Scene Heading"><Text>EXT. GHAT - DAWN</Text></Paragraph>
    <Paragraph Type="Action"><Text>Bells.</Text></Oops>
</Content></FinalDraft>"#;
        let analysis = parse_document(&document("https://x/broken.fdx", xml));

        assert_eq!(analysis.format, ScriptFormat::Fdx);
        assert_eq!(analysis.scenes.len(), 1);
        assert_eq!(analysis.scenes[0].location, "GHAT");
    }

    #[test]
    fn test_fdx_detected_by_content_without_extension() {
        let analysis = parse_document(&document("https://x/download?id=7", FDX));
        assert_eq!(analysis.format, ScriptFormat::Fdx);
    }

    #[test]
    fn test_page_estimate() {
        let text = "word ".repeat(WORDS_PER_PAGE + 1);
        let analysis = parse_document(&document("https://x/notes.txt", &text));
        assert_eq!(analysis.stats.word_count, WORDS_PER_PAGE + 1);
        assert_eq!(analysis.stats.estimated_pages, 2);
        assert_eq!(analysis.stats.scene_count, 0);
    }

    #[test]
    fn test_parse_heading_variants() {
        assert_eq!(
            parse_heading("EXT. MARINE DRIVE - SUNSET"),
            (Some("EXT".to_string()), "MARINE DRIVE".to_string(), Some("SUNSET".to_string()))
        );
        assert_eq!(
            parse_heading("INT./EXT. TAXI - MOVING"),
            (Some("INT/EXT".to_string()), "TAXI".to_string(), Some("MOVING".to_string()))
        );
        assert_eq!(
            parse_heading("int. temple"),
            (Some("INT".to_string()), "TEMPLE".to_string(), None)
        );
    }

    #[test]
    fn test_normalize_cue() {
        assert_eq!(normalize_cue("RAJ (V.O.)"), "RAJ");
        assert_eq!(normalize_cue("MEERA (CONT'D)"), "MEERA");
        assert_eq!(normalize_cue("AMMA ^"), "AMMA");
    }

    #[test]
    fn test_unavailable_is_empty() {
        let analysis = ScriptAnalysis::unavailable();
        assert!(!analysis.source_available);
        assert_eq!(analysis.format, ScriptFormat::Empty);
        assert!(analysis.lead().is_none());
    }
}
