use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separates opening, item block and closing.
pub const SECTION_DELIMITER: &str = "===";
/// Prefixes each item inside the item block.
pub const ITEM_DELIMITER: &str = "<item>";

static SECTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"={3,}").expect("static regex"));
static ITEM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<\s*item\s*>").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Opening,
    Item,
    Closing,
    /// Unstructured transcript narrated as one piece.
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSegment {
    pub order: usize,
    pub kind: SegmentKind,
    pub text: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("transcript has no narratable text")]
    Empty,
}

/// Splits a transcript on its structural markers.
///
/// `opening === <item> a <item> b === closing` yields one segment per
/// non-empty section and item. Anything that does not have exactly three
/// sections is narrated as a single `Full` segment with the markers removed.
pub fn segment(transcript: &str) -> Result<Vec<ScriptSegment>, SegmentError> {
    let sections: Vec<&str> = SECTION_RE.split(transcript).collect();

    let mut pieces: Vec<(SegmentKind, String)> = Vec::new();
    if sections.len() == 3 {
        pieces.push((SegmentKind::Opening, sections[0].trim().to_string()));
        for item in ITEM_RE.split(sections[1]) {
            pieces.push((SegmentKind::Item, item.trim().to_string()));
        }
        pieces.push((SegmentKind::Closing, sections[2].trim().to_string()));
    } else {
        if sections.len() > 1 {
            tracing::warn!(
                sections = sections.len(),
                "Transcript markers are unbalanced; narrating it as one segment"
            );
        }
        let stripped = ITEM_RE.replace_all(transcript, "\n");
        let stripped = SECTION_RE.replace_all(&stripped, "\n");
        pieces.push((SegmentKind::Full, stripped.trim().to_string()));
    }

    let segments: Vec<ScriptSegment> = pieces
        .into_iter()
        .filter(|(_, text)| !text.is_empty())
        .enumerate()
        .map(|(order, (kind, text))| ScriptSegment { order, kind, text })
        .collect();

    if segments.is_empty() {
        return Err(SegmentError::Empty);
    }
    Ok(segments)
}
