//! Cleaning and parsing of raw refiner output.
//!
//! Order matters: thinking blocks are removed first, then the first fenced
//! code block is unwrapped. If the cleaned text still does not parse, the
//! text from the first format marker onwards is tried once more.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::error::{Result, RefineError};
use crate::format::PairFormat;
use crate::glossary::GlossaryEntry;
use crate::pairs::SubtitlePair;
use super::Refinement;

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("valid think-block pattern"));

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:\w+)?\s*\n(.*?)\n```").expect("valid code-block pattern"));

/// JSON reply that also reports learned terms
#[derive(Debug, Deserialize)]
struct Envelope {
    pairs: Vec<SubtitlePair>,
    #[serde(default)]
    terms: Vec<GlossaryEntry>,
}

/// Remove `<think>...</think>` blocks (any case, spanning lines)
pub fn strip_thinking_blocks(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").trim().to_string()
}

/// Content of the first fenced code block, if any
pub fn extract_from_code_blocks(text: &str) -> Option<String> {
    CODE_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Strip thinking blocks, then unwrap the first code block if present
pub fn clean_response(text: &str) -> String {
    let text = strip_thinking_blocks(text);
    extract_from_code_blocks(&text).unwrap_or(text)
}

/// Span from the first `{` to the last `}`, the shape of a JSON reply that
/// carries both `pairs` and `terms`
pub fn extract_envelope(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].to_string())
}

/// Cut leading commentary off already-cleaned text, starting at the format's
/// first marker. For JSON the span from the first `[` to the last `]` is used.
pub fn extract_from_marker(text: &str, format: PairFormat) -> Option<String> {
    match format {
        PairFormat::Json => {
            let start = text.find('[')?;
            let end = text.rfind(']')?;
            (end > start).then(|| text[start..=end].to_string())
        }
        PairFormat::XmlPair | PairFormat::PseudoToml => text
            .find(format.marker())
            .map(|idx| text[idx..].trim().to_string()),
    }
}

/// Drop repeated ids. The last occurrence's text wins, placed at the id's
/// first position. Returns the duplicated ids as well.
pub fn dedupe_pairs(pairs: Vec<SubtitlePair>) -> (Vec<SubtitlePair>, Vec<u32>) {
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for pair in &pairs {
        *counts.entry(pair.id).or_default() += 1;
    }

    let mut duplicates: Vec<u32> = counts
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(id, _)| *id)
        .collect();
    if duplicates.is_empty() {
        return (pairs, duplicates);
    }
    duplicates.sort_unstable();

    let mut last: HashMap<u32, SubtitlePair> = HashMap::new();
    let mut order = Vec::new();
    for pair in pairs {
        if !last.contains_key(&pair.id) {
            order.push(pair.id);
        }
        last.insert(pair.id, pair);
    }

    let deduped = order.into_iter().filter_map(|id| last.remove(&id)).collect();
    (deduped, duplicates)
}

fn parse_cleaned(text: &str, format: PairFormat) -> Result<Refinement> {
    if format == PairFormat::Json && text.trim_start().starts_with('{') {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| RefineError::Serialization(format!("Invalid JSON envelope: {}", e)))?;
        return Ok(Refinement {
            pairs: envelope.pairs,
            terms: envelope.terms,
        });
    }

    Ok(Refinement {
        pairs: format.deserialize(text)?,
        terms: Vec::new(),
    })
}

/// Retry parsing on the parts of `text` that look like the payload. For JSON
/// the `{pairs, terms}` object is tried before the bare pair array.
fn recover_from_commentary(text: &str, format: PairFormat) -> Option<Refinement> {
    let envelope = match format {
        PairFormat::Json => extract_envelope(text),
        PairFormat::XmlPair | PairFormat::PseudoToml => None,
    };

    for candidate in envelope.into_iter().chain(extract_from_marker(text, format)) {
        match parse_cleaned(&candidate, format) {
            Ok(refinement) => {
                debug!("Marker extraction recovered {} pairs", refinement.pairs.len());
                return Some(refinement);
            }
            Err(e) => debug!("Extracted span did not parse: {}", e),
        }
    }
    None
}

/// Turn a raw refiner reply into a [`Refinement`] for a batch of
/// `expected_len` pairs
pub fn parse_response(raw: &str, format: PairFormat, expected_len: usize) -> Result<Refinement> {
    let cleaned = clean_response(raw);
    if cleaned.is_empty() {
        return Err(RefineError::Refiner("Empty response from refiner".to_string()));
    }

    let mut refinement = match parse_cleaned(&cleaned, format) {
        Ok(refinement) => refinement,
        Err(first_error) => {
            debug!("Deserialization failed ({}), attempting marker extraction", first_error);
            recover_from_commentary(&cleaned, format).ok_or_else(|| {
                RefineError::Refiner(format!(
                    "Failed to deserialize {} response: {}",
                    format, first_error
                ))
            })?
        }
    };

    let (pairs, duplicates) = dedupe_pairs(std::mem::take(&mut refinement.pairs));
    if !duplicates.is_empty() {
        warn!(
            "Duplicate pair IDs in response: {:?}; keeping last occurrence ({} unique pairs)",
            duplicates,
            pairs.len()
        );
    }
    refinement.pairs = pairs;

    if refinement.pairs.len() != expected_len {
        warn!(
            "Expected {} pairs from refiner, got {}",
            expected_len,
            refinement.pairs.len()
        );
    }

    Ok(refinement)
}
