//! Terminology glossary with an authoritative (user) tier and a learned tier.
//!
//! The authoritative tier is fixed once constructed. Learned entries come
//! from a checkpoint or from the refiner and never replace an authoritative
//! term; such clashes are kept as [`TermConflict`] records.

pub mod checkpoint;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::chunker::estimate_tokens;

pub use checkpoint::{CheckpointLoad, LoadStatus, checkpoint_path};

/// Confidence attached to a learned term, either a score or a label such as
/// `high` written by hand into a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Confidence {
    Score(f64),
    Label(String),
}

impl Confidence {
    pub fn score(&self) -> f64 {
        match self {
            Self::Score(score) => *score,
            Self::Label(label) => match label.to_lowercase().as_str() {
                "high" => 0.9,
                "medium" => 0.6,
                "low" => 0.3,
                _ => DEFAULT_CONFIDENCE,
            },
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Score(score) => write!(f, "{:.2}", score),
            Self::Label(label) => f.write_str(label),
        }
    }
}

const DEFAULT_CONFIDENCE: f64 = 0.5;

/// A single term mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    #[serde(rename = "eng")]
    pub term: String,
    #[serde(rename = "zh")]
    pub translation: String,
    /// Free-form category such as `name` or `place`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl GlossaryEntry {
    pub fn new<S: Into<String>, T: Into<String>>(term: S, translation: T) -> Self {
        Self {
            term: term.into(),
            translation: translation.into(),
            kind: None,
            confidence: None,
            evidence: None,
        }
    }

    pub fn with_confidence(mut self, score: f64) -> Self {
        self.confidence = Some(Confidence::Score(score));
        self
    }

    pub fn with_kind<S: Into<String>>(mut self, kind: S) -> Self {
        self.kind = Some(kind.into());
        self
    }

    fn confidence_score(&self) -> f64 {
        self.confidence.as_ref().map(Confidence::score).unwrap_or(DEFAULT_CONFIDENCE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Authoritative,
    Learned,
}

/// Where a learned entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnedOrigin {
    Checkpoint,
    Refiner,
}

impl fmt::Display for LearnedOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checkpoint => f.write_str("checkpoint"),
            Self::Refiner => f.write_str("refiner"),
        }
    }
}

/// A learned value discarded because the term is authoritative
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermConflict {
    pub term: String,
    pub authoritative: String,
    pub discarded: String,
    pub origin: LearnedOrigin,
}

/// In-memory glossary for one run.
///
/// Lifecycle: built with the authoritative tier, restored from a checkpoint,
/// then grown by [`Glossary::learn`] after each batch and periodically
/// compacted.
#[derive(Debug, Clone, Default)]
pub struct Glossary {
    authoritative: Vec<GlossaryEntry>,
    learned: Vec<GlossaryEntry>,
    conflicts: Vec<TermConflict>,
}

impl Glossary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a glossary whose authoritative tier is `entries`. A repeated
    /// term keeps its first value.
    pub fn with_authoritative(entries: Vec<GlossaryEntry>) -> Self {
        let mut authoritative: Vec<GlossaryEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            if authoritative.iter().any(|e| e.term == entry.term) {
                warn!("Duplicate authoritative term '{}' ignored", entry.term);
                continue;
            }
            authoritative.push(entry);
        }

        Self {
            authoritative,
            ..Self::default()
        }
    }

    /// Add entries read from a checkpoint. Returns how many were accepted.
    pub fn restore(&mut self, entries: Vec<GlossaryEntry>) -> usize {
        self.absorb_all(entries, LearnedOrigin::Checkpoint)
    }

    /// Add entries derived during this run. Returns how many were accepted.
    pub fn learn(&mut self, entries: Vec<GlossaryEntry>) -> usize {
        self.absorb_all(entries, LearnedOrigin::Refiner)
    }

    fn absorb_all(&mut self, entries: Vec<GlossaryEntry>, origin: LearnedOrigin) -> usize {
        entries
            .into_iter()
            .map(|entry| self.absorb(entry, origin))
            .filter(|accepted| *accepted)
            .count()
    }

    fn absorb(&mut self, entry: GlossaryEntry, origin: LearnedOrigin) -> bool {
        if entry.term.trim().is_empty() {
            debug!("Skipping glossary entry with empty term from {}", origin);
            return false;
        }

        if let Some(existing) = self.authoritative.iter().find(|e| e.term == entry.term) {
            if existing.translation != entry.translation {
                warn!(
                    "Glossary conflict for '{}': keeping authoritative '{}', discarding {} value '{}'",
                    entry.term, existing.translation, origin, entry.translation
                );
                self.conflicts.push(TermConflict {
                    term: entry.term,
                    authoritative: existing.translation.clone(),
                    discarded: entry.translation,
                    origin,
                });
            }
            return false;
        }

        if let Some(existing) = self.learned.iter().find(|e| e.term == entry.term) {
            if existing.translation != entry.translation {
                debug!(
                    "Keeping learned '{}' -> '{}', ignoring {} value '{}'",
                    entry.term, existing.translation, origin, entry.translation
                );
            }
            return false;
        }

        self.learned.push(entry);
        true
    }

    /// Shrink the learned tier to at most `limit` entries, keeping the most
    /// confident ones in their original order. Returns the number removed.
    pub fn compact(&mut self, limit: usize) -> usize {
        if self.learned.len() <= limit {
            return 0;
        }

        let mut ranked: Vec<usize> = (0..self.learned.len()).collect();
        // sort_by is stable, so equal scores keep insertion order
        ranked.sort_by(|a, b| {
            self.learned[*b]
                .confidence_score()
                .total_cmp(&self.learned[*a].confidence_score())
        });
        let mut keep = vec![false; self.learned.len()];
        for index in ranked.into_iter().take(limit) {
            keep[index] = true;
        }

        let before = self.learned.len();
        let mut flags = keep.into_iter();
        self.learned.retain(|_| flags.next().unwrap_or(false));
        before - self.learned.len()
    }

    /// Resolve a term, authoritative tier first
    pub fn lookup(&self, term: &str) -> Option<(&GlossaryEntry, Tier)> {
        self.authoritative
            .iter()
            .find(|e| e.term == term)
            .map(|e| (e, Tier::Authoritative))
            .or_else(|| {
                self.learned
                    .iter()
                    .find(|e| e.term == term)
                    .map(|e| (e, Tier::Learned))
            })
    }

    /// All entries, authoritative first
    pub fn iter(&self) -> impl Iterator<Item = (Tier, &GlossaryEntry)> {
        self.authoritative
            .iter()
            .map(|e| (Tier::Authoritative, e))
            .chain(self.learned.iter().map(|e| (Tier::Learned, e)))
    }

    pub fn learned(&self) -> &[GlossaryEntry] {
        &self.learned
    }

    pub fn conflicts(&self) -> &[TermConflict] {
        &self.conflicts
    }

    /// Rough size of the glossary as prompt context, in tokens
    pub fn estimated_tokens(&self) -> usize {
        self.iter()
            .map(|(_, e)| estimate_tokens(&e.term) + estimate_tokens(&e.translation) + 4)
            .sum()
    }

    /// Log the current terminology at debug level
    pub fn log_terminology(&self, include_authoritative: bool) {
        if include_authoritative {
            if self.authoritative.is_empty() {
                debug!("User glossary: (none)");
            } else {
                debug!("User glossary ({} entries):", self.authoritative.len());
                for entry in &self.authoritative {
                    debug!("  {} -> {}", entry.term, entry.translation);
                }
            }
        }

        if self.learned.is_empty() {
            debug!("Learned glossary: (none yet)");
            return;
        }

        debug!("Learned glossary ({} entries):", self.learned.len());
        for entry in &self.learned {
            let kind = entry.kind.as_deref().map(|k| format!(" [{}]", k)).unwrap_or_default();
            let confidence = entry
                .confidence
                .as_ref()
                .map(|c| format!(" (conf: {})", c))
                .unwrap_or_default();
            debug!("  {} -> {}{}{}", entry.term, entry.translation, kind, confidence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authoritative_wins_over_checkpoint() {
        let mut glossary = Glossary::with_authoritative(vec![GlossaryEntry::new("Mac", "麦可")]);
        let accepted = glossary.restore(vec![GlossaryEntry::new("Mac", "麦克")]);

        assert_eq!(accepted, 0);
        let (entry, tier) = glossary.lookup("Mac").unwrap();
        assert_eq!(entry.translation, "麦可");
        assert_eq!(tier, Tier::Authoritative);
        assert!(glossary.learned().is_empty());
        assert_eq!(
            glossary.conflicts(),
            &[TermConflict {
                term: "Mac".to_string(),
                authoritative: "麦可".to_string(),
                discarded: "麦克".to_string(),
                origin: LearnedOrigin::Checkpoint,
            }]
        );
    }

    #[test]
    fn test_same_value_is_not_a_conflict() {
        let mut glossary = Glossary::with_authoritative(vec![GlossaryEntry::new("JAG", "军法署")]);
        glossary.learn(vec![GlossaryEntry::new("JAG", "军法署")]);
        assert!(glossary.conflicts().is_empty());
        assert!(glossary.learned().is_empty());
    }

    #[test]
    fn test_checkpoint_wins_over_new_terms() {
        let mut glossary = Glossary::new();
        glossary.restore(vec![GlossaryEntry::new("Harm", "哈姆")]);
        let accepted = glossary.learn(vec![
            GlossaryEntry::new("Harm", "哈默"),
            GlossaryEntry::new("Bud", "巴德"),
        ]);

        assert_eq!(accepted, 1);
        assert_eq!(glossary.lookup("Harm").unwrap().0.translation, "哈姆");
        assert_eq!(glossary.learned().len(), 2);
        assert!(glossary.conflicts().is_empty());
    }

    #[test]
    fn test_terms_are_case_sensitive() {
        let mut glossary = Glossary::with_authoritative(vec![GlossaryEntry::new("Mac", "麦可")]);
        assert_eq!(glossary.learn(vec![GlossaryEntry::new("mac", "苹果电脑")]), 1);
        assert_eq!(glossary.lookup("mac").unwrap().1, Tier::Learned);
    }

    #[test]
    fn test_compact_keeps_most_confident_in_order() {
        let mut glossary = Glossary::new();
        glossary.learn(vec![
            GlossaryEntry::new("a", "甲").with_confidence(0.2),
            GlossaryEntry::new("b", "乙").with_confidence(0.9),
            GlossaryEntry::new("c", "丙"),
            GlossaryEntry::new("d", "丁").with_confidence(0.8),
        ]);

        assert_eq!(glossary.compact(2), 2);
        let terms: Vec<&str> = glossary.learned().iter().map(|e| e.term.as_str()).collect();
        assert_eq!(terms, vec!["b", "d"]);
        assert_eq!(glossary.compact(5), 0);
    }

    #[test]
    fn test_confidence_labels() {
        let entry: GlossaryEntry =
            serde_yaml::from_str("eng: Admiral\nzh: 上将\ntype: title\nconfidence: high\n").unwrap();
        assert_eq!(entry.kind.as_deref(), Some("title"));
        assert_eq!(entry.confidence_score(), 0.9);
    }
}
