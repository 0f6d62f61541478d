//! Resume reconciliation for pair lists.
//!
//! A resumed run keeps the pairs before the resume index ("preserved") and
//! sends the rest ("pending") back through the refiner. Corrections are
//! merged back by pair id, never by position, so a refiner that reorders or
//! drops entries cannot disturb neighbouring pairs.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Result, RefineError};
use crate::pairs::{self, SubtitlePair};

/// The previously written output document, as far as it could be read
#[derive(Debug, Clone)]
pub enum PriorOutput {
    /// No output file exists yet
    Absent,
    /// A file exists but could not be parsed
    Unreadable(String),
    Loaded(Vec<SubtitlePair>),
}

impl PriorOutput {
    /// Read the prior output document at `path`. Never fails: an unreadable
    /// file is reported as such and handled by [`split`].
    pub async fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::Absent;
        }

        match pairs::load_pairs(path).await {
            Ok(pairs) => Self::Loaded(pairs),
            Err(e) => Self::Unreadable(e.to_string()),
        }
    }
}

/// Where the preserved prefix of a split came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservedSource {
    Input,
    PriorOutput,
}

/// Why a present prior output was not used for the preserved prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreservedFallback {
    Unreadable(String),
    CountMismatch { expected: usize, found: usize },
    IdMismatch { position: usize, expected: u32, found: u32 },
}

impl fmt::Display for PreservedFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable(reason) => write!(f, "existing output could not be read: {}", reason),
            Self::CountMismatch { expected, found } => write!(
                f,
                "existing output has {} pairs but the input has {}",
                found, expected
            ),
            Self::IdMismatch { position, expected, found } => write!(
                f,
                "existing output has id {} at position {} where the input has id {}",
                found, position, expected
            ),
        }
    }
}

/// Result of [`split`]
#[derive(Debug, Clone)]
pub struct ResumeSplit {
    pub resume_index: usize,
    pub preserved: Vec<SubtitlePair>,
    pub pending: Vec<SubtitlePair>,
    pub source: PreservedSource,
    /// Set when a prior output existed but had to be ignored
    pub fallback: Option<PreservedFallback>,
}

impl ResumeSplit {
    /// The full working list: preserved prefix followed by pending pairs
    pub fn working_pairs(&self) -> Vec<SubtitlePair> {
        self.preserved.iter().chain(self.pending.iter()).cloned().collect()
    }
}

/// Check a user-supplied resume index against the pair count
pub fn validate_resume_index(index: i64, total: usize) -> Result<usize> {
    if index < 0 {
        return Err(RefineError::NegativeResumeIndex(index));
    }

    let index_usize = usize::try_from(index)
        .map_err(|_| RefineError::ResumeIndexOutOfRange { index, total })?;
    if index_usize > total {
        return Err(RefineError::ResumeIndexOutOfRange { index, total });
    }

    Ok(index_usize)
}

/// Decide which pairs are preserved and which are pending for a run.
///
/// Without a resume index every pair is pending. With one, the index is
/// validated first and nothing is produced on failure. Pending pairs always
/// come from `full_pairs`; the preserved prefix comes from `prior` when it is
/// compatible with the input.
pub fn split(
    full_pairs: &[SubtitlePair],
    resume_index: Option<i64>,
    prior: &PriorOutput,
) -> Result<ResumeSplit> {
    let Some(raw_index) = resume_index else {
        return Ok(ResumeSplit {
            resume_index: 0,
            preserved: Vec::new(),
            pending: full_pairs.to_vec(),
            source: PreservedSource::Input,
            fallback: None,
        });
    };

    let index = validate_resume_index(raw_index, full_pairs.len())?;
    let pending = full_pairs[index..].to_vec();

    let (preserved, source, fallback) = match prior {
        PriorOutput::Absent => {
            debug!("No prior output, preserving pairs from input");
            (full_pairs[..index].to_vec(), PreservedSource::Input, None)
        }
        PriorOutput::Unreadable(reason) => (
            full_pairs[..index].to_vec(),
            PreservedSource::Input,
            Some(PreservedFallback::Unreadable(reason.clone())),
        ),
        PriorOutput::Loaded(existing) => match check_compatible(full_pairs, existing, index) {
            Ok(()) => (existing[..index].to_vec(), PreservedSource::PriorOutput, None),
            Err(mismatch) => (
                full_pairs[..index].to_vec(),
                PreservedSource::Input,
                Some(mismatch),
            ),
        },
    };

    Ok(ResumeSplit {
        resume_index: index,
        preserved,
        pending,
        source,
        fallback,
    })
}

fn check_compatible(
    full_pairs: &[SubtitlePair],
    existing: &[SubtitlePair],
    index: usize,
) -> std::result::Result<(), PreservedFallback> {
    if existing.len() != full_pairs.len() {
        return Err(PreservedFallback::CountMismatch {
            expected: full_pairs.len(),
            found: existing.len(),
        });
    }

    for (position, (input, output)) in full_pairs.iter().zip(existing).take(index).enumerate() {
        if input.id != output.id {
            return Err(PreservedFallback::IdMismatch {
                position,
                expected: input.id,
                found: output.id,
            });
        }
    }

    Ok(())
}

/// Result of [`merge`]
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub pairs: Vec<SubtitlePair>,
    /// Number of pairs in the list that received a correction
    pub applied: usize,
    /// Corrected ids with no slot in the list, in first-seen order
    pub unknown_ids: Vec<u32>,
}

/// Apply corrected pairs to a full list by id.
///
/// Length and order of `full_pairs` are kept; pairs without a correction are
/// copied unchanged. When the same id is corrected twice the later entry wins.
pub fn merge(full_pairs: &[SubtitlePair], corrected: &[SubtitlePair]) -> MergeOutcome {
    let corrections: HashMap<u32, &SubtitlePair> =
        corrected.iter().map(|pair| (pair.id, pair)).collect();

    let mut applied = 0;
    let pairs = full_pairs
        .iter()
        .map(|pair| {
            let mut pair = pair.clone();
            if let Some(correction) = corrections.get(&pair.id) {
                pair.apply_correction(correction);
                applied += 1;
            }
            pair
        })
        .collect();

    let known: HashSet<u32> = full_pairs.iter().map(|pair| pair.id).collect();
    let mut unknown_ids = Vec::new();
    for pair in corrected {
        if !known.contains(&pair.id) && !unknown_ids.contains(&pair.id) {
            warn!("Ignoring correction for unknown pair id {}", pair.id);
            unknown_ids.push(pair.id);
        }
    }

    MergeOutcome {
        pairs,
        applied,
        unknown_ids,
    }
}
