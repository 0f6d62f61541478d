use tracing::info;

use crate::config::ChunkingConfig;
use crate::pairs::SubtitlePair;

/// Per-pair framing cost in the intermediate format (keys, id, punctuation)
const PAIR_OVERHEAD_TOKENS: usize = 8;

/// Estimate the token count of `text`: one token per CJK character, one per
/// four other characters.
pub fn estimate_tokens(text: &str) -> usize {
    let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), ch| {
        if is_cjk(ch) {
            (cjk + 1, other)
        } else {
            (cjk, other + 1)
        }
    });
    cjk + other.div_ceil(4)
}

fn is_cjk(ch: char) -> bool {
    matches!(ch,
        '\u{3000}'..='\u{303F}'   // CJK punctuation
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{FF00}'..='\u{FFEF}' // full-width forms
    )
}

pub fn estimate_pair_tokens(pair: &SubtitlePair) -> usize {
    estimate_tokens(&pair.source_text) + estimate_tokens(&pair.target_text) + PAIR_OVERHEAD_TOKENS
}

/// Split `pairs` into ordered, non-empty chunks.
///
/// With `pairs_per_chunk` set every chunk has that many pairs (the last may be
/// shorter). Otherwise pairs are added until `base_tokens` plus the chunk's
/// estimate would exceed the soft limit; a pair that alone exceeds the budget
/// still gets its own chunk.
pub fn chunk_pairs(
    pairs: &[SubtitlePair],
    config: &ChunkingConfig,
    base_tokens: usize,
) -> Vec<Vec<SubtitlePair>> {
    if let Some(size) = config.pairs_per_chunk {
        return pairs.chunks(size.max(1)).map(<[SubtitlePair]>::to_vec).collect();
    }

    let budget = config.token_soft_limit.saturating_sub(base_tokens).max(1);
    let mut chunks = Vec::new();
    let mut current: Vec<SubtitlePair> = Vec::new();
    let mut current_tokens = 0;

    for pair in pairs {
        let tokens = estimate_pair_tokens(pair);
        if !current.is_empty() && current_tokens + tokens > budget {
            chunks.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current.push(pair.clone());
        current_tokens += tokens;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkStats {
    pub chunks: usize,
    pub pairs: usize,
    pub min_pairs: usize,
    pub max_pairs: usize,
    pub max_tokens: usize,
}

impl ChunkStats {
    pub fn from_chunks(chunks: &[Vec<SubtitlePair>]) -> Self {
        if chunks.is_empty() {
            return Self::default();
        }

        Self {
            chunks: chunks.len(),
            pairs: chunks.iter().map(Vec::len).sum(),
            min_pairs: chunks.iter().map(Vec::len).min().unwrap_or(0),
            max_pairs: chunks.iter().map(Vec::len).max().unwrap_or(0),
            max_tokens: chunks
                .iter()
                .map(|chunk| chunk.iter().map(estimate_pair_tokens).sum())
                .max()
                .unwrap_or(0),
        }
    }

    pub fn average_pairs(&self) -> f64 {
        if self.chunks == 0 {
            0.0
        } else {
            self.pairs as f64 / self.chunks as f64
        }
    }

    pub fn log(&self) {
        info!(
            "Chunks: {} ({} pairs, {}-{} per chunk, avg {:.1}, largest ~{} tokens)",
            self.chunks,
            self.pairs,
            self.min_pairs,
            self.max_pairs,
            self.average_pairs(),
            self.max_tokens
        );
    }
}
