//! subrefine - bilingual subtitle refinement
//!
//! Refines English-Chinese subtitle pair documents in batches. Runs can be
//! resumed from a pair index without disturbing already refined pairs, and
//! terminology learned along the way is kept in a glossary checkpoint next to
//! the input file.

pub mod cli;
pub mod config;
pub mod error;
pub mod pairs;
pub mod format;
pub mod resume;
pub mod glossary;
pub mod chunker;
pub mod refine;
pub mod workflow;
