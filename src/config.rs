use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{Result, RefineError};
use crate::format::PairFormat;

fn default_timeout_secs() -> u64 {
    300
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_token_soft_limit() -> usize {
    6000
}

fn default_max_learned_terms() -> usize {
    200
}

fn default_dry_run_pairs() -> usize {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub refiner: RefinerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub glossary: GlossaryConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Which refiner implementation handles batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefinerBackend {
    /// Run `command` once per batch
    #[default]
    Command,
    /// POST to an OpenAI-compatible chat completions endpoint
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinerConfig {
    #[serde(default)]
    pub backend: RefinerBackend,
    /// External program that refines one batch (reads a JSON request on
    /// stdin, writes the corrected batch on stdout)
    #[serde(default)]
    pub command: String,
    /// Extra arguments passed to the command
    #[serde(default)]
    pub args: Vec<String>,
    /// Intermediate format used for batches
    #[serde(default)]
    pub format: PairFormat,
    /// Seconds to wait for one batch before giving up on it
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL of the chat completions API (http backend)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model name sent with every request (http backend)
    #[serde(default)]
    pub model: String,
    /// Environment variable holding the API key; no key means no
    /// Authorization header
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Fixed number of pairs per chunk; overrides token-based chunking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairs_per_chunk: Option<usize>,
    /// Approximate token budget per chunk, glossary context included
    #[serde(default = "default_token_soft_limit")]
    pub token_soft_limit: usize,
    /// Stop after this many chunks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chunks: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryConfig {
    /// Load and save the learned glossary checkpoint next to the input
    #[serde(default)]
    pub checkpoint: bool,
    /// YAML file with user-defined (authoritative) terms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_glossary: Option<PathBuf>,
    /// Compact the learned tier when it grows beyond this many terms
    #[serde(default = "default_max_learned_terms")]
    pub max_learned_terms: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Rewrite the output document after every chunk
    #[serde(default = "default_true")]
    pub incremental: bool,
    /// Only process the first `dry_run_pairs` pending pairs
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_dry_run_pairs")]
    pub dry_run_pairs: usize,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            backend: RefinerBackend::Command,
            command: String::new(),
            args: Vec::new(),
            format: PairFormat::Json,
            timeout_secs: default_timeout_secs(),
            endpoint: default_endpoint(),
            model: String::new(),
            api_key_env: default_api_key_env(),
            temperature: None,
            max_output_tokens: None,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            pairs_per_chunk: None,
            token_soft_limit: default_token_soft_limit(),
            max_chunks: None,
        }
    }
}

impl Default for GlossaryConfig {
    fn default() -> Self {
        Self {
            checkpoint: false,
            user_glossary: None,
            max_learned_terms: default_max_learned_terms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            incremental: true,
            dry_run: false,
            dry_run_pairs: default_dry_run_pairs(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RefineError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RefineError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| RefineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject values that would make chunking or compaction meaningless
    pub fn validate(&self) -> Result<()> {
        if self.chunking.pairs_per_chunk == Some(0) {
            return Err(RefineError::Config("pairs_per_chunk must be at least 1".to_string()));
        }
        if self.chunking.token_soft_limit == 0 {
            return Err(RefineError::Config("token_soft_limit must be at least 1".to_string()));
        }
        if self.glossary.max_learned_terms == 0 {
            return Err(RefineError::Config("max_learned_terms must be at least 1".to_string()));
        }
        Ok(())
    }
}
