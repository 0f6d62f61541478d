use thiserror::Error;

#[derive(Error, Debug)]
pub enum RefineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Resume index must be non-negative (got {0})")]
    NegativeResumeIndex(i64),

    #[error("Resume index {index} exceeds total pairs {total}")]
    ResumeIndexOutOfRange { index: i64, total: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Refiner error: {0}")]
    Refiner(String),

    #[error("Glossary error: {0}")]
    Glossary(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No subtitle pairs found in {0}")]
    EmptyInput(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl RefineError {
    /// Resume index validation failures abort the run before anything is written.
    pub fn is_resume_validation(&self) -> bool {
        matches!(
            self,
            Self::NegativeResumeIndex(_) | Self::ResumeIndexOutOfRange { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RefineError>;
