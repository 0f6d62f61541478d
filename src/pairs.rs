use std::path::Path;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{Result, RefineError};

/// One caption's aligned English/Chinese text.
///
/// `id` is assigned once when the pair document is produced and is the only
/// key used to match corrections back into a pair list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitlePair {
    pub id: u32,
    #[serde(rename = "eng")]
    pub source_text: String,
    #[serde(rename = "chinese")]
    pub target_text: String,
}

impl SubtitlePair {
    pub fn new<S: Into<String>, T: Into<String>>(id: u32, source_text: S, target_text: T) -> Self {
        Self {
            id,
            source_text: source_text.into(),
            target_text: target_text.into(),
        }
    }

    /// Overwrite the mutable text fields from a corrected pair
    pub fn apply_correction(&mut self, corrected: &SubtitlePair) {
        self.source_text.clone_from(&corrected.source_text);
        self.target_text.clone_from(&corrected.target_text);
    }
}

/// Read a pair document (a JSON array of `{id, eng, chinese}` objects)
pub async fn load_pairs<P: AsRef<Path>>(path: P) -> Result<Vec<SubtitlePair>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RefineError::FileNotFound(path.display().to_string()));
    }

    let content = fs::read_to_string(path).await?;
    let pairs = parse_pairs(&content)?;
    debug!("Loaded {} pairs from {}", pairs.len(), path.display());
    Ok(pairs)
}

/// Parse a pair document, rejecting duplicate ids
pub fn parse_pairs(content: &str) -> Result<Vec<SubtitlePair>> {
    let pairs: Vec<SubtitlePair> = serde_json::from_str(content)?;

    let mut seen = std::collections::HashSet::with_capacity(pairs.len());
    for pair in &pairs {
        if !seen.insert(pair.id) {
            return Err(RefineError::Serialization(format!(
                "Duplicate pair id {} in pair document",
                pair.id
            )));
        }
    }

    Ok(pairs)
}

/// Write a pair document, replacing any existing file
pub async fn write_pairs<P: AsRef<Path>>(path: P, pairs: &[SubtitlePair]) -> Result<()> {
    let path = path.as_ref();
    let content = serde_json::to_string_pretty(pairs)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    fs::write(path, content).await?;
    info!("Wrote {} pairs to {}", pairs.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_document_field_names() {
        let pairs = parse_pairs(r#"[{"id": 3, "eng": "Hello.", "chinese": "你好。"}]"#).unwrap();
        assert_eq!(pairs, vec![SubtitlePair::new(3, "Hello.", "你好。")]);

        let json = serde_json::to_string(&pairs[0]).unwrap();
        assert!(json.contains("\"eng\""));
        assert!(json.contains("\"chinese\""));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let content = r#"[
            {"id": 1, "eng": "a", "chinese": "甲"},
            {"id": 1, "eng": "b", "chinese": "乙"}
        ]"#;
        assert!(matches!(parse_pairs(content), Err(RefineError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.json");
        let pairs = vec![
            SubtitlePair::new(0, "Tonight, on JAG...", "今晚，在《军法署》..."),
            SubtitlePair::new(1, "Good evening.", "晚上好。"),
        ];

        write_pairs(&path, &pairs).await.unwrap();
        assert_eq!(load_pairs(&path).await.unwrap(), pairs);
    }

    #[tokio::test]
    async fn test_missing_document() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_pairs(dir.path().join("absent.json")).await.unwrap_err();
        assert!(matches!(err, RefineError::FileNotFound(_)));
    }
}
