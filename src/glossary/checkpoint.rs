//! Persistence of the learned glossary tier between runs.
//!
//! The checkpoint is a YAML list of entries placed next to the input file as
//! `<input file name>.glossary.yaml`. Every save rewrites the whole file.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{Result, RefineError};
use super::{Glossary, GlossaryEntry};

const CHECKPOINT_SUFFIX: &str = ".glossary.yaml";

/// Derive the checkpoint path for an input file, e.g. `ep01.json` ->
/// `ep01.json.glossary.yaml` in the same directory
pub fn checkpoint_path<P: AsRef<Path>>(input_path: P) -> PathBuf {
    let input_path = input_path.as_ref();
    let file_name = input_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    input_path.with_file_name(format!("{}{}", file_name, CHECKPOINT_SUFFIX))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded(usize),
    NotFound,
    /// The file exists but is not a valid entry list
    Corrupted(String),
}

/// Result of [`load`]: learned-tier entries plus how they were obtained
#[derive(Debug, Clone)]
pub struct CheckpointLoad {
    pub entries: Vec<GlossaryEntry>,
    pub status: LoadStatus,
}

/// Load learned entries from a checkpoint. A missing or corrupted file yields
/// an empty list; corruption is logged and never fails the run.
pub async fn load<P: AsRef<Path>>(path: P) -> CheckpointLoad {
    let path = path.as_ref();
    if !path.exists() {
        debug!("No glossary checkpoint at {}", path.display());
        return CheckpointLoad {
            entries: Vec::new(),
            status: LoadStatus::NotFound,
        };
    }

    match read_entries(path).await {
        Ok(entries) => {
            let count = entries.len();
            CheckpointLoad {
                entries,
                status: LoadStatus::Loaded(count),
            }
        }
        Err(e) => {
            warn!("Could not load glossary checkpoint {}: {}", path.display(), e);
            CheckpointLoad {
                entries: Vec::new(),
                status: LoadStatus::Corrupted(e.to_string()),
            }
        }
    }
}

/// Strictly read a YAML entry list. Used for checkpoints and for the user
/// glossary file.
pub async fn read_entries<P: AsRef<Path>>(path: P) -> Result<Vec<GlossaryEntry>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RefineError::FileNotFound(path.display().to_string()));
    }

    let content = fs::read_to_string(path).await?;
    // an empty document is an empty list, not an error
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let value: serde_yaml::Value = serde_yaml::from_str(&content)?;
    if !value.is_sequence() {
        return Err(RefineError::Glossary(format!(
            "Invalid glossary format in {}: expected a list of entries",
            path.display()
        )));
    }

    Ok(serde_yaml::from_value(value)?)
}

/// Overwrite the checkpoint with the glossary's learned tier
pub async fn save<P: AsRef<Path>>(path: P, glossary: &Glossary) -> Result<()> {
    let path = path.as_ref();
    let content = serde_yaml::to_string(glossary.learned())?;
    fs::write(path, content).await?;
    debug!("Saved {} learned terms to {}", glossary.learned().len(), path.display());
    Ok(())
}

/// Checkpoint handle used by the workflow. Saves are best effort: failures are
/// logged and the in-memory glossary stays authoritative for the run.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn for_input<P: AsRef<Path>>(input_path: P) -> Self {
        Self {
            path: checkpoint_path(input_path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Restore checkpointed entries into `glossary`
    pub async fn restore_into(&self, glossary: &mut Glossary) -> LoadStatus {
        let CheckpointLoad { entries, status } = load(&self.path).await;
        match &status {
            LoadStatus::Loaded(count) => {
                let accepted = glossary.restore(entries);
                info!(
                    "[CHECKPOINT] Loaded {} glossary entries from {} ({} accepted)",
                    count,
                    self.path.display(),
                    accepted
                );
            }
            LoadStatus::NotFound => {
                info!("[CHECKPOINT] No existing checkpoint, will create {}", self.path.display());
            }
            LoadStatus::Corrupted(_) => {
                warn!("[CHECKPOINT] Ignoring unreadable checkpoint {}", self.path.display());
            }
        }
        status
    }

    /// Save the learned tier; returns whether the write succeeded
    pub async fn persist(&self, glossary: &Glossary) -> bool {
        match save(&self.path, glossary).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not save glossary checkpoint {}: {}", self.path.display(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn as_map(entries: &[GlossaryEntry]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|e| (e.term.clone(), e.translation.clone()))
            .collect()
    }

    #[test]
    fn test_checkpoint_path_colocates_with_input() {
        assert_eq!(
            checkpoint_path("/data/show/ep01.json"),
            PathBuf::from("/data/show/ep01.json.glossary.yaml")
        );
        assert_eq!(checkpoint_path("ep01.json"), PathBuf::from("ep01.json.glossary.yaml"));
    }

    #[tokio::test]
    async fn test_missing_checkpoint_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(dir.path().join("ep.json.glossary.yaml")).await;
        assert!(loaded.entries.is_empty());
        assert_eq!(loaded.status, LoadStatus::NotFound);
    }

    #[tokio::test]
    async fn test_corrupted_checkpoint_yields_empty_glossary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ep.json.glossary.yaml");

        std::fs::write(&path, "eng: [unterminated").unwrap();
        let loaded = load(&path).await;
        assert!(loaded.entries.is_empty());
        assert!(matches!(loaded.status, LoadStatus::Corrupted(_)));

        std::fs::write(&path, "eng: Mac\nzh: 麦克\n").unwrap();
        assert!(matches!(load(&path).await.status, LoadStatus::Corrupted(_)));
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ep.json.glossary.yaml");

        let mut glossary = Glossary::with_authoritative(vec![GlossaryEntry::new("JAG", "军法署")]);
        glossary.learn(vec![
            GlossaryEntry::new("Harm", "哈姆").with_kind("name").with_confidence(0.8),
            GlossaryEntry::new("Mac", "麦克"),
        ]);
        save(&path, &glossary).await.unwrap();

        let loaded = load(&path).await;
        assert_eq!(loaded.status, LoadStatus::Loaded(2));
        assert_eq!(as_map(&loaded.entries), as_map(glossary.learned()));
        // authoritative entries are never written to the checkpoint
        assert!(loaded.entries.iter().all(|e| e.term != "JAG"));
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ep.json.glossary.yaml");

        let mut glossary = Glossary::new();
        glossary.learn(vec![GlossaryEntry::new("a", "甲"), GlossaryEntry::new("b", "乙")]);
        save(&path, &glossary).await.unwrap();

        glossary.compact(1);
        save(&path, &glossary).await.unwrap();
        assert_eq!(load(&path).await.status, LoadStatus::Loaded(1));
    }

    #[tokio::test]
    async fn test_store_restores_with_authoritative_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ep.json");
        let store = CheckpointStore::for_input(&input);
        std::fs::write(store.path(), "- eng: Mac\n  zh: 麦克\n- eng: Bud\n  zh: 巴德\n").unwrap();

        let mut glossary = Glossary::with_authoritative(vec![GlossaryEntry::new("Mac", "麦可")]);
        let status = store.restore_into(&mut glossary).await;

        assert_eq!(status, LoadStatus::Loaded(2));
        assert_eq!(glossary.lookup("Mac").unwrap().0.translation, "麦可");
        assert_eq!(glossary.lookup("Bud").unwrap().0.translation, "巴德");
        assert_eq!(glossary.conflicts().len(), 1);
        assert_eq!(glossary.conflicts()[0].discarded, "麦克");
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::for_input(dir.path().join("missing-dir").join("ep.json"));
        let mut glossary = Glossary::new();
        glossary.learn(vec![GlossaryEntry::new("Harm", "哈姆")]);

        assert!(!store.persist(&glossary).await);
        assert_eq!(glossary.learned().len(), 1);
    }
}
