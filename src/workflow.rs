use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::chunker::{ChunkStats, chunk_pairs};
use crate::config::Config;
use crate::error::{Result, RefineError};
use crate::glossary::checkpoint::{self, CheckpointStore};
use crate::glossary::{Glossary, LoadStatus};
use crate::pairs::{self, SubtitlePair};
use crate::refine::{Refiner, RefinerFactory};
use crate::resume::{self, PreservedSource, PriorOutput};

/// What a refinement run did, for reporting
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total_pairs: usize,
    pub preserved_pairs: usize,
    pub pending_pairs: usize,
    pub chunks_planned: usize,
    pub chunks_refined: usize,
    pub chunks_failed: usize,
    pub pairs_corrected: usize,
    pub ignored_ids: usize,
    pub learned_terms: usize,
    pub conflicts: usize,
    pub checkpoint: Option<LoadStatus>,
}

pub struct Workflow {
    config: Config,
    refiner: Box<dyn Refiner>,
}

impl Workflow {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let refiner = RefinerFactory::create_refiner(&config.refiner)?;
        Ok(Self::with_refiner(config, refiner))
    }

    pub fn with_refiner(config: Config, refiner: Box<dyn Refiner>) -> Self {
        Self { config, refiner }
    }

    /// Refine the pair document at `input_path` and write the result to
    /// `output_path`.
    ///
    /// With `resume` set, pairs before that index are preserved (from the
    /// existing output when it matches the input) and only the rest is sent to
    /// the refiner. An invalid index fails before anything is written.
    pub async fn refine_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: Q,
        resume: Option<i64>,
    ) -> Result<RunSummary> {
        let input_path = input_path.as_ref();
        let output_path = output_path.as_ref();
        info!("Refining {} -> {}", input_path.display(), output_path.display());

        let full_pairs = pairs::load_pairs(input_path).await?;
        if full_pairs.is_empty() {
            return Err(RefineError::EmptyInput(input_path.display().to_string()));
        }
        info!("Loaded {} subtitle pairs", full_pairs.len());

        let prior = match resume {
            Some(_) => PriorOutput::load(output_path).await,
            None => PriorOutput::Absent,
        };
        let split = resume::split(&full_pairs, resume, &prior)?;

        if resume.is_some() {
            info!(
                "[RESUME] Starting from pair index {}: preserving {} pairs, processing {}",
                split.resume_index,
                split.preserved.len(),
                split.pending.len()
            );
            match (&split.source, &split.fallback) {
                (PreservedSource::PriorOutput, _) => {
                    info!("[RESUME] Preserved pairs taken from existing output {}", output_path.display());
                }
                (PreservedSource::Input, Some(reason)) => {
                    warn!("[RESUME] Not using existing output: {}; preserving pairs from input", reason);
                }
                (PreservedSource::Input, None) => {
                    info!("[RESUME] Output file does not exist yet, will create {}", output_path.display());
                }
            }
        }

        let mut glossary = self.initial_glossary().await?;
        let store = self
            .config
            .glossary
            .checkpoint
            .then(|| CheckpointStore::for_input(input_path));
        let checkpoint_status = match &store {
            Some(store) => Some(store.restore_into(&mut glossary).await),
            None => None,
        };

        let mut pending = split.pending.clone();
        if self.config.output.dry_run && pending.len() > self.config.output.dry_run_pairs {
            info!(
                "[DRY RUN] Limited to {} pairs (from {})",
                self.config.output.dry_run_pairs,
                pending.len()
            );
            pending.truncate(self.config.output.dry_run_pairs);
        }

        let base_tokens = glossary.estimated_tokens();
        debug!("Glossary context: ~{} tokens", base_tokens);
        let mut chunks = chunk_pairs(&pending, &self.config.chunking, base_tokens);
        ChunkStats::from_chunks(&chunks).log();
        if let Some(max_chunks) = self.config.chunking.max_chunks {
            if max_chunks < chunks.len() {
                info!("[LIMITED] Processing only the first {} of {} chunks", max_chunks, chunks.len());
                chunks.truncate(max_chunks);
            }
        }

        let mut summary = RunSummary {
            total_pairs: full_pairs.len(),
            preserved_pairs: split.preserved.len(),
            pending_pairs: split.pending.len(),
            chunks_planned: chunks.len(),
            checkpoint: checkpoint_status,
            ..RunSummary::default()
        };

        let mut working = split.working_pairs();
        let progress = chunk_progress(chunks.len());

        for (index, chunk) in chunks.iter().enumerate() {
            glossary.log_terminology(index == 0);
            let first_id = chunk.first().map(|p| p.id).unwrap_or_default();
            let last_id = chunk.last().map(|p| p.id).unwrap_or_default();
            progress.set_message(format!("pairs {}-{}", first_id, last_id));
            info!(
                "Processing chunk {}/{} ({} pairs, ids {}-{})",
                index + 1,
                chunks.len(),
                chunk.len(),
                first_id,
                last_id
            );

            let started = Instant::now();
            let refinement = match self.refiner.refine_batch(chunk, &glossary).await {
                Ok(refinement) => refinement,
                Err(e) => {
                    warn!("Error processing chunk {}: {}; skipping it", index + 1, e);
                    summary.chunks_failed += 1;
                    progress.inc(1);
                    continue;
                }
            };
            debug!("Chunk {} refined in {:.1}s", index + 1, started.elapsed().as_secs_f64());

            let corrections = corrections_for_chunk(chunk, refinement.pairs, &mut summary);
            let outcome = resume::merge(&working, &corrections);
            working = outcome.pairs;
            summary.chunks_refined += 1;
            summary.pairs_corrected += outcome.applied;
            summary.ignored_ids += outcome.unknown_ids.len();

            let learned = glossary.learn(refinement.terms);
            if learned > 0 {
                info!("Learned {} new terms ({} total)", learned, glossary.learned().len());
            }
            if let Some(store) = &store {
                store.persist(&glossary).await;
            }

            if self.config.output.incremental {
                match pairs::write_pairs(output_path, &working).await {
                    Ok(()) => info!(
                        "[Incremental] Saved pairs {}-{} to {}",
                        first_id,
                        last_id,
                        output_path.display()
                    ),
                    Err(e) => warn!("[Incremental] Failed to save progress: {}", e),
                }
            }

            let limit = self.config.glossary.max_learned_terms;
            if glossary.learned().len() > limit {
                let removed = glossary.compact(limit);
                info!("Glossary compacted: dropped {} low-confidence terms", removed);
                if let Some(store) = &store {
                    store.persist(&glossary).await;
                }
            }

            progress.inc(1);
        }
        progress.finish_and_clear();

        pairs::write_pairs(output_path, &working).await?;

        summary.learned_terms = glossary.learned().len();
        summary.conflicts = glossary.conflicts().len();
        for conflict in glossary.conflicts() {
            info!(
                "Conflict: '{}' kept as '{}', discarded '{}' from {}",
                conflict.term, conflict.authoritative, conflict.discarded, conflict.origin
            );
        }
        info!(
            "Refinement finished: {}/{} chunks refined, {} failed, {} pairs corrected",
            summary.chunks_refined, summary.chunks_planned, summary.chunks_failed, summary.pairs_corrected
        );

        Ok(summary)
    }

    async fn initial_glossary(&self) -> Result<Glossary> {
        match &self.config.glossary.user_glossary {
            Some(path) => {
                let entries = checkpoint::read_entries(path).await?;
                info!("Loaded {} user glossary terms from {}", entries.len(), path.display());
                Ok(Glossary::with_authoritative(entries))
            }
            None => Ok(Glossary::new()),
        }
    }
}

/// Keep only corrections whose id belongs to `chunk`; anything else would
/// touch pairs this batch was never given.
fn corrections_for_chunk(
    chunk: &[SubtitlePair],
    corrected: Vec<SubtitlePair>,
    summary: &mut RunSummary,
) -> Vec<SubtitlePair> {
    let chunk_ids: HashSet<u32> = chunk.iter().map(|p| p.id).collect();
    let (kept, stray): (Vec<_>, Vec<_>) = corrected
        .into_iter()
        .partition(|pair| chunk_ids.contains(&pair.id));

    if !stray.is_empty() {
        let ids: Vec<u32> = stray.iter().map(|p| p.id).collect();
        warn!("Ignoring corrections for ids outside the chunk: {:?}", ids);
        summary.ignored_ids += stray.len();
    }

    kept
}

fn chunk_progress(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    progress
}

/// Chunk statistics for an input without calling the refiner
pub async fn plan_file<P: AsRef<Path>>(
    config: &Config,
    input_path: P,
    resume: Option<i64>,
) -> Result<ChunkStats> {
    let input_path = input_path.as_ref();
    let full_pairs = pairs::load_pairs(input_path).await?;
    let split = resume::split(&full_pairs, resume, &PriorOutput::Absent)?;

    let glossary = match &config.glossary.user_glossary {
        Some(path) => Glossary::with_authoritative(checkpoint::read_entries(path).await?),
        None => Glossary::new(),
    };

    let mut chunks = chunk_pairs(&split.pending, &config.chunking, glossary.estimated_tokens());
    if let Some(max_chunks) = config.chunking.max_chunks {
        chunks.truncate(max_chunks);
    }
    Ok(ChunkStats::from_chunks(&chunks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glossary::GlossaryEntry;
    use crate::refine::{MockRefiner, Refinement};

    fn sample_pairs(count: u32) -> Vec<SubtitlePair> {
        (0..count)
            .map(|id| SubtitlePair::new(id, format!("line {}", id), format!("第{}行", id)))
            .collect()
    }

    fn config(pairs_per_chunk: usize) -> Config {
        let mut config = Config::default();
        config.chunking.pairs_per_chunk = Some(pairs_per_chunk);
        config
    }

    fn uppercase(batch: &[SubtitlePair]) -> Vec<SubtitlePair> {
        batch
            .iter()
            .map(|p| SubtitlePair::new(p.id, p.source_text.to_uppercase(), p.target_text.clone()))
            .collect()
    }

    async fn write_input(dir: &Path, count: u32) -> std::path::PathBuf {
        let path = dir.join("episode.json");
        pairs::write_pairs(&path, &sample_pairs(count)).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_full_run_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), 7).await;
        let output = dir.path().join("out.json");

        let mut refiner = MockRefiner::new();
        refiner.expect_refine_batch().times(3).returning(|batch, _| {
            let mut pairs = uppercase(batch);
            pairs.reverse();
            Ok(Refinement { pairs, terms: Vec::new() })
        });

        let workflow = Workflow::with_refiner(config(3), Box::new(refiner));
        let summary = workflow.refine_file(&input, &output, None).await.unwrap();

        let written = pairs::load_pairs(&output).await.unwrap();
        let ids: Vec<u32> = written.iter().map(|p| p.id).collect();
        assert_eq!(ids, (0..7).collect::<Vec<_>>());
        assert!(written.iter().all(|p| p.source_text.starts_with("LINE")));
        assert_eq!(summary.chunks_refined, 3);
        assert_eq!(summary.pairs_corrected, 7);
    }

    #[tokio::test]
    async fn test_resume_sends_only_pending_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), 6).await;
        let output = dir.path().join("out.json");

        let mut prior = sample_pairs(6);
        prior[1].source_text = "Hello.".to_string();
        prior[4].source_text = "stale".to_string();
        pairs::write_pairs(&output, &prior).await.unwrap();

        let mut refiner = MockRefiner::new();
        refiner
            .expect_refine_batch()
            .withf(|batch, _| batch.iter().all(|p| p.id >= 3))
            .times(1)
            .returning(|batch, _| Ok(Refinement { pairs: uppercase(batch), terms: Vec::new() }));

        let workflow = Workflow::with_refiner(config(10), Box::new(refiner));
        let summary = workflow.refine_file(&input, &output, Some(3)).await.unwrap();

        let written = pairs::load_pairs(&output).await.unwrap();
        assert_eq!(written[1].source_text, "Hello.");
        assert_eq!(written[4].source_text, "LINE 4");
        assert_eq!(summary.preserved_pairs, 3);
        assert_eq!(summary.pending_pairs, 3);
    }

    #[tokio::test]
    async fn test_negative_resume_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), 4).await;
        let output = dir.path().join("out.json");

        let mut refiner = MockRefiner::new();
        refiner.expect_refine_batch().never();

        let mut config = config(2);
        config.glossary.checkpoint = true;
        let workflow = Workflow::with_refiner(config, Box::new(refiner));

        let err = workflow.refine_file(&input, &output, Some(-1)).await.unwrap_err();
        assert!(err.is_resume_validation());
        assert!(!output.exists());
        assert!(!checkpoint::checkpoint_path(&input).exists());
    }

    #[tokio::test]
    async fn test_resume_at_end_rewrites_preserved_list() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), 4).await;
        let output = dir.path().join("out.json");

        let mut refiner = MockRefiner::new();
        refiner.expect_refine_batch().never();

        let workflow = Workflow::with_refiner(config(2), Box::new(refiner));
        let summary = workflow.refine_file(&input, &output, Some(4)).await.unwrap();

        assert_eq!(summary.chunks_planned, 0);
        assert_eq!(pairs::load_pairs(&output).await.unwrap(), sample_pairs(4));
    }

    #[tokio::test]
    async fn test_failing_chunk_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), 4).await;
        let output = dir.path().join("out.json");

        let mut refiner = MockRefiner::new();
        refiner.expect_refine_batch().times(2).returning(|batch, _| {
            if batch[0].id == 0 {
                Err(RefineError::Refiner("model unavailable".to_string()))
            } else {
                Ok(Refinement { pairs: uppercase(batch), terms: Vec::new() })
            }
        });

        let workflow = Workflow::with_refiner(config(2), Box::new(refiner));
        let summary = workflow.refine_file(&input, &output, None).await.unwrap();

        let written = pairs::load_pairs(&output).await.unwrap();
        assert_eq!(written[0].source_text, "line 0");
        assert_eq!(written[3].source_text, "LINE 3");
        assert_eq!(summary.chunks_failed, 1);
        assert_eq!(summary.chunks_refined, 1);
    }

    #[tokio::test]
    async fn test_stray_and_unknown_ids_do_not_touch_other_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), 4).await;
        let output = dir.path().join("out.json");

        let mut refiner = MockRefiner::new();
        refiner.expect_refine_batch().returning(|batch, _| {
            let mut pairs = uppercase(&batch[..1]);
            pairs.push(SubtitlePair::new(0, "hijacked", "劫持"));
            pairs.push(SubtitlePair::new(99, "ghost", "鬼"));
            Ok(Refinement { pairs, terms: Vec::new() })
        });

        let workflow = Workflow::with_refiner(config(10), Box::new(refiner));
        let summary = workflow.refine_file(&input, &output, Some(2)).await.unwrap();

        let written = pairs::load_pairs(&output).await.unwrap();
        assert_eq!(written[0].source_text, "line 0");
        assert_eq!(written[2].source_text, "LINE 2");
        assert_eq!(written[3].source_text, "line 3");
        assert_eq!(summary.ignored_ids, 2);
    }

    #[tokio::test]
    async fn test_checkpoint_collects_terms_and_respects_user_glossary() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), 4).await;
        let output = dir.path().join("out.json");
        let user_glossary = dir.path().join("user.yaml");
        std::fs::write(&user_glossary, "- eng: Mac\n  zh: 麦可\n").unwrap();
        std::fs::write(checkpoint::checkpoint_path(&input), "- eng: Harm\n  zh: 哈姆\n").unwrap();

        let mut refiner = MockRefiner::new();
        refiner.expect_refine_batch().returning(|batch, glossary| {
            assert_eq!(glossary.lookup("Harm").map(|(e, _)| e.translation.as_str()), Some("哈姆"));
            let terms = if batch[0].id == 0 {
                vec![GlossaryEntry::new("Mac", "麦克"), GlossaryEntry::new("Bud", "巴德")]
            } else {
                vec![GlossaryEntry::new("Harm", "哈默")]
            };
            Ok(Refinement { pairs: batch.to_vec(), terms })
        });

        let mut config = config(2);
        config.glossary.checkpoint = true;
        config.glossary.user_glossary = Some(user_glossary);
        let workflow = Workflow::with_refiner(config, Box::new(refiner));
        let summary = workflow.refine_file(&input, &output, None).await.unwrap();

        assert_eq!(summary.checkpoint, Some(LoadStatus::Loaded(1)));
        assert_eq!(summary.conflicts, 1);
        assert_eq!(summary.learned_terms, 2);

        let saved = checkpoint::load(checkpoint::checkpoint_path(&input)).await;
        let terms: Vec<(&str, &str)> = saved
            .entries
            .iter()
            .map(|e| (e.term.as_str(), e.translation.as_str()))
            .collect();
        assert_eq!(terms, vec![("Harm", "哈姆"), ("Bud", "巴德")]);
    }

    #[tokio::test]
    async fn test_compaction_is_checkpointed() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), 2).await;
        let output = dir.path().join("out.json");

        let mut refiner = MockRefiner::new();
        refiner.expect_refine_batch().returning(|batch, _| {
            let terms = (0..5)
                .map(|i| GlossaryEntry::new(format!("term{}", i), "词").with_confidence(i as f64 / 10.0))
                .collect();
            Ok(Refinement { pairs: batch.to_vec(), terms })
        });

        let mut config = config(2);
        config.glossary.checkpoint = true;
        config.glossary.max_learned_terms = 2;
        let workflow = Workflow::with_refiner(config, Box::new(refiner));
        workflow.refine_file(&input, &output, None).await.unwrap();

        let saved = checkpoint::load(checkpoint::checkpoint_path(&input)).await;
        let terms: Vec<&str> = saved.entries.iter().map(|e| e.term.as_str()).collect();
        assert_eq!(terms, vec!["term3", "term4"]);
    }

    #[tokio::test]
    async fn test_dry_run_limits_pending_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), 30).await;
        let output = dir.path().join("out.json");

        let mut refiner = MockRefiner::new();
        refiner
            .expect_refine_batch()
            .withf(|batch, _| batch.len() == 10 && batch[0].id == 0)
            .times(1)
            .returning(|batch, _| Ok(Refinement { pairs: uppercase(batch), terms: Vec::new() }));

        let mut config = config(50);
        config.output.dry_run = true;
        let workflow = Workflow::with_refiner(config, Box::new(refiner));
        workflow.refine_file(&input, &output, None).await.unwrap();

        let written = pairs::load_pairs(&output).await.unwrap();
        assert_eq!(written.len(), 30);
        assert_eq!(written[9].source_text, "LINE 9");
        assert_eq!(written[10].source_text, "line 10");
    }

    #[tokio::test]
    async fn test_plan_respects_resume_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), 25).await;

        let mut config = config(4);
        config.chunking.max_chunks = Some(3);
        let stats = plan_file(&config, &input, Some(5)).await.unwrap();
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.pairs, 12);

        assert!(plan_file(&config, &input, Some(26)).await.is_err());
    }
}
