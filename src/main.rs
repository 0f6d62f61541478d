//! subrefine - bilingual subtitle refinement
//!
//! Entry point for the command line tool: refines English-Chinese subtitle
//! pair documents in batches through an external refiner program or a chat
//! completions API, with resumable runs and a persistent terminology glossary.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing::{Level, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use subrefine::cli::{Args, CheckpointAction, Commands};
use subrefine::config::Config;
use subrefine::glossary::{LoadStatus, checkpoint};
use subrefine::workflow::{self, Workflow};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Refine {
            input,
            output,
            resume,
            checkpoint,
            no_checkpoint,
            glossary,
            pairs_per_chunk,
            max_chunks,
            format,
            dry_run,
            no_incremental_output,
        } => {
            if checkpoint {
                config.glossary.checkpoint = true;
            }
            if no_checkpoint {
                config.glossary.checkpoint = false;
            }
            if glossary.is_some() {
                config.glossary.user_glossary = glossary;
            }
            if pairs_per_chunk.is_some() {
                config.chunking.pairs_per_chunk = pairs_per_chunk;
            }
            if max_chunks.is_some() {
                config.chunking.max_chunks = max_chunks;
            }
            if let Some(format) = format {
                config.refiner.format = format;
            }
            if dry_run {
                config.output.dry_run = true;
            }
            if no_incremental_output {
                config.output.incremental = false;
            }

            let workflow = Workflow::new(config)?;
            let summary = workflow.refine_file(&input, &output, resume).await?;

            println!("\nRefinement summary:");
            println!("  Pairs:       {} ({} preserved, {} pending)", summary.total_pairs, summary.preserved_pairs, summary.pending_pairs);
            println!("  Chunks:      {}/{} refined, {} failed", summary.chunks_refined, summary.chunks_planned, summary.chunks_failed);
            println!("  Corrected:   {} pairs ({} ids ignored)", summary.pairs_corrected, summary.ignored_ids);
            println!("  Glossary:    {} learned terms, {} conflicts", summary.learned_terms, summary.conflicts);
            println!("  Output:      {}", output.display());
        }
        Commands::Plan {
            input,
            resume,
            pairs_per_chunk,
        } => {
            if pairs_per_chunk.is_some() {
                config.chunking.pairs_per_chunk = pairs_per_chunk;
            }
            config.validate()?;

            let stats = workflow::plan_file(&config, &input, resume).await?;
            println!("\nBatch plan for {}:", input.display());
            println!("  Chunks:          {}", stats.chunks);
            println!("  Pairs:           {}", stats.pairs);
            println!("  Pairs per chunk: {}-{} (avg {:.1})", stats.min_pairs, stats.max_pairs, stats.average_pairs());
            println!("  Largest chunk:   ~{} tokens", stats.max_tokens);
        }
        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists; use --force to overwrite", path.display());
            }
            config.save_to_file(&path)?;
            println!("Wrote configuration to {}", path.display());
        }
        Commands::Checkpoint { action } => match action {
            CheckpointAction::Path { input } => {
                println!("{}", checkpoint::checkpoint_path(&input).display());
            }
            CheckpointAction::Show { input } => {
                let path = checkpoint::checkpoint_path(&input);
                let loaded = checkpoint::load(&path).await;
                match loaded.status {
                    LoadStatus::NotFound => println!("No checkpoint at {}", path.display()),
                    LoadStatus::Corrupted(reason) => {
                        println!("Checkpoint {} is unreadable: {}", path.display(), reason)
                    }
                    LoadStatus::Loaded(count) => {
                        println!("\n{} learned terms in {}:", count, path.display());
                        println!("{:<30} {:<30} {:<12} {:<10}", "English", "Chinese", "Type", "Confidence");
                        println!("{}", "-".repeat(85));
                        for entry in &loaded.entries {
                            println!(
                                "{:<30} {:<30} {:<12} {:<10}",
                                entry.term,
                                entry.translation,
                                entry.kind.as_deref().unwrap_or("-"),
                                entry.confidence.as_ref().map(|c| c.to_string()).unwrap_or_else(|| "-".to_string())
                            );
                        }
                    }
                }
            }
        },
    }

    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".subrefine").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "subrefine.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Console output goes to stderr so command output on stdout stays clean
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(verbose)
        .with_line_number(verbose);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("subrefine.log").display()
    );

    Ok(())
}
