use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::format::PairFormat;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Refine a bilingual subtitle pair document
    Refine {
        /// Input pair document (JSON list of {id, eng, chinese})
        input: PathBuf,

        /// Output pair document
        output: PathBuf,

        /// Resume from this pair index; earlier pairs are preserved
        #[arg(long, allow_hyphen_values = true)]
        resume: Option<i64>,

        /// Load and save the learned glossary next to the input file
        #[arg(long)]
        checkpoint: bool,

        /// Disable the glossary checkpoint even if the config enables it
        #[arg(long, conflicts_with = "checkpoint")]
        no_checkpoint: bool,

        /// User glossary (YAML list of {eng, zh}) that always takes precedence
        #[arg(short, long)]
        glossary: Option<PathBuf>,

        /// Fixed number of pairs per refiner batch
        #[arg(long)]
        pairs_per_chunk: Option<usize>,

        /// Process at most this many batches
        #[arg(long)]
        max_chunks: Option<usize>,

        /// Intermediate format sent to the refiner (json, xml-pair, pseudo-toml)
        #[arg(short, long)]
        format: Option<PairFormat>,

        /// Only refine the first few pending pairs
        #[arg(long)]
        dry_run: bool,

        /// Write the output only once at the end
        #[arg(long)]
        no_incremental_output: bool,
    },

    /// Show how an input would be split into batches
    Plan {
        /// Input pair document
        input: PathBuf,

        /// Plan as if resuming from this pair index
        #[arg(long, allow_hyphen_values = true)]
        resume: Option<i64>,

        /// Fixed number of pairs per refiner batch
        #[arg(long)]
        pairs_per_chunk: Option<usize>,
    },

    /// Write a config file with default values
    InitConfig {
        /// Where to write the config file
        #[arg(default_value = "config.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Inspect the glossary checkpoint of an input file
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
pub enum CheckpointAction {
    /// Print where the checkpoint for an input file lives
    Path {
        /// Input pair document
        input: PathBuf,
    },

    /// List the learned terms stored in the checkpoint
    Show {
        /// Input pair document
        input: PathBuf,
    },
}
