//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "semdex",
    version,
    author = "neur0map",
    about = "Per-user semantic index with progressive, quality-gated retrieval",
    long_about = "Semdex keeps an approximate nearest neighbor index per user over their journal \
                  entries, warms it from persisted vectors, and backfills older history on demand \
                  when a search comes back with poor matches."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/semdex/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply on top of the config (e.g., "fast", "accuracy")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index a JSONL corpus in memory and search one user's entries
    Search {
        /// Search query text
        query: String,

        /// JSONL file with one entry per line
        #[arg(long, value_name = "FILE")]
        corpus: PathBuf,

        /// User whose entries are searched
        #[arg(short, long)]
        user: i64,

        /// Maximum number of results to return
        #[arg(short = 'k', long, default_value = "10")]
        limit: usize,

        /// Neighbors fetched per search round (defaults to 4x the limit)
        #[arg(short, long)]
        breadth: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Index a JSONL corpus in memory and print per-user index statistics
    Stats {
        /// JSONL file with one entry per line
        #[arg(long, value_name = "FILE")]
        corpus: PathBuf,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Print the default configuration path
    Path,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
