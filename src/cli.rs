//! CLI command definitions and subcommands

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// enrichd - resumable keyword enrichment over rate-limited API keys
#[derive(Parser)]
#[command(
    name = "enrichd",
    about = "Annotates harvested articles with generated keywords, resumably",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Enrich the backlog, resuming from the output store
    Run {
        /// Input CSV of harvested articles
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output CSV checkpoint store
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
    },

    /// Show done/pending counts without dispatching anything
    Status {
        /// Input CSV of harvested articles
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output CSV checkpoint store
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Drop unresolved rows from the output store
    Prune {
        /// Output CSV checkpoint store
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
    },
}

/// Output format for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
