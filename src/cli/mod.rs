//! CLI module for docqa
//!
//! Provides command-line interface parsing and handling for the docqa binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.
//!
//! The CLI opens the index directory for writing, so only one indexing
//! process should run against a directory at a time.

#[cfg(feature = "ollama")]
pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// docqa - question answering over clinical documents
#[derive(Parser, Debug)]
#[command(
    name = "docqa",
    version,
    about = "Index clinical documents and answer questions with cited sources",
    after_help = "EXAMPLES:\n    \
                  docqa index discharge.txt --strategy section\n    \
                  docqa search \"metformin dose\" --top-k 5\n    \
                  docqa ask \"What was the patient discharged on?\" --stream\n    \
                  docqa --config my.toml stats"
)]
pub struct Cli {
    /// Path to the configuration file (defaults to ./docqa.toml when present)
    #[arg(short, long, global = true, env = "DOCQA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chunk, embed and index a text file
    Index {
        /// File to index
        file: PathBuf,

        /// Document identifier (defaults to the file stem)
        #[arg(short, long)]
        document_id: Option<String>,

        /// Chunking strategy: paragraph, section, sliding_window or semantic
        #[arg(short, long)]
        strategy: Option<String>,
    },

    /// Search indexed chunks
    Search {
        query: String,

        /// Number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Minimum similarity in [0, 1]
        #[arg(short, long)]
        threshold: Option<f32>,
    },

    /// Answer a question from the indexed documents
    Ask {
        question: String,

        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,

        /// Do not extract or print citations
        #[arg(long)]
        no_sources: bool,

        /// Number of chunks to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Show index statistics
    Stats,

    /// Remove a document from the index
    Delete {
        document_id: String,
    },

    /// Compact deleted documents out of the index
    Rebuild,

    /// Print the effective configuration
    Config,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
