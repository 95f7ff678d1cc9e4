//! CLI module for tubeqa.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use crate::retrieval::SearchMethod;
use crate::rewrite::RewriteStrategy;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// tubeqa - Grounded question answering over YouTube transcripts
///
/// Ingest transcripts, ask cited questions, and measure retrieval and answer
/// quality against synthetic ground truth.
#[derive(Parser, Debug)]
#[command(name = "tubeqa")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "TUBEQA_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest transcript documents (JSON: {"video": {...}, "segments": [...]})
    Ingest {
        /// One or more document files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Ask a question and get a cited answer
    Ask {
        /// The question to ask
        question: String,

        /// Restrict retrieval to one video
        #[arg(long)]
        video: Option<String>,

        /// Query rewriting strategy (none, chain_of_thought, react, expand)
        #[arg(short, long)]
        strategy: Option<RewriteStrategy>,

        /// Search method (embedding, text, hybrid)
        #[arg(short, long)]
        method: Option<SearchMethod>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search for relevant transcript segments without generating an answer
    Search {
        /// Search query
        query: String,

        /// Restrict retrieval to one video
        #[arg(long)]
        video: Option<String>,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Query rewriting strategy
        #[arg(short, long)]
        strategy: Option<RewriteStrategy>,

        /// Search method (embedding, text, hybrid)
        #[arg(short, long)]
        method: Option<SearchMethod>,
    },

    /// List ingested videos
    List,

    /// Generate ground-truth questions from transcript segments
    GroundTruth {
        /// Video ids to process
        videos: Vec<String>,

        /// Process every ingested video
        #[arg(long, conflicts_with = "videos")]
        all: bool,
    },

    /// Evaluate retrieval or answer quality against ground truth
    Evaluate {
        #[command(subcommand)]
        target: EvaluateTarget,
    },

    /// Evaluate retrieval over a grid of k values, rewrite strategies and search methods
    Sweep {
        /// Restrict to one video's ground truth
        #[arg(long)]
        video: Option<String>,

        /// k values to try (default from config)
        #[arg(short, long, value_delimiter = ',')]
        k: Vec<usize>,

        /// Rewrite strategies to try (default from config)
        #[arg(short, long, value_delimiter = ',')]
        strategies: Vec<RewriteStrategy>,

        /// Search methods to try (default from config)
        #[arg(short, long, value_delimiter = ',')]
        methods: Vec<SearchMethod>,
    },

    /// Show evaluation and feedback statistics
    Stats {
        /// Only include records from the last N days
        #[arg(short, long)]
        days: Option<i64>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record user feedback on an answer
    Feedback {
        /// The question that was asked
        #[arg(short, long)]
        query: String,

        /// The answer that was shown
        #[arg(short, long)]
        response: String,

        /// Feedback label (conventionally +1 or -1)
        #[arg(short, long, allow_hyphen_values = true)]
        label: String,

        /// Video the question was about
        #[arg(long)]
        video: Option<String>,

        /// Chat id printed by 'tubeqa ask'
        #[arg(long)]
        chat_id: Option<i64>,
    },

    /// Export stored records for analysis
    Export {
        /// Records to export
        #[arg(value_enum)]
        target: ExportTarget,

        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,

        /// Output format (json, csv)
        #[arg(long, default_value = "json")]
        format: String,

        /// Only records for this video
        #[arg(long)]
        video: Option<String>,
    },

    /// Verify that the segment store and the vector index agree
    Check {
        /// Check one video (default: all)
        #[arg(long)]
        video: Option<String>,

        /// Re-index missing segments and drop orphaned index entries
        #[arg(long)]
        repair: bool,
    },

    /// Start HTTP API server for the chat front-end and dashboards
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum EvaluateTarget {
    /// Hit rate and MRR of the configured retrieval
    Retrieval {
        /// Restrict to one video's ground truth
        #[arg(long)]
        video: Option<String>,

        /// Override retrieval.context_size (and top_k) for this run
        #[arg(short, long)]
        k: Option<usize>,

        /// Override the rewrite strategy for this run
        #[arg(short, long)]
        strategy: Option<RewriteStrategy>,

        /// Override the search method for this run
        #[arg(short, long)]
        method: Option<SearchMethod>,
    },

    /// Judge generated answers for relevance
    Answers {
        /// Restrict to one video's ground truth
        #[arg(long)]
        video: Option<String>,

        /// Evaluate at most this many questions
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

/// Record tables that can be exported.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportTarget {
    GroundTruth,
    Evaluations,
    SearchPerformance,
    Feedback,
    Chats,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "retrieval.top_k")
        key: String,
        /// Configuration value
        value: String,
    },

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
