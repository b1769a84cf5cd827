//! CLI command definitions for the `triform` binary.
//!
//! Uses clap derive macros for argument parsing. Handlers live in one module
//! per concern: workflows, provenance, and representations.

pub mod provenance;
pub mod representation;
pub mod workflow;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use triform_types::representation::Mode;

/// Run provenance-tracked analytical workflows.
#[derive(Parser)]
#[command(name = "triform", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "TRIFORM_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log filter used when `RUST_LOG` is unset.
    pub fn log_directives(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow document and print its parallel groups.
    Validate {
        /// Path to the workflow YAML or JSON file.
        file: PathBuf,
    },

    /// Register a workflow and execute it, streaming events.
    Run {
        /// Path to the workflow YAML or JSON file.
        file: PathBuf,
    },

    /// Continue a workflow from its latest checkpoint.
    Resume {
        /// Path to the workflow YAML or JSON file.
        file: PathBuf,
    },

    /// Show the latest checkpoint of a workflow.
    Status {
        /// Path to the workflow YAML or JSON file.
        file: PathBuf,
    },

    /// Trace the lineage of an artifact.
    Lineage {
        /// Artifact hash (SHA-256 hex).
        artifact: String,

        /// Follow consumers instead of producers.
        #[arg(long)]
        forward: bool,

        /// Maximum number of record levels (defaults to `lineage_max_depth`).
        #[arg(long)]
        depth: Option<usize>,
    },

    /// Audit whether a workflow's recorded operations can be reproduced.
    Verify {
        /// Workflow UUID.
        workflow_id: String,
    },

    /// Recommend graph, table, or vector mode for an analytical intent.
    Mode(ModeArgs),

    /// Convert a representation to another mode.
    Convert {
        /// Path to a representation (or bare representation data) JSON file.
        file: PathBuf,

        /// Target mode.
        #[arg(long)]
        to: Mode,

        /// Write the converted representation here instead of stdout.
        #[arg(long, short)]
        out: Option<PathBuf>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Inputs to mode selection.
#[derive(Args)]
pub struct ModeArgs {
    /// What the analysis should answer.
    #[arg(long)]
    pub intent: String,

    /// Derive characteristics from a representation JSON file.
    #[arg(long, conflicts_with_all = ["records", "nodes", "edges", "numeric_ratio", "embeddings"])]
    pub data: Option<PathBuf>,

    /// Number of records.
    #[arg(long, default_value_t = 0)]
    pub records: usize,

    /// Number of graph nodes.
    #[arg(long, default_value_t = 0)]
    pub nodes: usize,

    /// Number of graph edges.
    #[arg(long, default_value_t = 0)]
    pub edges: usize,

    /// Share of numeric columns, in [0, 1].
    #[arg(long, default_value_t = 0.0)]
    pub numeric_ratio: f64,

    /// The data carries embeddings.
    #[arg(long)]
    pub embeddings: bool,
}
