//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::mode::ExecutionMode;
use crate::schedule::Preset;

/// Top-level CLI parser for `reel`.
#[derive(Debug, Parser)]
#[command(
    name = "reel",
    version,
    about = "Record and replay HTTP interactions for tiered test suites"
)]
pub struct Cli {
    /// Config file (defaults to `reel.yaml` when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a preset of the suite in record or replay mode.
    Run {
        /// `record` or `replay`.
        #[arg(long, default_value = "replay")]
        mode: ExecutionMode,
        /// Which units to run.
        #[arg(long, default_value = "fast")]
        preset: Preset,
        /// Number of workers (recording always uses one).
        #[arg(long)]
        workers: Option<usize>,
        /// Cassette directory.
        #[arg(long)]
        root: Option<PathBuf>,
        /// Suite manifest.
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Refuse parallel recording instead of reducing to one worker.
        #[arg(long)]
        strict: bool,
        /// Abort the run on the first failed unit.
        #[arg(long)]
        fail_fast: bool,
        /// Run workers inside this process instead of as child processes.
        #[arg(long)]
        in_process: bool,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Execute one worker's job file (launched by `reel run`).
    #[command(hide = true)]
    Worker {
        /// Job file written by the coordinator.
        #[arg(long)]
        job: PathBuf,
    },
    /// Flag cassettes for re-recording.
    Refresh {
        /// Cassette id, or `*` for every cassette.
        target: Option<String>,
        /// Flag cassettes older than this many days.
        #[arg(long, conflicts_with = "target")]
        max_age: Option<i64>,
        /// Flag cassettes whose content hash no longer matches the manifest.
        #[arg(long, conflicts_with_all = ["target", "max_age"])]
        changed: bool,
        /// Cassette directory.
        #[arg(long)]
        root: Option<PathBuf>,
        /// Suite manifest (used by `--changed`).
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// List cassettes no test refers to, and delete them with `--yes`.
    Cleanup {
        /// Delete the listed orphans.
        #[arg(long)]
        yes: bool,
        /// Cassette directory.
        #[arg(long)]
        root: Option<PathBuf>,
        /// Suite manifest.
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// List execution presets and the tiers they select.
    Presets,
}
