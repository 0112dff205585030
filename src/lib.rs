//! Core library entry for `reel`: deterministic recording and replay of
//! outbound HTTP interactions, scheduled across tiered test workers.

pub mod adapters;
pub mod cassette;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod interceptor;
pub mod mode;
pub mod namespace;
pub mod ports;
pub mod report;
pub mod runner;
pub mod schedule;
pub mod worker;

use clap::Parser;

pub use error::{EngineError, FailureKind};

/// Run the CLI with the provided arguments.
///
/// # Errors
///
/// Returns an error string when argument parsing fails or command execution fails.
pub fn run<I, T>(args: I) -> Result<(), String>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = cli::Cli::try_parse_from(args).map_err(|err| err.to_string())?;
    commands::dispatch(cli.config.as_deref(), &cli.command)
}
