//! Binary entrypoint for the `reel` CLI.

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    // Logs go to stderr; worker stdout carries the JSON report.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reel=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match reel::run(std::env::args()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
