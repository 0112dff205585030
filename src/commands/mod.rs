//! Command dispatch and handlers.

pub mod cleanup;
pub mod presets;
pub mod refresh;
pub mod run;
pub mod worker;

use std::path::{Path, PathBuf};

use crate::cli::Command;
use crate::config::EngineConfig;
use crate::schedule::SuiteManifest;

/// Dispatch a parsed command to its handler.
///
/// # Errors
///
/// Returns an error string if the selected command handler fails.
pub fn dispatch(config: Option<&Path>, command: &Command) -> Result<(), String> {
    match command {
        Command::Run {
            mode,
            preset,
            workers,
            root,
            manifest,
            strict,
            fail_fast,
            in_process,
            json,
        } => {
            let mut config = load_config(config, root.as_deref(), manifest.as_deref())?;
            config.scheduling.strict |= *strict;
            run::run(
                config,
                &run::RunOptions {
                    mode: *mode,
                    preset: *preset,
                    workers: *workers,
                    fail_fast: *fail_fast,
                    in_process: *in_process,
                    json: *json,
                },
            )
        }
        Command::Worker { job } => worker::run(job),
        Command::Refresh { target, max_age, changed, root, manifest } => {
            let config = load_config(config, root.as_deref(), manifest.as_deref())?;
            refresh::run(&config, target.as_deref(), *max_age, *changed)
        }
        Command::Cleanup { yes, root, manifest } => {
            let config = load_config(config, root.as_deref(), manifest.as_deref())?;
            cleanup::run(&config, *yes)
        }
        Command::Presets => presets::run(),
    }
}

/// Loads the engine config and applies the directory flags shared by
/// several commands.
fn load_config(
    path: Option<&Path>,
    root: Option<&Path>,
    manifest: Option<&Path>,
) -> Result<EngineConfig, String> {
    let mut config = EngineConfig::load(path).map_err(|e| e.to_string())?;
    if let Some(root) = root {
        config.cassette_root = PathBuf::from(root);
    }
    if let Some(manifest) = manifest {
        config.manifest = PathBuf::from(manifest);
    }
    Ok(config)
}

fn load_manifest(config: &EngineConfig) -> Result<SuiteManifest, String> {
    SuiteManifest::load(&config.manifest).map_err(|e| e.to_string())
}
