//! `reel cleanup` command.

use crate::cassette::store::{CassetteStore, FileCassetteStore};
use crate::config::EngineConfig;
use crate::mode::ExecutionMode;
use crate::namespace::abandoned_runs;

/// Execute the `cleanup` command.
///
/// Lists cassette files that no unit in the manifest refers to, along with
/// scratch directories and write leases left by interrupted runs. They are
/// deleted only when `confirmed` is set.
///
/// # Errors
///
/// Returns an error string if the manifest or the store cannot be read, or
/// a file cannot be removed.
pub fn run(config: &EngineConfig, confirmed: bool) -> Result<(), String> {
    let manifest = super::load_manifest(config)?;
    let store = FileCassetteStore::new(&config.cassette_root, ExecutionMode::Recording, "cleanup");
    let orphans = store.list_orphans(&manifest.cassette_ids()).map_err(|e| e.to_string())?;
    let runs = abandoned_runs(&config.cassette_root).map_err(|e| e.to_string())?;
    let leases = store.stale_leases().map_err(|e| e.to_string())?;
    if orphans.is_empty() && runs.is_empty() && leases.is_empty() {
        println!("No orphaned cassettes.");
        return Ok(());
    }

    for name in &orphans {
        println!("{name}");
    }
    for run in &runs {
        println!("interrupted run {}", run.run_id());
    }
    for lease in &leases {
        println!("stale lease {} (held by {})", lease.path.display(), lease.holder);
    }

    if !confirmed {
        println!(
            "\n{} orphaned cassette(s), {} interrupted run(s), {} stale lease(s); \
             rerun with --yes to delete.",
            orphans.len(),
            runs.len(),
            leases.len()
        );
        return Ok(());
    }

    let removed = store.remove(&orphans).map_err(|e| e.to_string())?;
    let released = store.reclaim_leases(&leases).map_err(|e| e.to_string())?;
    for run in &runs {
        run.remove().map_err(|e| e.to_string())?;
    }
    println!(
        "\nRemoved {} orphaned cassette(s), {} interrupted run(s), {released} stale lease(s).",
        removed.len(),
        runs.len()
    );
    Ok(())
}
