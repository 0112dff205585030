//! `reel refresh` command.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::cassette::store::{CassetteStore, FileCassetteStore, RefreshPolicy, RefreshTarget};
use crate::config::EngineConfig;
use crate::mode::ExecutionMode;
use crate::schedule::scheduler::group_units;
use crate::schedule::{SuiteManifest, Tier};

/// Execute the `refresh` command.
///
/// Flags cassettes for re-recording. Replaying a flagged cassette reports it
/// as stale until it is recorded again.
///
/// # Errors
///
/// Returns an error string if no policy is given, a named cassette does not
/// exist, or the store cannot be updated.
pub fn run(
    config: &EngineConfig,
    target: Option<&str>,
    max_age: Option<i64>,
    changed: bool,
) -> Result<(), String> {
    let policy = if changed {
        let manifest = super::load_manifest(config)?;
        RefreshPolicy::HashMismatch { expected: expected_hashes(&manifest) }
    } else if let Some(target) = target {
        RefreshPolicy::Manual { target: RefreshTarget::parse(target) }
    } else if let Some(days) = max_age.or(config.refresh.max_age_days) {
        RefreshPolicy::MaxAge { days }
    } else {
        return Err("nothing to refresh: give a cassette id, `*`, --max-age, or --changed".into());
    };

    let store = FileCassetteStore::new(&config.cassette_root, ExecutionMode::Recording, "refresh");
    let flagged = store.schedule_refresh(&policy, Utc::now()).map_err(|e| e.to_string())?;
    if flagged.is_empty() {
        println!("No cassettes need refreshing.");
        return Ok(());
    }
    for id in &flagged {
        println!("{id}");
    }
    println!("\n{} cassette(s) flagged; re-record with `reel run --mode record`.", flagged.len());
    Ok(())
}

/// Current content hash of every cassette the manifest produces.
fn expected_hashes(manifest: &SuiteManifest) -> BTreeMap<String, String> {
    group_units(&manifest.units)
        .into_iter()
        .filter(|g| g.tier == Tier::Integration)
        .map(|g| {
            let hash = g.content_hash();
            (g.key, hash)
        })
        .collect()
}
