//! Per-worker cassette namespaces.
//!
//! Each worker of a run reads and writes cassettes in its own directory
//! under `<root>/.reel/runs/<run-id>/worker-<n>/`. Replay views are copied in
//! before the worker starts; committed recordings are published back to the
//! root only after their unit succeeds. The run directory also holds the
//! abort sentinel used for cancellation and fail-fast, and the process id of
//! the coordinator that owns it. A run whose coordinator is gone is
//! abandoned: its directory and write leases may be reclaimed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cassette::store::{cassette_file_name, write_atomic, RUNS_DIR, STATE_DIR};
use crate::error::EngineError;

const ABORT_SENTINEL: &str = "ABORT";
const OWNER_FILE: &str = "coordinator.pid";
/// Age after which a run is presumed abandoned where process liveness
/// cannot be checked.
const UNVERIFIED_OWNER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Scratch directory of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    root: PathBuf,
    dir: PathBuf,
}

impl RunDirectory {
    /// Locates the run directory for `run_id` under `root`.
    #[must_use]
    pub fn new(root: &Path, run_id: &str) -> Self {
        Self { root: root.to_path_buf(), dir: root.join(STATE_DIR).join(RUNS_DIR).join(run_id) }
    }

    /// Cassette root shared by every worker.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of this run.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Run id, the last component of the directory.
    #[must_use]
    pub fn run_id(&self) -> String {
        self.dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    }

    /// Creates the run directory and records this process as its owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or the owner file cannot be written.
    pub fn claim(&self) -> Result<(), EngineError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.dir.join(OWNER_FILE), std::process::id().to_string())?;
        Ok(())
    }

    /// Returns `true` if no running coordinator owns this run.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        run_abandoned(&self.dir)
    }

    /// Namespace of worker `index`.
    #[must_use]
    pub fn worker(&self, index: usize) -> WorkerNamespace {
        WorkerNamespace {
            root: self.root.clone(),
            dir: self.dir.join(format!("worker-{index}")),
        }
    }

    /// Asks every worker to stop before its next unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the sentinel cannot be written.
    pub fn signal_abort(&self, reason: &str) -> Result<(), EngineError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.dir.join(ABORT_SENTINEL), reason)?;
        info!(reason, "abort requested");
        Ok(())
    }

    /// Returns the abort reason if an abort was requested.
    #[must_use]
    pub fn abort_reason(&self) -> Option<String> {
        fs::read_to_string(self.dir.join(ABORT_SENTINEL)).ok()
    }

    /// Deletes the run directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn remove(&self) -> Result<(), EngineError> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

/// Lists the runs under `root` whose coordinator is gone, sorted by id.
///
/// # Errors
///
/// Returns an error if the runs directory exists but cannot be listed.
pub fn abandoned_runs(root: &Path) -> Result<Vec<RunDirectory>, EngineError> {
    let runs = root.join(STATE_DIR).join(RUNS_DIR);
    if !runs.exists() {
        return Ok(Vec::new());
    }
    let mut abandoned = Vec::new();
    for entry in fs::read_dir(&runs)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let run = RunDirectory::new(root, &entry.file_name().to_string_lossy());
        if run.is_abandoned() {
            abandoned.push(run);
        }
    }
    abandoned.sort_by_key(RunDirectory::run_id);
    Ok(abandoned)
}

/// A run directory is abandoned when it is missing, has no readable owner,
/// or its owner process has exited.
pub(crate) fn run_abandoned(dir: &Path) -> bool {
    let owner = dir.join(OWNER_FILE);
    let Ok(raw) = fs::read_to_string(&owner) else {
        return true;
    };
    let Ok(pid) = raw.trim().parse::<u32>() else {
        warn!(path = %owner.display(), "unreadable run owner");
        return true;
    };
    if pid == std::process::id() {
        return false;
    }
    match process_running(pid) {
        Some(running) => !running,
        None => {
            let age = fs::metadata(&owner)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok());
            !matches!(age, Some(age) if age <= UNVERIFIED_OWNER_TTL)
        }
    }
}

#[cfg(target_os = "linux")]
fn process_running(pid: u32) -> Option<bool> {
    Some(Path::new("/proc").join(pid.to_string()).exists())
}

#[cfg(not(target_os = "linux"))]
fn process_running(_pid: u32) -> Option<bool> {
    None
}

/// Cassette directory of a single worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerNamespace {
    root: PathBuf,
    dir: PathBuf,
}

impl WorkerNamespace {
    /// Directory the worker's store reads and writes.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Cassette root results are published to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the namespace and copies in the cassettes listed in
    /// `cassette_ids` that exist in the root. Returns the ids copied.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or a copy cannot be created.
    pub fn prepare(&self, cassette_ids: &[String]) -> Result<Vec<String>, EngineError> {
        fs::create_dir_all(&self.dir)?;
        let mut copied = Vec::new();
        for id in cassette_ids {
            let name = cassette_file_name(id);
            let source = self.root.join(&name);
            if source.exists() {
                fs::copy(&source, self.dir.join(&name))?;
                copied.push(id.clone());
            }
        }
        debug!(dir = %self.dir.display(), cassettes = copied.len(), "prepared worker namespace");
        Ok(copied)
    }

    /// Copies a committed cassette from the namespace to the root,
    /// replacing the root copy atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace copy is missing or the root copy
    /// cannot be written.
    pub fn publish(&self, cassette_id: &str, writer: &str) -> Result<PathBuf, EngineError> {
        let name = cassette_file_name(cassette_id);
        let content = fs::read_to_string(self.dir.join(&name))?;
        let target = self.root.join(&name);
        write_atomic(&target, &content, writer)?;
        info!(cassette_id, path = %target.display(), "published cassette");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_live_under_the_run_directory() {
        let root = tempfile::tempdir().unwrap();
        let run = RunDirectory::new(root.path(), "r1");
        let ns = run.worker(2);
        assert_eq!(ns.path(), root.path().join(".reel/runs/r1/worker-2"));
    }

    #[test]
    fn prepare_copies_only_existing_cassettes() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a.cassette"), "metadata: {}").unwrap();
        let ns = RunDirectory::new(root.path(), "r1").worker(0);

        let copied = ns.prepare(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(copied, vec!["a".to_string()]);
        assert!(ns.path().join("a.cassette").exists());
        assert!(!ns.path().join("b.cassette").exists());
    }

    #[test]
    fn publish_replaces_the_root_copy() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a.cassette"), "old").unwrap();
        let ns = RunDirectory::new(root.path(), "r1").worker(0);
        ns.prepare(&[]).unwrap();
        fs::write(ns.path().join("a.cassette"), "new").unwrap();

        ns.publish("a", "r1/worker-0").unwrap();
        assert_eq!(fs::read_to_string(root.path().join("a.cassette")).unwrap(), "new");
    }

    #[test]
    fn abort_sentinel_round_trips() {
        let root = tempfile::tempdir().unwrap();
        let run = RunDirectory::new(root.path(), "r1");
        assert!(run.abort_reason().is_none());
        run.signal_abort("unit x failed").unwrap();
        assert_eq!(run.abort_reason().as_deref(), Some("unit x failed"));
        run.remove().unwrap();
        assert!(!run.path().exists());
    }

    #[test]
    fn claimed_run_is_owned_until_its_owner_exits() {
        let root = tempfile::tempdir().unwrap();
        let run = RunDirectory::new(root.path(), "r1");
        assert!(run.is_abandoned(), "missing directory has no owner");

        run.claim().unwrap();
        assert!(!run.is_abandoned());
        assert_eq!(run.run_id(), "r1");

        fs::write(run.path().join(OWNER_FILE), "not-a-pid").unwrap();
        assert!(run.is_abandoned());
    }

    #[test]
    fn abandoned_runs_skips_live_ones() {
        let root = tempfile::tempdir().unwrap();
        RunDirectory::new(root.path(), "live").claim().unwrap();
        // A worker namespace left behind with no owner file.
        RunDirectory::new(root.path(), "dead").worker(0).prepare(&[]).unwrap();

        let abandoned = abandoned_runs(root.path()).unwrap();
        let ids: Vec<String> = abandoned.iter().map(RunDirectory::run_id).collect();
        assert_eq!(ids, ["dead"]);
    }
}
