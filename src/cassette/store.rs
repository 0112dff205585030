//! Cassette store: durable read/write of cassettes, staleness marks, and
//! orphan detection.
//!
//! Directory layout:
//!
//! ```text
//! <root>/
//!   ├── <cassette-id>.cassette        YAML, one per test unit or workflow
//!   └── .reel/
//!       ├── refresh-marks.yaml        cassettes flagged for re-recording
//!       ├── leases/<file>.lease       write leases held during recording
//!       └── runs/<run-id>/worker-N/   per-worker namespaces
//! ```
//!
//! Cassettes are never edited in place: recorded interactions are staged in
//! memory and written with a single atomic rename on [`CassetteStore::commit`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::format::{Cassette, CassetteMetadata, Interaction};
use crate::error::EngineError;
use crate::mode::ExecutionMode;
use crate::namespace::run_abandoned;

/// File extension of cassette documents.
pub const CASSETTE_EXTENSION: &str = "cassette";
/// Engine state directory inside a cassette root.
pub const STATE_DIR: &str = ".reel";
/// Directory under [`STATE_DIR`] holding one scratch directory per run.
pub(crate) const RUNS_DIR: &str = "runs";
const REFRESH_INDEX: &str = "refresh-marks.yaml";
const LEASE_DIR: &str = "leases";

/// Result of comparing a cassette against the current inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// The cassette reflects the current inputs.
    Fresh,
    /// The cassette must be re-recorded.
    Stale {
        /// Why the cassette is stale.
        reason: String,
    },
}

/// Which cassettes a refresh applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTarget {
    /// Every cassette in the store (`*`).
    All,
    /// A single cassette id.
    Cassette(String),
}

impl RefreshTarget {
    /// Parses `*` or a cassette id.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw == "*" {
            Self::All
        } else {
            Self::Cassette(raw.to_string())
        }
    }
}

/// When cassettes are flagged for re-recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Flag cassettes recorded more than `days` days ago.
    MaxAge {
        /// Maximum cassette age.
        days: i64,
    },
    /// Flag cassettes whose stored hash differs from the expected one.
    HashMismatch {
        /// Current content hash per cassette id.
        expected: BTreeMap<String, String>,
    },
    /// Flag the target unconditionally.
    Manual {
        /// Cassettes to flag.
        target: RefreshTarget,
    },
}

/// A refresh flag persisted beside the cassettes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshMark {
    /// Why the cassette was flagged.
    pub reason: String,
    /// When the flag was set.
    pub marked_at: DateTime<Utc>,
}

/// A write lease whose holder belongs to an abandoned run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleLease {
    /// Lease file.
    pub path: PathBuf,
    /// Writer recorded in the lease.
    pub holder: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RefreshIndex {
    #[serde(default)]
    marks: BTreeMap<String, RefreshMark>,
}

/// Repository interface over cassette storage.
pub trait CassetteStore: Send + Sync {
    /// Loads a committed cassette.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CassetteNotFound`] if no cassette exists for `cassette_id`.
    fn open(&self, cassette_id: &str) -> Result<Cassette, EngineError>;

    /// Stages an interaction for `cassette_id`, taking the write lease on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StoreWriteConflict`] if another writer holds the
    /// lease, or [`EngineError::ModeViolation`] outside `Recording` mode.
    fn append(&self, cassette_id: &str, interaction: Interaction) -> Result<(), EngineError>;

    /// Atomically writes the staged interactions and releases the lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the cassette cannot be written.
    fn commit(&self, metadata: CassetteMetadata) -> Result<PathBuf, EngineError>;

    /// Drops staged interactions without writing and releases the lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease file cannot be removed.
    fn discard(&self, cassette_id: &str) -> Result<(), EngineError>;

    /// Compares a cassette against the current content hash and refresh marks.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh index cannot be read.
    fn verify_freshness(
        &self,
        cassette: &Cassette,
        current_hash: &str,
    ) -> Result<Freshness, EngineError>;

    /// Lists cassette files with no corresponding known test id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be listed.
    fn list_orphans(&self, known_test_ids: &[String]) -> Result<Vec<String>, EngineError>;

    /// Flags cassettes for re-recording. Returns the flagged ids.
    ///
    /// # Errors
    ///
    /// Returns an error if cassettes or the refresh index cannot be read or written.
    fn schedule_refresh(
        &self,
        policy: &RefreshPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, EngineError>;

    /// Deletes the named cassette files. Returns the names actually removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be removed.
    fn remove(&self, file_names: &[String]) -> Result<Vec<String>, EngineError>;
}

/// Maps a cassette id to its file name. Bytes outside `[A-Za-z0-9._-]` are
/// written as `%XX`, so distinct ids never share a file.
#[must_use]
pub fn cassette_file_name(cassette_id: &str) -> String {
    let mut stem = String::with_capacity(cassette_id.len());
    for byte in cassette_id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("{stem}.{CASSETTE_EXTENSION}")
}

/// Flat-file [`CassetteStore`] with one YAML document per cassette.
pub struct FileCassetteStore {
    dir: PathBuf,
    control: PathBuf,
    mode: ExecutionMode,
    writer: String,
    staged: Mutex<HashMap<String, Vec<Interaction>>>,
}

impl FileCassetteStore {
    /// Opens a store whose cassettes live directly in `root`.
    #[must_use]
    pub fn new(root: &Path, mode: ExecutionMode, writer: impl Into<String>) -> Self {
        Self::with_namespace(root, root, mode, writer)
    }

    /// Opens a store reading and writing cassettes in `namespace` while
    /// sharing leases and refresh marks with `root`.
    #[must_use]
    pub fn with_namespace(
        namespace: &Path,
        root: &Path,
        mode: ExecutionMode,
        writer: impl Into<String>,
    ) -> Self {
        Self {
            dir: namespace.to_path_buf(),
            control: root.join(STATE_DIR),
            mode,
            writer: writer.into(),
            staged: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding this store's cassette files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the cassette file for `cassette_id`.
    #[must_use]
    pub fn cassette_path(&self, cassette_id: &str) -> PathBuf {
        self.dir.join(cassette_file_name(cassette_id))
    }

    /// Lists cassette file names in the store, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn list(&self) -> Result<Vec<String>, EngineError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let suffix = format!(".{CASSETTE_EXTENSION}");
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(&suffix) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Returns the current refresh marks keyed by cassette id.
    ///
    /// # Errors
    ///
    /// Returns an error if the index exists but cannot be parsed.
    pub fn refresh_marks(&self) -> Result<BTreeMap<String, RefreshMark>, EngineError> {
        Ok(self.load_index()?.marks)
    }

    fn load_file(&self, path: &Path) -> Result<Cassette, EngineError> {
        let content = fs::read_to_string(path)?;
        Cassette::from_yaml(&content).map_err(|e| {
            EngineError::Format(format!("failed to parse cassette {}: {e}", path.display()))
        })
    }

    fn lease_path(&self, cassette_id: &str) -> PathBuf {
        self.control.join(LEASE_DIR).join(format!("{}.lease", cassette_file_name(cassette_id)))
    }

    fn acquire_lease(&self, cassette_id: &str) -> Result<(), EngineError> {
        let path = self.lease_path(cassette_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut reclaimed = false;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(self.writer.as_bytes())?;
                    debug!(cassette_id, writer = %self.writer, "acquired write lease");
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = fs::read_to_string(&path).unwrap_or_default();
                    if holder == self.writer {
                        return Ok(());
                    }
                    if !reclaimed && self.holder_abandoned(&holder) {
                        warn!(cassette_id, holder = %holder, "reclaiming abandoned lease");
                        remove_if_present(&path)?;
                        reclaimed = true;
                        continue;
                    }
                    return Err(EngineError::StoreWriteConflict {
                        cassette_id: cassette_id.to_string(),
                        holder: if holder.is_empty() { "an unknown writer".into() } else { holder },
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Holders are `<run-id>/worker-<n>`; other writers are never reclaimed.
    fn holder_abandoned(&self, holder: &str) -> bool {
        let Some((run_id, _)) = holder.split_once('/') else {
            return false;
        };
        let valid = !run_id.is_empty()
            && run_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        valid && run_abandoned(&self.control.join(RUNS_DIR).join(run_id))
    }

    /// Lists write leases held by runs whose coordinator is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease directory cannot be read.
    pub fn stale_leases(&self) -> Result<Vec<StaleLease>, EngineError> {
        let dir = self.control.join(LEASE_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut stale = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let holder = fs::read_to_string(&path).unwrap_or_default();
            if self.holder_abandoned(&holder) {
                stale.push(StaleLease { path, holder });
            }
        }
        stale.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(stale)
    }

    /// Deletes the given stale leases. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a lease file cannot be removed.
    pub fn reclaim_leases(&self, leases: &[StaleLease]) -> Result<usize, EngineError> {
        let mut removed = 0;
        for lease in leases {
            if lease.path.parent() != Some(self.control.join(LEASE_DIR).as_path()) {
                warn!(path = %lease.path.display(), "refusing to remove non-lease path");
                continue;
            }
            if remove_if_present(&lease.path)? {
                info!(holder = %lease.holder, path = %lease.path.display(), "removed stale lease");
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn release_lease(&self, cassette_id: &str) -> Result<(), EngineError> {
        remove_if_present(&self.lease_path(cassette_id)).map(|_| ())
    }

    fn staged(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<Interaction>>>, EngineError> {
        self.staged.lock().map_err(|_| EngineError::Io("cassette staging lock poisoned".into()))
    }

    fn index_path(&self) -> PathBuf {
        self.control.join(REFRESH_INDEX)
    }

    fn load_index(&self) -> Result<RefreshIndex, EngineError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(RefreshIndex::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    fn save_index(&self, index: &RefreshIndex) -> Result<(), EngineError> {
        write_atomic(&self.index_path(), &serde_yaml::to_string(index)?, &self.writer)
    }

    fn require_recording(&self, operation: &str) -> Result<(), EngineError> {
        if self.mode == ExecutionMode::Recording {
            Ok(())
        } else {
            Err(EngineError::ModeViolation(format!(
                "{operation} is only permitted in recording mode (run mode is {})",
                self.mode
            )))
        }
    }
}

impl CassetteStore for FileCassetteStore {
    fn open(&self, cassette_id: &str) -> Result<Cassette, EngineError> {
        let path = self.cassette_path(cassette_id);
        if !path.exists() {
            return Err(EngineError::CassetteNotFound(cassette_id.to_string()));
        }
        let cassette = self.load_file(&path)?;
        if cassette.metadata.cassette_id != cassette_id {
            return Err(EngineError::Format(format!(
                "{} holds cassette '{}', not '{cassette_id}'",
                path.display(),
                cassette.metadata.cassette_id
            )));
        }
        Ok(cassette)
    }

    fn append(&self, cassette_id: &str, interaction: Interaction) -> Result<(), EngineError> {
        self.require_recording("append")?;
        let mut staged = self.staged()?;
        if !staged.contains_key(cassette_id) {
            self.acquire_lease(cassette_id)?;
        }
        staged.entry(cassette_id.to_string()).or_default().push(interaction);
        Ok(())
    }

    fn commit(&self, metadata: CassetteMetadata) -> Result<PathBuf, EngineError> {
        self.require_recording("commit")?;
        let cassette_id = metadata.cassette_id.clone();
        let interactions = {
            let mut staged = self.staged()?;
            match staged.remove(&cassette_id) {
                Some(interactions) => interactions,
                None => {
                    self.acquire_lease(&cassette_id)?;
                    Vec::new()
                }
            }
        };

        let cassette = Cassette { metadata, interactions };
        let path = self.cassette_path(&cassette_id);
        let written = cassette
            .to_yaml()
            .map_err(EngineError::from)
            .and_then(|yaml| write_atomic(&path, &yaml, &self.writer));
        self.release_lease(&cassette_id)?;
        written?;

        let mut index = self.load_index()?;
        if index.marks.remove(&cassette_id).is_some() {
            self.save_index(&index)?;
        }
        info!(
            cassette_id = %cassette_id,
            interactions = cassette.interactions.len(),
            "committed cassette"
        );
        Ok(path)
    }

    fn discard(&self, cassette_id: &str) -> Result<(), EngineError> {
        let had_staged = self.staged()?.remove(cassette_id).is_some();
        if had_staged {
            debug!(cassette_id, "discarded staged interactions");
            self.release_lease(cassette_id)?;
        }
        Ok(())
    }

    fn verify_freshness(
        &self,
        cassette: &Cassette,
        current_hash: &str,
    ) -> Result<Freshness, EngineError> {
        if cassette.metadata.content_hash != current_hash {
            return Ok(Freshness::Stale {
                reason: format!(
                    "content hash changed (recorded {}, current {current_hash})",
                    short(&cassette.metadata.content_hash)
                ),
            });
        }
        let index = self.load_index()?;
        Ok(match index.marks.get(&cassette.metadata.cassette_id) {
            Some(mark) => Freshness::Stale { reason: mark.reason.clone() },
            None => Freshness::Fresh,
        })
    }

    fn list_orphans(&self, known_test_ids: &[String]) -> Result<Vec<String>, EngineError> {
        let known: BTreeSet<String> =
            known_test_ids.iter().map(|id| cassette_file_name(id)).collect();
        Ok(self.list()?.into_iter().filter(|name| !known.contains(name)).collect())
    }

    fn schedule_refresh(
        &self,
        policy: &RefreshPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, EngineError> {
        let mut flagged: Vec<(String, String)> = Vec::new();
        match policy {
            RefreshPolicy::MaxAge { days } => {
                let cutoff = max_age_cutoff(now, *days)?;
                for name in self.list()? {
                    let cassette = self.load_file(&self.dir.join(&name))?;
                    if cassette.metadata.recorded_at < cutoff {
                        flagged.push((
                            cassette.metadata.cassette_id,
                            format!("recorded more than {days} days ago"),
                        ));
                    }
                }
            }
            RefreshPolicy::HashMismatch { expected } => {
                for (cassette_id, hash) in expected {
                    let path = self.cassette_path(cassette_id);
                    if !path.exists() {
                        continue;
                    }
                    let cassette = self.load_file(&path)?;
                    if &cassette.metadata.content_hash != hash {
                        flagged.push((cassette_id.clone(), "content hash changed".into()));
                    }
                }
            }
            RefreshPolicy::Manual { target: RefreshTarget::All } => {
                for name in self.list()? {
                    let cassette = self.load_file(&self.dir.join(&name))?;
                    flagged.push((cassette.metadata.cassette_id, "manual refresh".into()));
                }
            }
            RefreshPolicy::Manual { target: RefreshTarget::Cassette(cassette_id) } => {
                if !self.cassette_path(cassette_id).exists() {
                    return Err(EngineError::CassetteNotFound(cassette_id.clone()));
                }
                flagged.push((cassette_id.clone(), "manual refresh".into()));
            }
        }

        if flagged.is_empty() {
            return Ok(Vec::new());
        }
        let mut index = self.load_index()?;
        for (cassette_id, reason) in &flagged {
            let mark = RefreshMark { reason: reason.clone(), marked_at: now };
            index.marks.insert(cassette_id.clone(), mark);
        }
        self.save_index(&index)?;
        info!(count = flagged.len(), "flagged cassettes for refresh");
        Ok(flagged.into_iter().map(|(id, _)| id).collect())
    }

    fn remove(&self, file_names: &[String]) -> Result<Vec<String>, EngineError> {
        let suffix = format!(".{CASSETTE_EXTENSION}");
        let mut removed = Vec::new();
        let mut removed_ids = Vec::new();
        for name in file_names {
            if !name.ends_with(&suffix) || name.contains(['/', '\\']) {
                warn!(name = %name, "refusing to remove non-cassette path");
                continue;
            }
            let path = self.dir.join(name);
            if !path.exists() {
                continue;
            }
            if let Ok(cassette) = self.load_file(&path) {
                removed_ids.push(cassette.metadata.cassette_id);
            }
            fs::remove_file(&path)?;
            removed.push(name.clone());
        }

        if !removed_ids.is_empty() {
            let mut index = self.load_index()?;
            let before = index.marks.len();
            index.marks.retain(|id, _| !removed_ids.contains(id));
            if index.marks.len() != before {
                self.save_index(&index)?;
            }
        }
        Ok(removed)
    }
}

impl Drop for FileCassetteStore {
    fn drop(&mut self) {
        let Ok(staged) = self.staged.get_mut() else {
            return;
        };
        let abandoned: Vec<String> = staged.drain().map(|(id, _)| id).collect();
        for cassette_id in abandoned {
            warn!(cassette_id = %cassette_id, "discarding uncommitted recording");
            if let Err(e) = self.release_lease(&cassette_id) {
                warn!(cassette_id = %cassette_id, error = %e, "failed to release write lease");
            }
        }
    }
}

/// Writes `content` to a sibling temp file, then renames it over `path`.
pub(crate) fn write_atomic(path: &Path, content: &str, writer: &str) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let tag: String = writer.chars().filter(char::is_ascii_alphanumeric).collect();
    let tmp = path.with_file_name(format!(".{file_name}.{tag}.tmp"));
    fs::write(&tmp, content)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Removes `path`, returning `false` if it did not exist.
fn remove_if_present(path: &Path) -> Result<bool, EngineError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Oldest `recorded_at` still considered fresh under a `days` age limit.
fn max_age_cutoff(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>, EngineError> {
    if days < 0 {
        return Err(EngineError::Config(format!("max age must not be negative (got {days})")));
    }
    Duration::try_days(days)
        .and_then(|age| now.checked_sub_signed(age))
        .ok_or_else(|| EngineError::Config(format!("max age of {days} days is out of range")))
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassette::format::ClientKind;

    fn interaction(uri: &str) -> Interaction {
        Interaction {
            client_kind: ClientKind::Http,
            method: "GET".into(),
            uri: uri.into(),
            request_headers: vec![],
            request_body: String::new(),
            response_status: 200,
            response_headers: vec![],
            response_body: "{\"id\":1}".into(),
        }
    }

    fn metadata(id: &str, hash: &str, recorded_at: DateTime<Utc>) -> CassetteMetadata {
        CassetteMetadata {
            cassette_id: id.into(),
            content_hash: hash.into(),
            recorded_at,
            subject_tool: "chat".into(),
            subject_model: "flash".into(),
        }
    }

    fn record(store: &FileCassetteStore, id: &str, hash: &str) {
        store.append(id, interaction("/users/1")).unwrap();
        store.commit(metadata(id, hash, Utc::now())).unwrap();
    }

    #[test]
    fn commit_then_open_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "w0");
        store.append("users", interaction("/users/1")).unwrap();
        store.append("users", interaction("/users/2")).unwrap();
        let path = store.commit(metadata("users", "h1", Utc::now())).unwrap();
        assert_eq!(path, dir.path().join("users.cassette"));

        let cassette = store.open("users").unwrap();
        assert_eq!(cassette.interactions.len(), 2);
        assert_eq!(cassette.interactions[1].uri, "/users/2");
        assert!(!store.lease_path("users").exists(), "lease released after commit");
    }

    #[test]
    fn open_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCassetteStore::new(dir.path(), ExecutionMode::Replaying, "w0");
        assert!(matches!(store.open("nope"), Err(EngineError::CassetteNotFound(_))));
    }

    #[test]
    fn append_is_refused_while_replaying() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCassetteStore::new(dir.path(), ExecutionMode::Replaying, "w0");
        let err = store.append("users", interaction("/users/1")).unwrap_err();
        assert!(matches!(err, EngineError::ModeViolation(_)));
    }

    #[test]
    fn second_writer_hits_write_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "worker-0");
        let second = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "worker-1");
        first.append("users", interaction("/users/1")).unwrap();

        match second.append("users", interaction("/users/1")) {
            Err(EngineError::StoreWriteConflict { holder, .. }) => assert_eq!(holder, "worker-0"),
            other => panic!("expected write conflict, got {other:?}"),
        }
        first.commit(metadata("users", "h", Utc::now())).unwrap();
        second.append("users", interaction("/users/1")).unwrap();
    }

    #[test]
    fn lease_of_an_abandoned_run_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let lease =
            FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "x").lease_path("users");
        fs::create_dir_all(lease.parent().unwrap()).unwrap();
        // The holder's run directory no longer exists.
        fs::write(&lease, "gone-run/worker-0").unwrap();

        let store = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "r2/worker-0");
        assert_eq!(store.stale_leases().unwrap().len(), 1);
        store.append("users", interaction("/users/1")).unwrap();
        assert_eq!(fs::read_to_string(&lease).unwrap(), "r2/worker-0");
        assert!(store.stale_leases().unwrap().is_empty());
    }

    #[test]
    fn lease_of_a_live_run_still_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        crate::namespace::RunDirectory::new(dir.path(), "live-run").claim().unwrap();
        let holder =
            FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "live-run/worker-0");
        holder.append("users", interaction("/users/1")).unwrap();

        let other = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "r2/worker-0");
        assert!(other.stale_leases().unwrap().is_empty());
        match other.append("users", interaction("/users/1")) {
            Err(EngineError::StoreWriteConflict { holder, .. }) => {
                assert_eq!(holder, "live-run/worker-0");
            }
            other => panic!("expected write conflict, got {other:?}"),
        }
    }

    #[test]
    fn stale_leases_are_removed_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "cleanup");
        let lease = store.lease_path("orders");
        fs::create_dir_all(lease.parent().unwrap()).unwrap();
        fs::write(&lease, "gone-run/worker-1").unwrap();

        let stale = store.stale_leases().unwrap();
        assert_eq!(stale[0].holder, "gone-run/worker-1");
        assert_eq!(store.reclaim_leases(&stale).unwrap(), 1);
        assert!(!lease.exists());
    }

    #[test]
    fn discarded_recording_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "w0");
        store.append("users", interaction("/users/1")).unwrap();
        store.discard("users").unwrap();
        assert!(!store.cassette_path("users").exists());
        assert!(!store.lease_path("users").exists());
    }

    #[test]
    fn dropping_the_store_releases_abandoned_leases() {
        let dir = tempfile::tempdir().unwrap();
        let lease = {
            let store = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "w0");
            store.append("users", interaction("/users/1")).unwrap();
            store.lease_path("users")
        };
        assert!(!lease.exists());
        assert!(!dir.path().join("users.cassette").exists());
    }

    #[test]
    fn freshness_detects_hash_change_and_marks() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "w0");
        record(&store, "users", "h1");
        let cassette = store.open("users").unwrap();

        assert_eq!(store.verify_freshness(&cassette, "h1").unwrap(), Freshness::Fresh);
        let changed = store.verify_freshness(&cassette, "h2").unwrap();
        assert!(matches!(changed, Freshness::Stale { .. }));

        let flagged = store
            .schedule_refresh(
                &RefreshPolicy::Manual { target: RefreshTarget::parse("users") },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(flagged, vec!["users".to_string()]);
        assert_eq!(
            store.verify_freshness(&cassette, "h1").unwrap(),
            Freshness::Stale { reason: "manual refresh".into() }
        );

        record(&store, "users", "h1");
        let cassette = store.open("users").unwrap();
        assert_eq!(store.verify_freshness(&cassette, "h1").unwrap(), Freshness::Fresh);
    }

    #[test]
    fn max_age_policy_flags_only_old_cassettes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "w0");
        let now = Utc::now();
        store.commit(metadata("old", "h", now - Duration::days(45))).unwrap();
        store.commit(metadata("new", "h", now - Duration::days(2))).unwrap();

        let flagged = store.schedule_refresh(&RefreshPolicy::MaxAge { days: 30 }, now).unwrap();
        assert_eq!(flagged, vec!["old".to_string()]);
        assert!(store.cassette_path("old").exists(), "refresh never deletes cassettes");
    }

    #[test]
    fn max_age_out_of_range_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "w0");
        record(&store, "users", "h");

        for days in [1_000_000_000, i64::MAX, -1] {
            let policy = RefreshPolicy::MaxAge { days };
            let err = store.schedule_refresh(&policy, Utc::now()).unwrap_err();
            assert!(matches!(err, EngineError::Config(_)), "{days}: {err:?}");
        }
        assert!(store.refresh_marks().unwrap().is_empty());
    }

    #[test]
    fn hash_mismatch_policy_flags_changed_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "w0");
        record(&store, "a", "h-a");
        record(&store, "b", "h-b");
        let expected =
            BTreeMap::from([("a".to_string(), "h-a".to_string()), ("b".into(), "h-b2".into())]);
        let flagged = store
            .schedule_refresh(&RefreshPolicy::HashMismatch { expected }, Utc::now())
            .unwrap();
        assert_eq!(flagged, vec!["b".to_string()]);
    }

    #[test]
    fn orphans_are_listed_not_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "w0");
        record(&store, "a", "h");
        record(&store, "b", "h");

        let orphans = store.list_orphans(&["a".to_string()]).unwrap();
        assert_eq!(orphans, vec!["b.cassette".to_string()]);
        assert!(dir.path().join("b.cassette").exists());

        let removed = store.remove(&orphans).unwrap();
        assert_eq!(removed, vec!["b.cassette".to_string()]);
        assert!(!dir.path().join("b.cassette").exists());
        assert!(dir.path().join("a.cassette").exists());
    }

    #[test]
    fn remove_refuses_paths_outside_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "w0");
        let removed = store.remove(&["../etc.cassette".to_string(), "notes.txt".into()]).unwrap();
        assert!(removed.is_empty());
    }

    #[test]
    fn file_names_are_filesystem_safe() {
        assert_eq!(cassette_file_name("tests::chat/basic"), "tests%3A%3Achat%2Fbasic.cassette");
        assert_eq!(cassette_file_name("wf-7.step_1"), "wf-7.step_1.cassette");
        assert_eq!(cassette_file_name("50%"), "50%25.cassette");
    }

    #[test]
    fn ids_differing_only_in_unsafe_characters_keep_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "w0");
        store.append("a/b", interaction("/first")).unwrap();
        store.commit(metadata("a/b", "h", Utc::now())).unwrap();
        store.append("a_b", interaction("/second")).unwrap();
        store.commit(metadata("a_b", "h", Utc::now())).unwrap();

        let first = store.open("a/b").unwrap();
        assert_eq!(first.metadata.cassette_id, "a/b");
        assert_eq!(first.interactions[0].uri, "/first");
        assert_eq!(store.open("a_b").unwrap().interactions[0].uri, "/second");
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn open_rejects_a_file_holding_another_cassette() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCassetteStore::new(dir.path(), ExecutionMode::Recording, "w0");
        record(&store, "users", "h");
        fs::copy(store.cassette_path("users"), store.cassette_path("orders")).unwrap();
        assert!(matches!(store.open("orders"), Err(EngineError::Format(_))));
    }
}
