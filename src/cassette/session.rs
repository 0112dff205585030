//! Recording session spanning one cassette group.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use super::format::CassetteMetadata;
use super::store::{CassetteStore, FileCassetteStore};
use crate::error::EngineError;
use crate::mode::ExecutionMode;
use crate::namespace::WorkerNamespace;
use crate::schedule::WorkGroup;

/// Owns the store a group records into and decides, when the group ends,
/// whether its interactions are committed and published or thrown away.
pub struct RecordingSession {
    store: Arc<FileCassetteStore>,
    namespace: WorkerNamespace,
    cassette_id: String,
    writer: String,
}

impl RecordingSession {
    /// Starts recording `cassette_id` in the worker's namespace.
    #[must_use]
    pub fn begin(namespace: &WorkerNamespace, cassette_id: &str, writer: &str) -> Self {
        let store = FileCassetteStore::with_namespace(
            namespace.path(),
            namespace.root(),
            ExecutionMode::Recording,
            writer,
        );
        Self {
            store: Arc::new(store),
            namespace: namespace.clone(),
            cassette_id: cassette_id.to_string(),
            writer: writer.to_string(),
        }
    }

    /// Store the recording transport appends to.
    #[must_use]
    pub fn store(&self) -> Arc<dyn CassetteStore> {
        self.store.clone()
    }

    /// Commits the staged interactions with metadata derived from `group`,
    /// then publishes the cassette to the root. Returns the published path.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit or the publish fails; nothing reaches
    /// the root in that case.
    pub fn commit(self, group: &WorkGroup) -> Result<PathBuf, EngineError> {
        let (tool, model) = group
            .units
            .first()
            .map(|u| (u.subject.tool.clone(), u.subject.model.clone()))
            .unwrap_or_default();
        let metadata = CassetteMetadata {
            cassette_id: self.cassette_id.clone(),
            content_hash: group.content_hash(),
            recorded_at: Utc::now(),
            subject_tool: tool,
            subject_model: model,
        };
        self.store.commit(metadata)?;
        self.namespace.publish(&self.cassette_id, &self.writer)
    }

    /// Drops everything staged for the group.
    ///
    /// # Errors
    ///
    /// Returns an error if the write lease cannot be released.
    pub fn abandon(self) -> Result<(), EngineError> {
        self.store.discard(&self.cassette_id)
    }
}
