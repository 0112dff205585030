//! Run context threaded through every component of a worker.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::mode::ExecutionMode;
use crate::namespace::{RunDirectory, WorkerNamespace};
use crate::schedule::WorkGroup;

/// Everything a worker process needs to execute its share of a run.
///
/// The coordinator writes one job file per worker; `reel worker` reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerJob {
    /// Run id shared by every worker.
    pub run_id: String,
    /// Worker index.
    pub worker: usize,
    /// Run-wide execution mode.
    pub mode: ExecutionMode,
    /// Abort the run on the first failed unit.
    #[serde(default)]
    pub fail_fast: bool,
    /// Engine configuration of the run.
    pub config: EngineConfig,
    /// Groups to execute, in order.
    pub groups: Vec<WorkGroup>,
}

/// Bundles the run-wide settings a worker passes to each component.
///
/// Built once per worker from its [`WorkerJob`]; nothing here changes while
/// the worker runs.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Run id.
    pub run_id: String,
    /// Worker index.
    pub worker: usize,
    /// Execution mode, fixed for the run.
    pub mode: ExecutionMode,
    /// Abort on first failure.
    pub fail_fast: bool,
    /// Engine configuration.
    pub config: Arc<EngineConfig>,
    /// Run scratch directory holding the abort sentinel.
    pub run_dir: RunDirectory,
    /// This worker's cassette namespace.
    pub namespace: WorkerNamespace,
}

impl RunContext {
    /// Creates the context for `job`.
    #[must_use]
    pub fn for_job(job: &WorkerJob) -> Self {
        let run_dir = RunDirectory::new(&job.config.cassette_root, &job.run_id);
        let namespace = run_dir.worker(job.worker);
        Self {
            run_id: job.run_id.clone(),
            worker: job.worker,
            mode: job.mode,
            fail_fast: job.fail_fast,
            config: Arc::new(job.config.clone()),
            run_dir,
            namespace,
        }
    }

    /// Identity written into write leases and temp file names.
    #[must_use]
    pub fn writer(&self) -> String {
        format!("{}/worker-{}", self.run_id, self.worker)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn context_derives_paths_from_the_job() {
        let job = WorkerJob {
            run_id: "r1".into(),
            worker: 3,
            mode: ExecutionMode::Replaying,
            fail_fast: false,
            config: EngineConfig {
                cassette_root: PathBuf::from("/tmp/c"),
                ..EngineConfig::default()
            },
            groups: vec![],
        };
        let ctx = RunContext::for_job(&job);
        assert_eq!(ctx.writer(), "r1/worker-3");
        assert_eq!(ctx.namespace.path(), PathBuf::from("/tmp/c/.reel/runs/r1/worker-3"));
    }

    #[test]
    fn job_survives_a_yaml_round_trip() {
        let job = WorkerJob {
            run_id: "r1".into(),
            worker: 0,
            mode: ExecutionMode::Recording,
            fail_fast: true,
            config: EngineConfig::default(),
            groups: vec![],
        };
        let yaml = serde_yaml::to_string(&job).unwrap();
        assert_eq!(serde_yaml::from_str::<WorkerJob>(&yaml).unwrap(), job);
    }
}
