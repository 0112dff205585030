//! Run coordinator: selects units, schedules them, launches workers, and
//! assembles the run report.

use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::live::transport::LiveTransportFactory;
use crate::config::EngineConfig;
use crate::context::WorkerJob;
use crate::error::{EngineError, FailureKind};
use crate::mode::ExecutionMode;
use crate::namespace::RunDirectory;
use crate::ports::transport::TransportFactory;
use crate::report::{RunReport, UnitReport, WorkerReport};
use crate::schedule::{plan, Preset, SuiteManifest, Tier};
use crate::worker::run_worker;

/// Execution trigger of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Record or replay.
    pub mode: ExecutionMode,
    /// Which units to run.
    pub preset: Preset,
    /// Worker count; the configured count when `None`.
    pub workers: Option<usize>,
    /// Abort on the first failed unit.
    pub fail_fast: bool,
}

/// Where workers execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Workers run one after another inside this process.
    InProcess,
    /// Each worker is a `<program> worker --job <file>` child process.
    Subprocess {
        /// Executable to launch.
        program: PathBuf,
    },
}

/// Abort reason recorded when the user interrupts a run.
pub const INTERRUPTED: &str = "interrupted";

/// Coordinates one run over a suite.
pub struct Runner {
    config: EngineConfig,
    manifest: SuiteManifest,
    strategy: Strategy,
    factory: Arc<dyn TransportFactory>,
    handle_interrupts: bool,
}

impl Runner {
    /// Creates an in-process runner sending over the real network.
    #[must_use]
    pub fn new(config: EngineConfig, manifest: SuiteManifest) -> Self {
        let factory = Arc::new(LiveTransportFactory::new(config.timeout()));
        Self {
            config,
            manifest,
            strategy: Strategy::InProcess,
            factory,
            handle_interrupts: false,
        }
    }

    /// Turns ctrl-c into a run abort: workers stop before their next unit
    /// and the partial report is still assembled.
    #[must_use]
    pub fn with_interrupt_handling(mut self) -> Self {
        self.handle_interrupts = true;
        self
    }

    /// Sets the execution strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replaces the network transport used by in-process workers.
    #[must_use]
    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Runs the units selected by `request`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SchedulingViolation`] if the run is refused at
    /// startup, or an I/O error if the run directory cannot be prepared.
    /// Unit failures are reported in the [`RunReport`], not as errors.
    pub async fn run(&self, request: &RunRequest) -> Result<RunReport, EngineError> {
        let started = Instant::now();
        let units = request.preset.select(&self.manifest.units);
        let requested = request.workers.unwrap_or(self.config.workers);
        let schedule = plan(&units, request.mode, requested, self.config.scheduling.strict)?;

        let run_id = Uuid::new_v4().to_string();
        let run_dir = RunDirectory::new(&self.config.cassette_root, &run_id);
        run_dir.claim()?;
        let interrupts = self
            .handle_interrupts
            .then(|| abort_on(run_dir.clone(), tokio::signal::ctrl_c()));
        info!(
            run_id = %run_id,
            mode = %request.mode,
            preset = %request.preset,
            units = units.len(),
            "starting run"
        );

        let mut jobs = Vec::new();
        for worker in schedule.active_workers() {
            let cassettes: Vec<String> = worker
                .groups
                .iter()
                .filter(|g| g.tier == Tier::Integration)
                .map(|g| g.key.clone())
                .collect();
            run_dir.worker(worker.worker).prepare(&cassettes)?;
            jobs.push(WorkerJob {
                run_id: run_id.clone(),
                worker: worker.worker,
                mode: request.mode,
                fail_fast: request.fail_fast,
                config: self.config.clone(),
                groups: worker.groups.clone(),
            });
        }

        let reports = match &self.strategy {
            Strategy::InProcess => self.run_in_process(&jobs).await,
            Strategy::Subprocess { program } => {
                let (program, dir, owned) = (program.clone(), run_dir.clone(), jobs.clone());
                tokio::task::spawn_blocking(move || run_subprocesses(&program, &dir, &owned))
                    .await
                    .unwrap_or_else(|e| {
                        let message = format!("worker wait failed: {e}");
                        jobs.iter().map(|job| crashed(job, &message)).collect()
                    })
            }
        };
        if let Some(interrupts) = interrupts {
            interrupts.abort();
        }

        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut report = RunReport::assemble(
            &run_id,
            request.mode,
            request.preset.as_str(),
            reports,
            schedule.downgraded_from,
            elapsed,
        );
        report.aborted = run_dir.abort_reason();
        run_dir.remove()?;
        info!(
            run_id = %run_id,
            passed = report.totals.passed,
            failed = report.totals.failed,
            skipped = report.totals.skipped,
            "run finished"
        );
        Ok(report)
    }

    async fn run_in_process(&self, jobs: &[WorkerJob]) -> Vec<WorkerReport> {
        let mut reports = Vec::with_capacity(jobs.len());
        for job in jobs {
            let report = match run_worker(job, self.factory.as_ref()).await {
                Ok(report) => report,
                Err(e) => crashed(job, &e.to_string()),
            };
            reports.push(report);
        }
        reports
    }
}

/// Spawns a task that requests a run abort once `signal` resolves.
pub fn abort_on<F>(run_dir: RunDirectory, signal: F) -> JoinHandle<()>
where
    F: Future<Output = io::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match signal.await {
            Ok(()) => {
                warn!(run_id = %run_dir.run_id(), "interrupted; stopping after current units");
                if let Err(e) = run_dir.signal_abort(INTERRUPTED) {
                    error!(error = %e, "failed to record interrupt");
                }
            }
            Err(e) => warn!(error = %e, "interrupt handling unavailable"),
        }
    })
}

fn run_subprocesses(
    program: &Path,
    run_dir: &RunDirectory,
    jobs: &[WorkerJob],
) -> Vec<WorkerReport> {
    let children: Vec<(&WorkerJob, Result<Child, String>)> = jobs
        .iter()
        .map(|job| (job, spawn_worker(program, run_dir, job)))
        .collect();

    children
        .into_iter()
        .map(|(job, child)| {
            let output = child.and_then(|child| {
                child.wait_with_output().map_err(|e| format!("failed to wait for worker: {e}"))
            });
            match output {
                Ok(output) if output.status.success() => {
                    serde_json::from_slice::<WorkerReport>(&output.stdout).unwrap_or_else(|e| {
                        crashed(job, &format!("unreadable worker report: {e}"))
                    })
                }
                Ok(output) => crashed(job, &format!("worker exited with {}", output.status)),
                Err(message) => crashed(job, &message),
            }
        })
        .collect()
}

fn spawn_worker(
    program: &Path,
    run_dir: &RunDirectory,
    job: &WorkerJob,
) -> Result<Child, String> {
    let job_file = run_dir.path().join(format!("worker-{}.job.yaml", job.worker));
    let yaml = serde_yaml::to_string(job).map_err(|e| format!("failed to encode job: {e}"))?;
    fs::write(&job_file, yaml).map_err(|e| format!("failed to write job file: {e}"))?;
    Command::new(program)
        .arg("worker")
        .arg("--job")
        .arg(&job_file)
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| format!("failed to launch worker {}: {e}", job.worker))
}

/// Report for a worker that produced no results: every unit failed.
fn crashed(job: &WorkerJob, message: &str) -> WorkerReport {
    error!(worker = job.worker, message, "worker failed");
    let units = job
        .groups
        .iter()
        .flat_map(|g| &g.units)
        .map(|unit| {
            let mut report = UnitReport::passed(&unit.id, job.worker, unit.tier);
            report.fail(FailureKind::Internal, format!("worker {} failed: {message}", job.worker));
            report
        })
        .collect();
    WorkerReport { worker: job.worker, units, published: Vec::new() }
}
