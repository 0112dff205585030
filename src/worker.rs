//! Execution of one worker's share of a run.
//!
//! Groups run in assigned order, units within a group in step order. The
//! abort sentinel is checked before every unit. A failing unit aborts the
//! run when fail-fast is on or when its failure kind is run-fatal.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::adapters::clients::AdapterRegistry;
use crate::adapters::recording::transport::RecordingTransport;
use crate::adapters::replaying::transport::ReplayingTransport;
use crate::cassette::matcher::Matcher;
use crate::cassette::session::RecordingSession;
use crate::cassette::store::{CassetteStore, FileCassetteStore, Freshness};
use crate::context::{RunContext, WorkerJob};
use crate::error::EngineError;
use crate::interceptor::Interceptor;
use crate::mode::{ExecutionMode, ModeController};
use crate::ports::transport::TransportFactory;
use crate::report::{UnitReport, UnitStatus, WorkerReport};
use crate::schedule::{Tier, WorkGroup};

/// Runs every group of `job` and reports per-unit results.
///
/// # Errors
///
/// Returns an error only when the worker cannot start at all, such as an
/// invalid match pattern or an unwritable namespace.
pub async fn run_worker(
    job: &WorkerJob,
    factory: &dyn TransportFactory,
) -> Result<WorkerReport, EngineError> {
    let ctx = RunContext::for_job(job);
    // Reject invalid patterns before any unit runs.
    Matcher::new(&ctx.config.matching)?;
    let executor = GroupExecutor {
        registry: Arc::new(AdapterRegistry::with_defaults()),
        factory,
        ctx: &ctx,
    };
    std::fs::create_dir_all(ctx.namespace.path())?;
    info!(worker = ctx.worker, groups = job.groups.len(), mode = %ctx.mode, "worker started");

    let mut report = WorkerReport { worker: ctx.worker, ..WorkerReport::default() };
    for group in &job.groups {
        executor.run_group(group, &mut report).await;
    }

    let failed = report.units.iter().filter(|u| u.status == UnitStatus::Failed).count();
    info!(worker = ctx.worker, units = report.units.len(), failed, "worker finished");
    Ok(report)
}

struct GroupExecutor<'a> {
    registry: Arc<AdapterRegistry>,
    factory: &'a dyn TransportFactory,
    ctx: &'a RunContext,
}

impl GroupExecutor<'_> {
    async fn run_group(&self, group: &WorkGroup, report: &mut WorkerReport) {
        match group.tier {
            Tier::Unit => self.run_unit_tier(group, report),
            Tier::Live => {
                let controller = Arc::new(match self.factory.connect() {
                    Ok(transport) => ModeController::live(transport),
                    Err(e) => ModeController::failed(ExecutionMode::Recording, &e),
                });
                self.run_steps(group, &controller, &[], report).await;
            }
            Tier::Integration => match self.ctx.mode {
                ExecutionMode::Replaying => self.replay_group(group, report).await,
                ExecutionMode::Recording => self.record_group(group, report).await,
            },
        }
    }

    fn run_unit_tier(&self, group: &WorkGroup, report: &mut WorkerReport) {
        for unit in &group.units {
            if let Some(reason) = self.ctx.run_dir.abort_reason() {
                let skipped = UnitReport::skipped(&unit.id, self.ctx.worker, unit.tier, &reason);
                report.units.push(skipped);
                continue;
            }
            let mut result = UnitReport::passed(&unit.id, self.ctx.worker, unit.tier);
            if !unit.calls.is_empty() {
                result.fail_with(&EngineError::ModeViolation(format!(
                    "unit-tier test {} issues {} outbound call(s)",
                    unit.id,
                    unit.calls.len()
                )));
            }
            self.finish_unit(&result);
            report.units.push(result);
        }
    }

    async fn replay_group(&self, group: &WorkGroup, report: &mut WorkerReport) {
        let store = FileCassetteStore::with_namespace(
            self.ctx.namespace.path(),
            self.ctx.namespace.root(),
            ExecutionMode::Replaying,
            self.ctx.writer(),
        );
        let mut warnings = Vec::new();
        let controller = Arc::new(match self.replay_transport(&store, group, &mut warnings) {
            Ok(transport) => ModeController::new(ExecutionMode::Replaying, Box::new(transport)),
            Err(e) => ModeController::failed(ExecutionMode::Replaying, &e),
        });
        self.run_steps(group, &controller, &warnings, report).await;
    }

    fn replay_transport(
        &self,
        store: &FileCassetteStore,
        group: &WorkGroup,
        warnings: &mut Vec<String>,
    ) -> Result<ReplayingTransport, EngineError> {
        let cassette = store.open(&group.key)?;
        let freshness = store.verify_freshness(&cassette, &group.content_hash())?;
        if let Freshness::Stale { reason } = freshness {
            let stale = EngineError::StaleCassette { cassette_id: group.key.clone(), reason };
            if self.ctx.config.staleness.fatal {
                return Err(stale);
            }
            warn!(cassette_id = %group.key, %stale, "replaying stale cassette");
            warnings.push(stale.to_string());
        }
        let matcher = Matcher::new(&self.ctx.config.matching)?;
        Ok(ReplayingTransport::new(cassette, matcher, self.ctx.config.sanitize.clone()))
    }

    async fn record_group(&self, group: &WorkGroup, report: &mut WorkerReport) {
        let writer = self.ctx.writer();
        let session = RecordingSession::begin(&self.ctx.namespace, &group.key, &writer);
        let controller = Arc::new(match self.factory.connect() {
            Ok(inner) => ModeController::new(
                ExecutionMode::Recording,
                Box::new(RecordingTransport::new(
                    inner,
                    session.store(),
                    group.key.clone(),
                    self.ctx.config.sanitize.clone(),
                )),
            ),
            Err(e) => ModeController::failed(ExecutionMode::Recording, &e),
        });

        let first = report.units.len();
        self.run_steps(group, &controller, &[], report).await;

        let all_passed = report.units[first..].iter().all(|u| u.status == UnitStatus::Passed);
        if all_passed {
            match session.commit(group) {
                Ok(_) => report.published.push(group.key.clone()),
                Err(e) => {
                    if let Some(last) = report.units[first..].last_mut() {
                        last.fail_with(&e);
                        self.finish_unit(last);
                    }
                }
            }
        } else if let Err(e) = session.abandon() {
            warn!(cassette_id = %group.key, error = %e, "failed to discard recording");
        }
    }

    async fn run_steps(
        &self,
        group: &WorkGroup,
        controller: &Arc<ModeController>,
        warnings: &[String],
        report: &mut WorkerReport,
    ) {
        let interceptor = Interceptor::new(self.registry.clone(), controller.clone());
        let mut earlier_failed = false;
        for unit in &group.units {
            if let Some(reason) = self.ctx.run_dir.abort_reason() {
                let skipped = UnitReport::skipped(&unit.id, self.ctx.worker, unit.tier, &reason);
                report.units.push(skipped);
                continue;
            }
            if earlier_failed {
                report.units.push(UnitReport::skipped(
                    &unit.id,
                    self.ctx.worker,
                    unit.tier,
                    &format!("an earlier step of workflow {} failed", group.key),
                ));
                continue;
            }

            let started = Instant::now();
            let before = controller.stats();
            let mut result = UnitReport::passed(&unit.id, self.ctx.worker, unit.tier);
            result.warnings = warnings.to_vec();

            if let Some((kind, message)) = controller.failure() {
                result.fail(kind, message);
            } else {
                for call in unit.resolved_calls() {
                    if let Err(e) = interceptor.intercept(&call).await {
                        result.fail_with(&e);
                        break;
                    }
                }
            }

            result.stats = controller.stats().since(before);
            result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            earlier_failed = result.status == UnitStatus::Failed;
            self.finish_unit(&result);
            report.units.push(result);
        }
    }

    fn finish_unit(&self, result: &UnitReport) {
        if result.status != UnitStatus::Failed {
            return;
        }
        let reason = if result.is_run_fatal() {
            format!("unit {} failed with {}", result.id, result.kind.map_or("", |k| k.as_str()))
        } else if self.ctx.fail_fast {
            format!("unit {} failed (fail-fast)", result.id)
        } else {
            return;
        };
        if let Err(e) = self.ctx.run_dir.signal_abort(&reason) {
            warn!(error = %e, "failed to write abort sentinel");
        }
    }
}
