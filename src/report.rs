//! Per-unit results and the aggregated run report.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, FailureKind};
use crate::mode::{CallStats, ExecutionMode};
use crate::schedule::Tier;

/// How a unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    /// Every call succeeded.
    Passed,
    /// A call failed.
    Failed,
    /// Not run: the run was aborted or an earlier workflow step failed.
    Skipped,
}

impl UnitStatus {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Result of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
    /// Unit id.
    pub id: String,
    /// Worker that ran the unit.
    pub worker: usize,
    /// Unit tier.
    pub tier: Tier,
    /// Outcome.
    pub status: UnitStatus,
    /// Failure kind, for failed units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    /// Failure or skip message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Suggested fix, for failures that have one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    /// Non-fatal findings such as a stale cassette.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
    /// Call counters.
    #[serde(default)]
    pub stats: CallStats,
}

impl UnitReport {
    /// A passing report.
    #[must_use]
    pub fn passed(id: &str, worker: usize, tier: Tier) -> Self {
        Self {
            id: id.to_string(),
            worker,
            tier,
            status: UnitStatus::Passed,
            kind: None,
            message: None,
            remediation: None,
            warnings: Vec::new(),
            duration_ms: 0,
            stats: CallStats::default(),
        }
    }

    /// A skipped report with the reason.
    #[must_use]
    pub fn skipped(id: &str, worker: usize, tier: Tier, reason: &str) -> Self {
        Self {
            status: UnitStatus::Skipped,
            message: Some(reason.to_string()),
            ..Self::passed(id, worker, tier)
        }
    }

    /// Marks the report failed with `kind` and `message`.
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) {
        self.status = UnitStatus::Failed;
        self.kind = Some(kind);
        self.message = Some(message.into());
        self.remediation = kind.remediation().map(String::from);
    }

    /// Marks the report failed with `error`.
    pub fn fail_with(&mut self, error: &EngineError) {
        self.fail(error.kind(), error.to_string());
    }

    /// Returns `true` if the failure invalidates the whole run.
    #[must_use]
    pub fn is_run_fatal(&self) -> bool {
        self.kind.is_some_and(FailureKind::is_run_fatal)
    }
}

/// Everything one worker reports back to the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Worker index.
    pub worker: usize,
    /// Unit results in execution order.
    pub units: Vec<UnitReport>,
    /// Cassette ids published to the root.
    #[serde(default)]
    pub published: Vec<String>,
}

/// Aggregate counters of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    /// Units that passed.
    pub passed: usize,
    /// Units that failed.
    pub failed: usize,
    /// Units that were skipped.
    pub skipped: usize,
    /// Replay hits.
    pub hits: u32,
    /// Replay misses.
    pub misses: u32,
    /// Interactions recorded.
    pub recorded: u32,
    /// Calls sent to the real network by live units.
    pub live: u32,
    /// Wall time of the run in milliseconds.
    pub duration_ms: u64,
}

/// Result of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run id.
    pub run_id: String,
    /// Execution mode.
    pub mode: ExecutionMode,
    /// Preset name.
    pub preset: String,
    /// Workers actually used.
    pub workers: usize,
    /// Worker count asked for, when recording forced a reduction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downgraded_from: Option<usize>,
    /// Every unit result, ordered by worker then execution order.
    pub units: Vec<UnitReport>,
    /// Cassettes written to the root during the run.
    #[serde(default)]
    pub published: Vec<String>,
    /// Why the run was aborted, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    /// Aggregate counters.
    pub totals: RunTotals,
}

impl RunReport {
    /// Merges worker reports into a run report.
    #[must_use]
    pub fn assemble(
        run_id: &str,
        mode: ExecutionMode,
        preset: &str,
        mut workers: Vec<WorkerReport>,
        downgraded_from: Option<usize>,
        duration_ms: u64,
    ) -> Self {
        workers.sort_by_key(|w| w.worker);
        let worker_count = workers.len();
        let mut units = Vec::new();
        let mut published = Vec::new();
        for report in workers {
            units.extend(report.units);
            published.extend(report.published);
        }

        let mut totals = RunTotals { duration_ms, ..RunTotals::default() };
        for unit in &units {
            match unit.status {
                UnitStatus::Passed => totals.passed += 1,
                UnitStatus::Failed => totals.failed += 1,
                UnitStatus::Skipped => totals.skipped += 1,
            }
            totals.hits += unit.stats.hits;
            totals.misses += unit.stats.misses;
            totals.recorded += unit.stats.recorded;
            totals.live += unit.stats.live;
        }

        Self {
            run_id: run_id.to_string(),
            mode,
            preset: preset.to_string(),
            workers: worker_count,
            downgraded_from,
            units,
            published,
            aborted: None,
            totals,
        }
    }

    /// Returns `true` if no unit failed and the run was not aborted.
    #[must_use]
    pub fn success(&self) -> bool {
        self.totals.failed == 0 && self.aborted.is_none()
    }

    /// Renders the report as an aligned table followed by a summary.
    #[must_use]
    pub fn render_table(&self) -> String {
        let rows: Vec<[String; 5]> = self
            .units
            .iter()
            .map(|u| {
                [
                    u.id.clone(),
                    u.worker.to_string(),
                    u.status.as_str().to_string(),
                    u.kind.map_or_else(|| "-".to_string(), |k| k.to_string()),
                    format!("{}ms", u.duration_ms),
                ]
            })
            .collect();

        // Calculate column widths.
        let headers = ["ID", "WORKER", "STATUS", "KIND", "DURATION"];
        let mut widths = headers.map(str::len);
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
        }
        let [w0, w1, w2, w3, w4] = widths;

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<w0$}  {:<w1$}  {:<w2$}  {:<w3$}  {:<w4$}",
            headers[0], headers[1], headers[2], headers[3], headers[4]
        );
        let _ = writeln!(
            out,
            "{:-<w0$}  {:-<w1$}  {:-<w2$}  {:-<w3$}  {:-<w4$}",
            "", "", "", "", ""
        );
        for [id, worker, status, kind, duration] in &rows {
            let _ = writeln!(
                out,
                "{id:<w0$}  {worker:<w1$}  {status:<w2$}  {kind:<w3$}  {duration:<w4$}"
            );
        }

        let notable =
            self.units.iter().filter(|u| u.status != UnitStatus::Passed || !u.warnings.is_empty());
        for unit in notable {
            if let Some(message) = &unit.message {
                let _ = writeln!(out, "\n{}: {message}", unit.id);
            }
            if let Some(remediation) = &unit.remediation {
                let _ = writeln!(out, "  hint: {remediation}");
            }
            for warning in &unit.warnings {
                let _ = writeln!(out, "\n{}: warning: {warning}", unit.id);
            }
        }

        let t = &self.totals;
        let _ = writeln!(
            out,
            "\n{} passed, {} failed, {} skipped in {}ms ({} mode, preset {}, {} worker(s))",
            t.passed, t.failed, t.skipped, t.duration_ms, self.mode, self.preset, self.workers
        );
        let _ = writeln!(
            out,
            "calls: {} hit, {} miss, {} recorded, {} live",
            t.hits, t.misses, t.recorded, t.live
        );
        if let Some(requested) = self.downgraded_from {
            let _ = writeln!(out, "note: {requested} workers requested; recording runs on one");
        }
        if let Some(reason) = &self.aborted {
            let _ = writeln!(out, "run aborted: {reason}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(index: usize, units: Vec<UnitReport>) -> WorkerReport {
        WorkerReport { worker: index, units, published: vec![] }
    }

    #[test]
    fn assemble_totals_and_orders_by_worker() {
        let mut failed = UnitReport::passed("b", 1, Tier::Integration);
        failed.fail(FailureKind::NoMatch, "no match for GET /users/2");
        let mut hit = UnitReport::passed("a", 0, Tier::Integration);
        hit.stats.hits = 2;

        let report = RunReport::assemble(
            "r1",
            ExecutionMode::Replaying,
            "fast",
            vec![worker(1, vec![failed]), worker(0, vec![hit])],
            None,
            12,
        );
        assert_eq!(report.units[0].id, "a");
        assert_eq!(report.totals.passed, 1);
        assert_eq!(report.totals.failed, 1);
        assert_eq!(report.totals.hits, 2);
        assert!(!report.success());
        assert!(report.units[1].remediation.as_deref().unwrap().contains("--mode record"));
    }

    #[test]
    fn table_lists_units_and_hints() {
        let mut failed = UnitReport::passed("users.missing", 0, Tier::Integration);
        failed.fail(FailureKind::MissingCassette, "cassette users.missing not found");
        let report = RunReport::assemble(
            "r1",
            ExecutionMode::Replaying,
            "integration",
            vec![worker(0, vec![UnitReport::passed("users.get", 0, Tier::Integration), failed])],
            None,
            5,
        );
        let table = report.render_table();
        let mut lines = table.lines();
        assert!(lines.next().unwrap().starts_with("ID"));
        assert!(lines.next().unwrap().starts_with("---"));
        assert!(table.contains("users.get"));
        assert!(table.contains("missing_cassette"));
        assert!(table.contains("hint: re-record"));
        assert!(table.contains("1 passed, 1 failed, 0 skipped"));
    }

    #[test]
    fn json_omits_empty_fields() {
        let json = serde_json::to_string(&UnitReport::passed("a", 0, Tier::Unit)).unwrap();
        assert!(!json.contains("kind"));
        assert!(json.contains("\"status\":\"passed\""));
    }
}
