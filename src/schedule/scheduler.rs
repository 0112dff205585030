//! Partitioning of test units across workers.
//!
//! Units sharing a continuation id form one group and always land on the
//! same worker, ordered by step index. Groups are balanced longest-first
//! onto the least-loaded worker. Live groups are pinned to worker 0 so they
//! run serially. Recording admits a single worker.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::tier::Tier;
use super::unit::TestUnit;
use crate::cassette::fingerprint::combined_hash;
use crate::error::EngineError;
use crate::mode::ExecutionMode;

/// Units that must run together on one worker, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkGroup {
    /// Continuation id, or the unit id of an ungrouped unit. Also the
    /// cassette id of integration groups.
    pub key: String,
    /// Highest tier among the group's units.
    pub tier: Tier,
    /// Units ordered by step index, then id.
    pub units: Vec<TestUnit>,
}

impl WorkGroup {
    /// Balancing weight.
    #[must_use]
    pub fn weight(&self) -> usize {
        self.units.len()
    }

    /// Content hash of the group's cassette.
    #[must_use]
    pub fn content_hash(&self) -> String {
        match self.units.as_slice() {
            [single] if single.continuation.is_none() => single.subject.content_hash(),
            units => {
                let hashes: Vec<String> = units.iter().map(|u| u.subject.content_hash()).collect();
                combined_hash(hashes.iter().map(String::as_str))
            }
        }
    }
}

/// Grouping key to worker index. Built once, never revised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAssignment(BTreeMap<String, usize>);

impl WorkerAssignment {
    /// Worker assigned to `key`.
    #[must_use]
    pub fn worker_for(&self, key: &str) -> Option<usize> {
        self.0.get(key).copied()
    }

    /// Number of assigned groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing was assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates `(key, worker)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(k, w)| (k.as_str(), *w))
    }
}

/// Groups assigned to one worker, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPlan {
    /// Worker index.
    pub worker: usize,
    /// Groups to run.
    pub groups: Vec<WorkGroup>,
}

impl WorkerPlan {
    /// Total weight of the plan.
    #[must_use]
    pub fn load(&self) -> usize {
        self.groups.iter().map(WorkGroup::weight).sum()
    }
}

/// Outcome of scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    /// One plan per worker; some may be empty.
    pub workers: Vec<WorkerPlan>,
    /// Key to worker mapping.
    pub assignment: WorkerAssignment,
    /// Worker count asked for, when it was reduced for recording.
    pub downgraded_from: Option<usize>,
}

impl Schedule {
    /// Plans that have at least one group.
    pub fn active_workers(&self) -> impl Iterator<Item = &WorkerPlan> {
        self.workers.iter().filter(|w| !w.groups.is_empty())
    }
}

/// Groups units by continuation id and orders each group.
#[must_use]
pub fn group_units(units: &[TestUnit]) -> Vec<WorkGroup> {
    let mut groups: BTreeMap<&str, Vec<TestUnit>> = BTreeMap::new();
    for unit in units {
        groups.entry(unit.group_key()).or_default().push(unit.clone());
    }
    groups
        .into_iter()
        .map(|(key, mut units)| {
            units.sort_by(|a, b| a.step_index().cmp(&b.step_index()).then_with(|| a.id.cmp(&b.id)));
            let tier = units.iter().map(|u| u.tier).max().unwrap_or_default();
            WorkGroup { key: key.to_string(), tier, units }
        })
        .collect()
}

/// Applies the serial-recording rule to a requested worker count.
///
/// # Errors
///
/// Returns [`EngineError::SchedulingViolation`] when recording with more
/// than one worker under `strict`, or when no worker is requested.
pub fn effective_workers(
    mode: ExecutionMode,
    requested: usize,
    strict: bool,
) -> Result<usize, EngineError> {
    if requested == 0 {
        return Err(EngineError::SchedulingViolation("at least one worker is required".into()));
    }
    match mode.max_workers() {
        Some(max) if requested > max => {
            if strict {
                return Err(EngineError::SchedulingViolation(format!(
                    "{mode} mode admits at most {max} worker, {requested} requested"
                )));
            }
            warn!(requested, allowed = max, %mode, "reducing worker count for recording");
            Ok(max)
        }
        _ => Ok(requested),
    }
}

/// Partitions `units` across workers.
///
/// Identical input always yields an identical schedule.
///
/// # Errors
///
/// Returns [`EngineError::SchedulingViolation`] as described for
/// [`effective_workers`].
pub fn plan(
    units: &[TestUnit],
    mode: ExecutionMode,
    requested_workers: usize,
    strict: bool,
) -> Result<Schedule, EngineError> {
    let count = effective_workers(mode, requested_workers, strict)?;

    let mut workers: Vec<WorkerPlan> =
        (0..count).map(|worker| WorkerPlan { worker, groups: Vec::new() }).collect();
    let mut loads = vec![0usize; count];
    let mut assignment = BTreeMap::new();

    // Live groups run serially on one pinned worker.
    let (live, mut rest): (Vec<WorkGroup>, Vec<WorkGroup>) =
        group_units(units).into_iter().partition(|g| g.tier == Tier::Live);
    for group in live {
        loads[0] += group.weight();
        assignment.insert(group.key.clone(), 0);
        workers[0].groups.push(group);
    }

    rest.sort_by(|a, b| b.weight().cmp(&a.weight()).then_with(|| a.key.cmp(&b.key)));
    for group in rest {
        let target = loads
            .iter()
            .enumerate()
            .min_by(|(ia, la), (ib, lb)| la.cmp(lb).then_with(|| ia.cmp(ib)))
            .map_or(0, |(index, _)| index);
        loads[target] += group.weight();
        assignment.insert(group.key.clone(), target);
        workers[target].groups.push(group);
    }

    info!(
        %mode,
        workers = count,
        groups = assignment.len(),
        units = units.len(),
        "scheduled run"
    );
    Ok(Schedule {
        workers,
        assignment: WorkerAssignment(assignment),
        downgraded_from: (count < requested_workers).then_some(requested_workers),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::unit::WorkflowContinuation;

    fn unit(id: &str) -> TestUnit {
        TestUnit { id: id.into(), ..TestUnit::default() }
    }

    fn step(id: &str, workflow: &str, index: u32) -> TestUnit {
        TestUnit {
            id: id.into(),
            continuation: Some(WorkflowContinuation {
                continuation_id: workflow.into(),
                step_index: index,
            }),
            ..TestUnit::default()
        }
    }

    #[test]
    fn workflow_steps_share_a_worker_in_step_order() {
        let units = vec![step("b", "wf", 1), unit("x"), step("a", "wf", 0), unit("y")];
        let schedule = plan(&units, ExecutionMode::Replaying, 3, false).unwrap();
        let worker = schedule.assignment.worker_for("wf").unwrap();
        let group = schedule.workers[worker].groups.iter().find(|g| g.key == "wf").unwrap();
        let ids: Vec<&str> = group.units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn balancing_is_longest_first_and_stable() {
        let units = vec![
            step("w1", "big", 0),
            step("w2", "big", 1),
            step("w3", "big", 2),
            unit("a"),
            unit("b"),
            unit("c"),
        ];
        let first = plan(&units, ExecutionMode::Replaying, 2, false).unwrap();
        assert_eq!(first.assignment.worker_for("big"), Some(0));
        assert_eq!(first.assignment.worker_for("a"), Some(1));
        assert_eq!(first.assignment.worker_for("b"), Some(1));
        assert_eq!(first.assignment.worker_for("c"), Some(1));

        let mut reversed = units.clone();
        reversed.reverse();
        let second = plan(&reversed, ExecutionMode::Replaying, 2, false).unwrap();
        assert_eq!(first.assignment, second.assignment);
    }

    #[test]
    fn recording_downgrades_to_one_worker() {
        let units = vec![unit("a"), unit("b")];
        let schedule = plan(&units, ExecutionMode::Recording, 4, false).unwrap();
        assert_eq!(schedule.workers.len(), 1);
        assert_eq!(schedule.downgraded_from, Some(4));
        assert_eq!(schedule.workers[0].load(), 2);
    }

    #[test]
    fn strict_recording_refuses_parallelism() {
        let err = plan(&[unit("a")], ExecutionMode::Recording, 2, true).unwrap_err();
        assert!(matches!(err, EngineError::SchedulingViolation(_)));
        assert!(plan(&[unit("a")], ExecutionMode::Recording, 1, true).is_ok());
    }

    #[test]
    fn live_units_are_pinned_together() {
        let mut live_a = unit("live-a");
        live_a.tier = Tier::Live;
        let mut live_b = unit("live-b");
        live_b.tier = Tier::Live;
        let units = vec![live_a, unit("x"), live_b, unit("y")];
        let schedule = plan(&units, ExecutionMode::Replaying, 3, false).unwrap();
        assert_eq!(schedule.assignment.worker_for("live-a"), Some(0));
        assert_eq!(schedule.assignment.worker_for("live-b"), Some(0));
        assert_eq!(schedule.workers[0].groups.iter().filter(|g| g.tier == Tier::Live).count(), 2);
    }

    #[test]
    fn zero_workers_is_refused() {
        assert!(plan(&[unit("a")], ExecutionMode::Replaying, 0, false).is_err());
    }

    #[test]
    fn workflow_hash_differs_from_its_steps() {
        let group = group_units(&[step("a", "wf", 0)]).remove(0);
        assert_ne!(group.content_hash(), group.units[0].subject.content_hash());
    }
}
