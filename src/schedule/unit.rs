//! Test units and the suite manifest that declares them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::tier::Tier;
use crate::cassette::fingerprint::SubjectInputs;
use crate::error::EngineError;
use crate::ports::client::OutgoingCall;

/// Links a unit to the other steps of a multi-call workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowContinuation {
    /// Shared by every step of the workflow.
    pub continuation_id: String,
    /// Position of this step within the workflow.
    pub step_index: u32,
}

/// One schedulable test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestUnit {
    /// Unique id; also the cassette id of an ungrouped unit.
    pub id: String,
    /// Network tier.
    #[serde(default)]
    pub tier: Tier,
    /// Free-form tags (`slow` excludes the unit from the `fast` preset).
    #[serde(default)]
    pub tags: Vec<String>,
    /// Workflow membership, if any.
    #[serde(default)]
    pub continuation: Option<WorkflowContinuation>,
    /// Inputs hashed into the cassette's content hash.
    #[serde(default)]
    pub subject: SubjectInputs,
    /// Outbound calls issued in order.
    #[serde(default)]
    pub calls: Vec<OutgoingCall>,
}

impl TestUnit {
    /// Key grouping this unit with the other steps of its workflow.
    #[must_use]
    pub fn group_key(&self) -> &str {
        self.continuation.as_ref().map_or(self.id.as_str(), |c| c.continuation_id.as_str())
    }

    /// Step position inside the workflow; `0` for ungrouped units.
    #[must_use]
    pub fn step_index(&self) -> u32 {
        self.continuation.as_ref().map_or(0, |c| c.step_index)
    }

    /// Returns `true` if the unit carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Calls with `$VAR` API keys resolved from the environment.
    #[must_use]
    pub fn resolved_calls(&self) -> Vec<OutgoingCall> {
        self.calls
            .iter()
            .cloned()
            .map(|call| match call {
                OutgoingCall::Completion(mut c) => {
                    if let Some(var) = c.api_key.strip_prefix('$') {
                        c.api_key = std::env::var(var).unwrap_or_default();
                    }
                    OutgoingCall::Completion(c)
                }
                http @ OutgoingCall::Http(_) => http,
            })
            .collect()
    }
}

/// YAML list of the units in a suite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteManifest {
    /// Declared units, in file order.
    #[serde(default)]
    pub units: Vec<TestUnit>,
}

impl SuiteManifest {
    /// Reads and validates a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Manifest`] if the file is missing, malformed,
    /// or fails validation.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Manifest(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
            .map_err(|e| EngineError::Manifest(format!("{}: {e}", path.display())))
    }

    /// Parses and validates a manifest document.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Manifest`] if the document is malformed or
    /// fails validation.
    pub fn from_yaml(content: &str) -> Result<Self, EngineError> {
        let manifest: Self =
            serde_yaml::from_str(content).map_err(|e| EngineError::Manifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Checks id uniqueness and workflow consistency: every workflow name is
    /// distinct from the ungrouped unit ids, its step indexes are unique, and
    /// all of its steps share one tier.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Manifest`] describing the first problem found.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut ids = BTreeSet::new();
        let mut steps: BTreeMap<&str, BTreeSet<u32>> = BTreeMap::new();
        let mut tiers: BTreeMap<&str, (&str, Tier)> = BTreeMap::new();
        for unit in &self.units {
            if unit.id.trim().is_empty() {
                return Err(EngineError::Manifest("unit with empty id".into()));
            }
            if !ids.insert(unit.id.as_str()) {
                return Err(EngineError::Manifest(format!("duplicate unit id '{}'", unit.id)));
            }
            let Some(c) = &unit.continuation else {
                continue;
            };
            if !steps.entry(c.continuation_id.as_str()).or_default().insert(c.step_index) {
                return Err(EngineError::Manifest(format!(
                    "workflow '{}' has two steps at index {}",
                    c.continuation_id, c.step_index
                )));
            }
            let (first, tier) =
                *tiers.entry(c.continuation_id.as_str()).or_insert((unit.id.as_str(), unit.tier));
            if tier != unit.tier {
                return Err(EngineError::Manifest(format!(
                    "workflow '{}' mixes tiers: '{first}' is {tier}, '{}' is {}",
                    c.continuation_id, unit.id, unit.tier
                )));
            }
        }

        if let Some(unit) = self
            .units
            .iter()
            .find(|u| u.continuation.is_none() && steps.contains_key(u.id.as_str()))
        {
            return Err(EngineError::Manifest(format!(
                "unit id '{}' is also the name of a workflow; both would share one cassette",
                unit.id
            )));
        }
        Ok(())
    }

    /// Cassette ids this suite can produce: one per ungrouped integration
    /// unit and one per workflow.
    #[must_use]
    pub fn cassette_ids(&self) -> Vec<String> {
        let ids: BTreeSet<&str> = self
            .units
            .iter()
            .filter(|u| u.tier == Tier::Integration)
            .map(TestUnit::group_key)
            .collect();
        ids.into_iter().map(String::from).collect()
    }
}
