//! Tier classification, suite manifests, and worker scheduling.

pub mod scheduler;
pub mod tier;
pub mod unit;

pub use scheduler::{plan, Schedule, WorkGroup, WorkerAssignment, WorkerPlan};
pub use tier::{Preset, Tier};
pub use unit::{SuiteManifest, TestUnit, WorkflowContinuation};
