//! Engine error taxonomy and the failure-kind tags attached to unit reports.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the recording and replay engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No stored interaction satisfied the active match criteria.
    #[error("no recorded interaction matches {method} {uri} in cassette {cassette_id}")]
    NoMatch {
        /// Cassette that was searched.
        cassette_id: String,
        /// Method of the live request.
        method: String,
        /// URI of the live request.
        uri: String,
    },
    /// Another worker already holds the write lease on this cassette.
    #[error("cassette {cassette_id} is already leased for writing by {holder}")]
    StoreWriteConflict {
        /// Cassette being written.
        cassette_id: String,
        /// Lease holder recorded on disk.
        holder: String,
    },
    /// A configured sensitive field could not be confirmed redacted.
    #[error("sanitization incomplete: {0}")]
    SanitizationIncomplete(String),
    /// The cassette no longer reflects the inputs that should produce it.
    #[error("cassette {cassette_id} is stale: {reason}")]
    StaleCassette {
        /// Stale cassette.
        cassette_id: String,
        /// Why the cassette is considered stale.
        reason: String,
    },
    /// The requested run would record with more than one worker.
    #[error("scheduling violation: {0}")]
    SchedulingViolation(String),
    /// The unit already failed; later calls report the original failure.
    #[error("unit already failed ({kind}): {message}")]
    UnitFailed {
        /// Kind of the original failure.
        kind: FailureKind,
        /// Message of the original failure.
        message: String,
    },
    /// No cassette exists for the requested id.
    #[error("cassette {0} not found")]
    CassetteNotFound(String),
    /// An operation was attempted in a mode that does not permit it.
    #[error("{0}")]
    ModeViolation(String),
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(String),
    /// A cassette or index file could not be (de)serialized.
    #[error("format error: {0}")]
    Format(String),
    /// The underlying network call failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// A client adapter could not translate a call or response.
    #[error("adapter error: {0}")]
    Adapter(String),
    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid suite manifest.
    #[error("manifest error: {0}")]
    Manifest(String),
}

impl EngineError {
    /// Returns the failure-kind tag reported for this error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NoMatch { .. } => FailureKind::NoMatch,
            Self::StoreWriteConflict { .. } => FailureKind::StoreWriteConflict,
            Self::SanitizationIncomplete(_) => FailureKind::SanitizationIncomplete,
            Self::StaleCassette { .. } => FailureKind::StaleCassette,
            Self::SchedulingViolation(_) => FailureKind::SchedulingViolation,
            Self::CassetteNotFound(_) => FailureKind::MissingCassette,
            Self::Transport(_) => FailureKind::Transport,
            Self::UnitFailed { kind, .. } => *kind,
            Self::ModeViolation(_)
            | Self::Io(_)
            | Self::Format(_)
            | Self::Adapter(_)
            | Self::Config(_)
            | Self::Manifest(_) => FailureKind::Internal,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Format(err.to_string())
    }
}

/// Tag naming why a unit failed, carried in unit reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Replay lookup failed.
    NoMatch,
    /// Replay requested a cassette that does not exist.
    MissingCassette,
    /// Concurrent write lease detected.
    StoreWriteConflict,
    /// Sanitization could not complete.
    SanitizationIncomplete,
    /// Cassette content hash or refresh mark says the cassette is stale.
    StaleCassette,
    /// Parallel recording was attempted.
    SchedulingViolation,
    /// Live network call failed while recording.
    Transport,
    /// Anything else (I/O, format, configuration).
    Internal,
}

impl FailureKind {
    /// Returns the stable snake_case name of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoMatch => "no_match",
            Self::MissingCassette => "missing_cassette",
            Self::StoreWriteConflict => "store_write_conflict",
            Self::SanitizationIncomplete => "sanitization_incomplete",
            Self::StaleCassette => "stale_cassette",
            Self::SchedulingViolation => "scheduling_violation",
            Self::Transport => "transport",
            Self::Internal => "internal",
        }
    }

    /// Whether a failure of this kind invalidates the entire run.
    #[must_use]
    pub fn is_run_fatal(self) -> bool {
        matches!(self, Self::StoreWriteConflict | Self::SchedulingViolation)
    }

    /// Suggested remediation shown to the user, if one applies.
    #[must_use]
    pub fn remediation(self) -> Option<&'static str> {
        match self {
            Self::NoMatch | Self::MissingCassette | Self::StaleCassette => {
                Some("re-record the unit with `reel run --mode record`")
            }
            Self::SanitizationIncomplete => {
                Some("add a sanitize rule or content type that covers the flagged field")
            }
            Self::StoreWriteConflict => Some(
                "another recording run holds the lease; wait for it to finish, or run \
                 `reel cleanup --yes` to clear leases left by an interrupted run",
            ),
            Self::SchedulingViolation => Some("record with a single worker"),
            Self::Transport | Self::Internal => None,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_failures_suggest_rerecording() {
        let err = EngineError::NoMatch {
            cassette_id: "users".into(),
            method: "GET".into(),
            uri: "/users/2".into(),
        };
        assert_eq!(err.kind(), FailureKind::NoMatch);
        assert!(err.kind().remediation().unwrap().contains("--mode record"));
        assert!(FailureKind::StaleCassette.remediation().is_some());
    }

    #[test]
    fn only_concurrency_violations_abort_the_run() {
        assert!(FailureKind::StoreWriteConflict.is_run_fatal());
        assert!(FailureKind::SchedulingViolation.is_run_fatal());
        assert!(!FailureKind::NoMatch.is_run_fatal());
        assert!(!FailureKind::SanitizationIncomplete.is_run_fatal());
    }

    #[test]
    fn failure_kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&FailureKind::SanitizationIncomplete).unwrap();
        assert_eq!(json, "\"sanitization_incomplete\"");
        assert_eq!(FailureKind::NoMatch.to_string(), "no_match");
    }
}
