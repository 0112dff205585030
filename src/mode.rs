//! Execution mode and the per-unit mode controller.
//!
//! The run-wide [`ExecutionMode`] is fixed before scheduling. Each unit gets
//! its own [`ModeController`], which starts in the run's mode and moves to
//! `Failed` on the first error. `Failed` is terminal: every later call
//! reports the original failure.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cassette::format::{ClientKind, HttpRequest, HttpResponse};
use crate::error::{EngineError, FailureKind};
use crate::ports::transport::{Transport, TransportFuture};

/// Whether a run talks to the network and records, or replays cassettes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Real calls are made and written to cassettes. One worker at most.
    Recording,
    /// Calls are answered from cassettes. Any number of workers.
    Replaying,
}

impl ExecutionMode {
    /// Upper bound on concurrently active workers in this mode.
    #[must_use]
    pub fn max_workers(self) -> Option<usize> {
        match self {
            Self::Recording => Some(1),
            Self::Replaying => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Recording => "record",
            Self::Replaying => "replay",
        })
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "record" | "recording" => Ok(Self::Recording),
            "replay" | "replaying" => Ok(Self::Replaying),
            other => Err(format!("unknown mode '{other}' (expected record or replay)")),
        }
    }
}

/// Current state of a unit's controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    /// Forwarding to the network and recording.
    Recording,
    /// Answering from the cassette.
    Replaying,
    /// A call failed; the unit is finished.
    Failed {
        /// Kind of the first failure.
        kind: FailureKind,
        /// Message of the first failure.
        message: String,
    },
}

impl From<ExecutionMode> for ControllerState {
    fn from(mode: ExecutionMode) -> Self {
        match mode {
            ExecutionMode::Recording => Self::Recording,
            ExecutionMode::Replaying => Self::Replaying,
        }
    }
}

/// Per-unit call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStats {
    /// Calls answered from the cassette.
    pub hits: u32,
    /// Calls with no matching interaction.
    pub misses: u32,
    /// Calls forwarded to the network and staged for the cassette.
    pub recorded: u32,
    /// Calls sent to the network by live-tier units, never recorded.
    #[serde(default)]
    pub live: u32,
}

impl CallStats {
    /// Counters accumulated since `earlier`.
    #[must_use]
    pub fn since(self, earlier: Self) -> Self {
        Self {
            hits: self.hits - earlier.hits,
            misses: self.misses - earlier.misses,
            recorded: self.recorded - earlier.recorded,
            live: self.live - earlier.live,
        }
    }
}

/// Gates every intercepted call of one unit.
pub struct ModeController {
    mode: ExecutionMode,
    passthrough: bool,
    state: Mutex<ControllerState>,
    stats: Mutex<CallStats>,
    transport: Box<dyn Transport>,
}

impl ModeController {
    /// Creates a controller that sends calls through `transport`.
    #[must_use]
    pub fn new(mode: ExecutionMode, transport: Box<dyn Transport>) -> Self {
        Self {
            mode,
            passthrough: false,
            state: Mutex::new(mode.into()),
            stats: Mutex::new(CallStats::default()),
            transport,
        }
    }

    /// Creates a controller for live-tier units: calls reach the network
    /// and nothing is written.
    #[must_use]
    pub fn live(transport: Box<dyn Transport>) -> Self {
        Self { passthrough: true, ..Self::new(ExecutionMode::Recording, transport) }
    }

    /// Creates a controller that failed before its first call, such as when
    /// the unit's cassette is missing.
    #[must_use]
    pub fn failed(mode: ExecutionMode, error: &EngineError) -> Self {
        let controller = Self::new(mode, Box::new(Unavailable));
        controller.set_failed(error);
        controller
    }

    /// Run-wide mode this controller was created for.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        lock(&self.state).clone()
    }

    /// Snapshot of the call counters.
    #[must_use]
    pub fn stats(&self) -> CallStats {
        *lock(&self.stats)
    }

    /// Kind and message of the failure, if the unit has failed.
    #[must_use]
    pub fn failure(&self) -> Option<(FailureKind, String)> {
        match self.state() {
            ControllerState::Failed { kind, message } => Some((kind, message)),
            _ => None,
        }
    }

    /// Moves the controller to `Failed` unless it already failed.
    pub fn set_failed(&self, error: &EngineError) {
        let mut state = lock(&self.state);
        if matches!(*state, ControllerState::Failed { .. }) {
            return;
        }
        warn!(kind = %error.kind(), error = %error, "unit failed");
        *state = ControllerState::Failed { kind: error.kind(), message: error.to_string() };
    }

    /// Sends one request according to the current state.
    ///
    /// # Errors
    ///
    /// Returns the transport's error on the first failure, and
    /// [`EngineError::UnitFailed`] for every call after it.
    pub async fn exchange(
        &self,
        client: ClientKind,
        request: &HttpRequest,
    ) -> Result<HttpResponse, EngineError> {
        let state = self.state();
        if let ControllerState::Failed { kind, message } = state {
            return Err(EngineError::UnitFailed { kind, message });
        }

        match self.transport.send(client, request).await {
            Ok(response) => {
                let mut stats = lock(&self.stats);
                match state {
                    _ if self.passthrough => stats.live += 1,
                    ControllerState::Recording => stats.recorded += 1,
                    _ => stats.hits += 1,
                }
                debug!(
                    method = %request.method,
                    uri = %request.uri,
                    status = response.status,
                    "call answered"
                );
                Ok(response)
            }
            Err(err) => {
                if matches!(err, EngineError::NoMatch { .. }) {
                    lock(&self.stats).misses += 1;
                }
                self.set_failed(&err);
                Err(err)
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Transport of a controller that never sends.
struct Unavailable;

impl Transport for Unavailable {
    fn send(&self, _client: ClientKind, _request: &HttpRequest) -> TransportFuture<'_> {
        Box::pin(async { Err(EngineError::ModeViolation("unit has no transport".into())) })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    struct Scripted(Mutex<VecDeque<Result<HttpResponse, EngineError>>>);

    impl Scripted {
        fn new(results: Vec<Result<HttpResponse, EngineError>>) -> Box<Self> {
            Box::new(Self(Mutex::new(results.into())))
        }
    }

    impl Transport for Scripted {
        fn send(&self, _client: ClientKind, _request: &HttpRequest) -> TransportFuture<'_> {
            let next = self.0.lock().unwrap().pop_front().expect("unexpected call");
            Box::pin(async move { next })
        }
    }

    fn ok() -> Result<HttpResponse, EngineError> {
        Ok(HttpResponse { status: 200, ..HttpResponse::default() })
    }

    fn no_match() -> Result<HttpResponse, EngineError> {
        Err(EngineError::NoMatch {
            cassette_id: "users".into(),
            method: "GET".into(),
            uri: "/users/2".into(),
        })
    }

    #[test]
    fn mode_parses_short_and_long_names() {
        assert_eq!("record".parse::<ExecutionMode>().unwrap(), ExecutionMode::Recording);
        assert_eq!("Replaying".parse::<ExecutionMode>().unwrap(), ExecutionMode::Replaying);
        assert!("live".parse::<ExecutionMode>().is_err());
        assert_eq!(ExecutionMode::Recording.max_workers(), Some(1));
    }

    #[tokio::test]
    async fn replay_counts_hits_then_fails_on_miss() {
        let controller =
            ModeController::new(ExecutionMode::Replaying, Scripted::new(vec![ok(), no_match()]));
        let request = HttpRequest::new("GET", "/users/1");

        assert!(controller.exchange(ClientKind::Http, &request).await.is_ok());
        let err = controller.exchange(ClientKind::Http, &request).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::NoMatch);

        let stats = controller.stats();
        assert_eq!((stats.hits, stats.misses, stats.recorded), (1, 1, 0));
        assert_eq!(controller.failure().unwrap().0, FailureKind::NoMatch);
    }

    #[tokio::test]
    async fn failed_is_terminal() {
        let controller =
            ModeController::new(ExecutionMode::Recording, Scripted::new(vec![Err(
                EngineError::SanitizationIncomplete("token".into()),
            )]));
        let request = HttpRequest::new("POST", "/login");

        let first = controller.exchange(ClientKind::Http, &request).await.unwrap_err();
        assert_eq!(first.kind(), FailureKind::SanitizationIncomplete);

        // The transport has no more scripted results; reaching it would panic.
        let second = controller.exchange(ClientKind::Http, &request).await.unwrap_err();
        assert!(matches!(second, EngineError::UnitFailed { .. }));
        assert_eq!(second.kind(), FailureKind::SanitizationIncomplete);
    }

    #[tokio::test]
    async fn recording_counts_recorded_calls() {
        let controller = ModeController::new(ExecutionMode::Recording, Scripted::new(vec![ok()]));
        controller.exchange(ClientKind::Http, &HttpRequest::new("GET", "/a")).await.unwrap();
        assert_eq!(controller.stats().recorded, 1);
        assert_eq!(controller.state(), ControllerState::Recording);
    }

    #[tokio::test]
    async fn live_calls_are_counted_separately() {
        let controller = ModeController::live(Scripted::new(vec![ok(), ok()]));
        let before = controller.stats();
        controller.exchange(ClientKind::Http, &HttpRequest::new("GET", "/a")).await.unwrap();
        controller.exchange(ClientKind::Http, &HttpRequest::new("GET", "/b")).await.unwrap();
        let delta = controller.stats().since(before);
        assert_eq!((delta.live, delta.recorded), (2, 0));
    }

    #[tokio::test]
    async fn controller_can_start_failed() {
        let controller = ModeController::failed(
            ExecutionMode::Replaying,
            &EngineError::CassetteNotFound("users".into()),
        );
        let err =
            controller.exchange(ClientKind::Http, &HttpRequest::new("GET", "/")).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::MissingCassette);
    }
}
