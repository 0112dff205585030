//! Record-replay round-trip integration tests.
//!
//! Runs suites in-process against a scripted transport:
//! 1. Record a suite and check what lands in the cassette root.
//! 2. Replay it with the network unavailable and check every call hits.
//! 3. Check the failure kinds replay reports for misses, missing cassettes,
//!    and stale cassettes.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use reel::cassette::format::{ClientKind, HttpRequest, HttpResponse};
use reel::cassette::store::{CassetteStore, FileCassetteStore};
use reel::config::EngineConfig;
use reel::mode::ExecutionMode;
use reel::ports::transport::{Transport, TransportFactory, TransportFuture};
use reel::report::{RunReport, UnitStatus};
use reel::runner::{RunRequest, Runner};
use reel::schedule::{Preset, SuiteManifest};
use reel::{EngineError, FailureKind};

/// Answers `/users/<n>` with a JSON user, and fails `/down`.
struct Scripted {
    sent: Arc<AtomicUsize>,
}

impl Transport for Scripted {
    fn send(&self, _client: ClientKind, request: &HttpRequest) -> TransportFuture<'_> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        let uri = request.uri.clone();
        Box::pin(async move {
            if uri.ends_with("/down") {
                return Err(EngineError::Transport(format!("connection refused: {uri}")));
            }
            let id = uri.rsplit('/').next().unwrap_or_default().to_string();
            Ok(HttpResponse {
                status: 200,
                headers: vec![("Content-Type".into(), "application/json".into())],
                body: format!("{{\"id\":{id},\"name\":\"user {id}\"}}"),
            })
        })
    }
}

#[derive(Default)]
struct ScriptedFactory {
    sent: Arc<AtomicUsize>,
}

impl TransportFactory for ScriptedFactory {
    fn connect(&self) -> Result<Box<dyn Transport>, EngineError> {
        Ok(Box::new(Scripted { sent: self.sent.clone() }))
    }
}

/// Stands in for an unplugged network cable.
struct Offline;

impl TransportFactory for Offline {
    fn connect(&self) -> Result<Box<dyn Transport>, EngineError> {
        Err(EngineError::Transport("network disabled in replay tests".into()))
    }
}

fn manifest(yaml: &str) -> SuiteManifest {
    SuiteManifest::from_yaml(yaml).expect("manifest should parse")
}

fn users_suite(uri: &str, model: &str) -> SuiteManifest {
    manifest(&format!(
        r#"
units:
  - id: users
    tier: integration
    subject: {{ tool: fetch_user, model: {model}, prompt: "look up a user" }}
    calls:
      - client: http
        method: GET
        uri: {uri}
        headers: [["Authorization", "Bearer sk-live-secret"]]
"#
    ))
}

fn config(root: &Path) -> EngineConfig {
    EngineConfig { cassette_root: root.to_path_buf(), ..EngineConfig::default() }
}

fn request(mode: ExecutionMode) -> RunRequest {
    RunRequest { mode, preset: Preset::Integration, workers: None, fail_fast: false }
}

async fn record(root: &Path, suite: SuiteManifest) -> (RunReport, usize) {
    let factory = Arc::new(ScriptedFactory::default());
    let runner = Runner::new(config(root), suite).with_transport_factory(factory.clone());
    let report = runner.run(&request(ExecutionMode::Recording)).await.unwrap();
    (report, factory.sent.load(Ordering::SeqCst))
}

async fn replay(cfg: EngineConfig, suite: SuiteManifest) -> RunReport {
    let runner = Runner::new(cfg, suite).with_transport_factory(Arc::new(Offline));
    runner.run(&request(ExecutionMode::Replaying)).await.unwrap()
}

#[tokio::test]
async fn record_then_replay_serves_every_call_from_the_cassette() {
    let dir = tempfile::tempdir().unwrap();

    // --- Phase 1: record ---
    let (recorded, sent) = record(dir.path(), users_suite("/users/1", "m1")).await;
    assert!(recorded.success(), "{}", recorded.render_table());
    assert_eq!(sent, 1);
    assert_eq!(recorded.published, vec!["users".to_string()]);
    assert_eq!(recorded.totals.recorded, 1);

    let text = fs::read_to_string(dir.path().join("users.cassette")).unwrap();
    assert!(text.contains("/users/1"));
    assert!(!text.contains("sk-live-secret"), "credential persisted:\n{text}");

    // --- Phase 2: replay twice with the network unavailable ---
    let first = replay(config(dir.path()), users_suite("/users/1", "m1")).await;
    let second = replay(config(dir.path()), users_suite("/users/1", "m1")).await;
    for report in [&first, &second] {
        assert!(report.success(), "{}", report.render_table());
        assert_eq!((report.totals.hits, report.totals.misses, report.totals.live), (1, 0, 0));
        assert!(report.units[0].warnings.is_empty());
    }

    // The run scratch area is gone after each run.
    assert!(!dir.path().join(".reel/runs").join(&first.run_id).exists());
}

#[tokio::test]
async fn unrecorded_request_is_a_no_match_with_remediation() {
    let dir = tempfile::tempdir().unwrap();
    record(dir.path(), users_suite("/users/1", "m1")).await;

    let report = replay(config(dir.path()), users_suite("/users/2", "m1")).await;
    let unit = &report.units[0];
    assert_eq!(unit.status, UnitStatus::Failed);
    assert_eq!(unit.kind, Some(FailureKind::NoMatch));
    assert!(unit.message.as_deref().unwrap().contains("/users/2"));
    assert!(unit.remediation.as_deref().unwrap().contains("--mode record"));
    assert_eq!(report.totals.misses, 1);
}

#[tokio::test]
async fn replay_without_cassette_reports_missing_cassette() {
    let dir = tempfile::tempdir().unwrap();
    let report = replay(config(dir.path()), users_suite("/users/1", "m1")).await;
    assert!(!report.success());
    assert_eq!(report.units[0].kind, Some(FailureKind::MissingCassette));
}

#[tokio::test]
async fn model_change_makes_the_cassette_stale() {
    let dir = tempfile::tempdir().unwrap();
    record(dir.path(), users_suite("/users/1", "m1")).await;

    // Warning by default: the unit still passes from the old recording.
    let lenient = replay(config(dir.path()), users_suite("/users/1", "m2")).await;
    assert!(lenient.success());
    assert_eq!(lenient.units[0].warnings.len(), 1);
    assert!(lenient.units[0].warnings[0].contains("users"));

    // Fatal when configured.
    let mut strict = config(dir.path());
    strict.staleness.fatal = true;
    let report = replay(strict, users_suite("/users/1", "m2")).await;
    assert_eq!(report.units[0].kind, Some(FailureKind::StaleCassette));
}

#[tokio::test]
async fn workflow_steps_share_one_cassette() {
    let dir = tempfile::tempdir().unwrap();
    let suite = manifest(
        r"
units:
  - id: checkout-cart
    continuation: { continuation_id: checkout, step_index: 0 }
    calls:
      - { client: http, method: GET, uri: /users/7 }
  - id: checkout-pay
    continuation: { continuation_id: checkout, step_index: 1 }
    calls:
      - { client: http, method: POST, uri: /users/8, body: '{}' }
",
    );

    let (report, sent) = record(dir.path(), suite.clone()).await;
    assert!(report.success(), "{}", report.render_table());
    assert_eq!(sent, 2);
    assert_eq!(report.published, vec!["checkout".to_string()]);

    let store = FileCassetteStore::new(dir.path(), ExecutionMode::Replaying, "test");
    assert_eq!(store.list().unwrap(), vec!["checkout.cassette".to_string()]);
    let cassette = store.open("checkout").unwrap();
    let uris: Vec<&str> = cassette.interactions.iter().map(|i| i.uri.as_str()).collect();
    assert_eq!(uris, ["/users/7", "/users/8"]);

    let replayed = replay(config(dir.path()), suite).await;
    assert!(replayed.success(), "{}", replayed.render_table());
    assert_eq!(replayed.totals.hits, 2);
}

#[tokio::test]
async fn failed_recording_publishes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let suite = manifest(
        r"
units:
  - id: flaky-1
    continuation: { continuation_id: flaky, step_index: 0 }
    calls:
      - { client: http, method: GET, uri: /users/1 }
  - id: flaky-2
    continuation: { continuation_id: flaky, step_index: 1 }
    calls:
      - { client: http, method: GET, uri: /down }
  - id: flaky-3
    continuation: { continuation_id: flaky, step_index: 2 }
    calls:
      - { client: http, method: GET, uri: /users/3 }
",
    );

    let (report, sent) = record(dir.path(), suite).await;
    assert!(!report.success());
    assert_eq!(sent, 2);
    let statuses: Vec<UnitStatus> = report.units.iter().map(|u| u.status).collect();
    assert_eq!(statuses, [UnitStatus::Passed, UnitStatus::Failed, UnitStatus::Skipped]);
    assert_eq!(report.units[1].kind, Some(FailureKind::Transport));
    assert!(report.published.is_empty());
    assert!(!dir.path().join("flaky.cassette").exists());
}
