//! ---
//! eph_section: "15-testing-qa-runbook"
//! eph_subsection: "integration-tests"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Harness lifecycle scenarios against a scripted emulator."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
use std::net::TcpListener;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ephemera_common::config::HarnessSettings;
use ephemera_core::{
    ConfigurationSink, HarnessError, HarnessLifecycle, LifecycleState, MemorySink, ProcessState,
    PublishedConfig, ScriptedBehaviour, ScriptedRuntime, StartupError, TeardownError,
    TlsTrustSettings, TrustStoreFormat,
};
use ephemera_cosmos::EMULATOR_KEY;

type Harness = HarnessLifecycle<ScriptedRuntime, MemorySink>;

fn emulator_pem() -> Vec<u8> {
    let params = rcgen::CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()]);
    rcgen::Certificate::from_params(params)
        .unwrap()
        .serialize_pem()
        .unwrap()
        .into_bytes()
}

fn settings(timeout: Duration) -> HarnessSettings {
    let mut settings = HarnessSettings::default();
    settings.publish.server_port = 0;
    settings.emulator.readiness_timeout = timeout;
    settings.emulator.poll_interval_ms = Duration::from_millis(250);
    settings
}

fn harness_with(runtime: ScriptedRuntime, timeout: Duration) -> (Arc<ScriptedRuntime>, Arc<MemorySink>, Harness) {
    ephemera_logging::init_test_logging();
    let runtime = Arc::new(runtime);
    let sink = Arc::new(MemorySink::new());
    let harness = HarnessLifecycle::new(settings(timeout), Arc::clone(&runtime), Arc::clone(&sink));
    (runtime, sink, harness)
}

fn scope_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}

#[tokio::test(start_paused = true)]
async fn ready_within_timeout_publishes_four_keys() {
    let (runtime, sink, harness) = harness_with(
        ScriptedRuntime::new(ScriptedBehaviour::ReadyAfter(Duration::from_secs(5)), emulator_pem()),
        Duration::from_secs(30),
    );

    harness.begin().await.unwrap();

    assert_eq!(harness.state(), LifecycleState::Published);
    let published = sink.snapshot();
    assert_eq!(published.len(), 4);
    assert!(published.values().all(|value| !value.is_empty()));
    let keys = &harness.settings().publish.keys;
    assert_eq!(sink.get(&keys.endpoint_uri).as_deref(), Some("https://127.0.0.1:8081/"));
    let port: u16 = sink.get(&keys.server_port).unwrap().parse().unwrap();
    assert_ne!(port, 0);
    let store = sink.get(&keys.trust_store_path).unwrap();
    assert!(Path::new(&store).is_file());
    assert_eq!(harness.published().await.unwrap().len(), 4);
    assert_eq!(runtime.launches(), 1);

    assert!(harness.teardown().await.is_clean());
    assert!(!Path::new(&store).exists());
}

/// Records each batch and whether the trust store existed when it arrived.
#[derive(Default)]
struct ObservingSink {
    batches: Mutex<Vec<(usize, bool)>>,
    singles: Mutex<usize>,
}

impl ConfigurationSink for ObservingSink {
    fn set(&self, _key: &str, _value: &str) {
        *self.singles.lock().unwrap() += 1;
    }

    fn apply(&self, config: &PublishedConfig) {
        let store_present = config
            .get("azure.cosmosdb.trust-store")
            .map(|path| Path::new(path).is_file())
            .unwrap_or(false);
        self.batches.lock().unwrap().push((config.len(), store_present));
    }
}

#[tokio::test(start_paused = true)]
async fn publication_is_one_batch_after_export() {
    ephemera_logging::init_test_logging();
    let runtime = Arc::new(ScriptedRuntime::new(
        ScriptedBehaviour::ReadyAfter(Duration::from_secs(3)),
        emulator_pem(),
    ));
    let sink = Arc::new(ObservingSink::default());
    let harness = HarnessLifecycle::new(settings(Duration::from_secs(30)), runtime, Arc::clone(&sink));

    harness.begin().await.unwrap();

    assert_eq!(*sink.batches.lock().unwrap(), vec![(4, true)]);
    assert_eq!(*sink.singles.lock().unwrap(), 0);
    harness.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn second_begin_is_rejected_without_relaunch() {
    let (runtime, _, harness) = harness_with(
        ScriptedRuntime::new(ScriptedBehaviour::ReadyAfter(Duration::from_secs(1)), emulator_pem()),
        Duration::from_secs(30),
    );
    harness.begin().await.unwrap();

    let err = harness.begin().await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::AlreadyStarted {
            state: LifecycleState::Published
        }
    ));
    assert_eq!(runtime.launches(), 1);
    harness.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_begin_launches_once() {
    let (runtime, _, harness) = harness_with(
        ScriptedRuntime::new(ScriptedBehaviour::ReadyAfter(Duration::from_secs(2)), emulator_pem()),
        Duration::from_secs(30),
    );
    let harness = Arc::new(harness);

    let first = tokio::spawn({
        let harness = Arc::clone(&harness);
        async move { harness.begin().await }
    });
    let second = tokio::spawn({
        let harness = Arc::clone(&harness);
        async move { harness.begin().await }
    });
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(HarnessError::AlreadyStarted { .. }))));
    assert_eq!(runtime.launches(), 1);
    harness.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn teardown_is_idempotent() {
    let (runtime, _, harness) = harness_with(
        ScriptedRuntime::new(ScriptedBehaviour::ReadyAfter(Duration::ZERO), emulator_pem()),
        Duration::from_secs(30),
    );
    harness.begin().await.unwrap();
    let scope = harness.scope_path().await.unwrap();

    let first = harness.teardown().await;
    let second = harness.teardown().await;
    let third = harness.teardown().await;

    assert_eq!(first.previous_state, LifecycleState::Published);
    assert_eq!(second.previous_state, LifecycleState::TornDown);
    assert!(first.is_clean() && second.is_clean() && third.is_clean());
    assert_eq!(runtime.stops(), 1);
    assert!(!scope.exists());
    assert_eq!(harness.emulator_state().await, Some(ProcessState::Stopped));
}

#[tokio::test(start_paused = true)]
async fn failed_stop_is_reported_and_teardown_continues() {
    let (runtime, _, harness) = harness_with(
        ScriptedRuntime::new(ScriptedBehaviour::ReadyAfter(Duration::ZERO), emulator_pem())
            .with_failing_stop("daemon gone"),
        Duration::from_secs(30),
    );
    harness.begin().await.unwrap();
    let scope = harness.scope_path().await.unwrap();

    let report = harness.teardown().await;

    assert_eq!(report.previous_state, LifecycleState::Published);
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(&report.errors[0], TeardownError::Stop { source } if source.to_string().contains("daemon gone")));
    assert!(!scope.exists());
    assert_eq!(harness.state(), LifecycleState::TornDown);
    assert_eq!(harness.emulator_state().await, Some(ProcessState::Ready));
    assert_eq!(runtime.running(), 1);

    assert!(harness.teardown().await.is_clean());
}

#[tokio::test]
async fn dropping_an_idle_harness_is_fine() {
    let (runtime, sink, harness) = harness_with(
        ScriptedRuntime::new(ScriptedBehaviour::NeverReady, emulator_pem()),
        Duration::from_secs(30),
    );
    drop(harness);
    assert_eq!(runtime.launches(), 0);
    assert!(sink.is_empty());
}

#[tokio::test(start_paused = true)]
async fn readiness_timeout_stops_emulator_and_publishes_nothing() {
    let (runtime, sink, harness) = harness_with(
        ScriptedRuntime::new(ScriptedBehaviour::NeverReady, emulator_pem()),
        Duration::from_secs(1),
    );

    let err = harness.begin().await.unwrap_err();

    assert!(err.is_startup_timeout());
    assert_eq!(err.state(), LifecycleState::Starting);
    assert_eq!(harness.state(), LifecycleState::Failed);
    assert_eq!(runtime.running(), 0);
    assert_eq!(runtime.stops(), 1);
    assert!(sink.is_empty());
    assert!(harness.trust_settings().await.is_none());

    let report = harness.teardown().await;
    assert_eq!(report.previous_state, LifecycleState::Failed);
    assert_eq!(harness.state(), LifecycleState::TornDown);
}

#[tokio::test(start_paused = true)]
async fn crash_before_ready_fails_session() {
    let (runtime, sink, harness) = harness_with(
        ScriptedRuntime::new(
            ScriptedBehaviour::CrashAfter {
                after: Duration::from_secs(4),
                exit_code: 139,
            },
            emulator_pem(),
        ),
        Duration::from_secs(30),
    );

    let err = harness.begin().await.unwrap_err();

    assert!(matches!(
        err,
        HarnessError::Startup {
            state: LifecycleState::Starting,
            source: StartupError::ProcessCrashed { exit_code: Some(139) },
        }
    ));
    assert_eq!(runtime.running(), 0);
    assert!(sink.is_empty());
    harness.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn export_failure_leaves_scope_empty() {
    let (runtime, sink, harness) = harness_with(
        ScriptedRuntime::new(ScriptedBehaviour::ReadyAfter(Duration::from_secs(1)), "garbage"),
        Duration::from_secs(30),
    );

    let err = harness.begin().await.unwrap_err();

    assert!(matches!(
        err,
        HarnessError::Export {
            state: LifecycleState::Exporting,
            ..
        }
    ));
    assert_eq!(harness.state(), LifecycleState::Failed);
    let scope = harness.scope_path().await.unwrap();
    assert!(scope_is_empty(&scope));
    assert_eq!(runtime.running(), 0);
    assert!(sink.is_empty());

    assert!(harness.teardown().await.is_clean());
    assert!(!scope.exists());
}

#[tokio::test]
async fn occupied_server_port_fails_before_launch() {
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    ephemera_logging::init_test_logging();
    let runtime = Arc::new(ScriptedRuntime::new(ScriptedBehaviour::NeverReady, emulator_pem()));
    let sink = Arc::new(MemorySink::new());
    let mut settings = settings(Duration::from_secs(30));
    settings.publish.server_port = port;
    let harness = HarnessLifecycle::new(settings, Arc::clone(&runtime), Arc::clone(&sink));

    let err = harness.begin().await.unwrap_err();

    assert!(matches!(err, HarnessError::PortUnavailable { port: p, .. } if p == port));
    assert_eq!(harness.state(), LifecycleState::Failed);
    assert_eq!(runtime.launches(), 0);
    assert!(sink.is_empty());
    harness.teardown().await;
}

// The Cosmos emulator's tooling opens the exported store with the account key.
#[tokio::test(start_paused = true)]
async fn trust_store_password_is_the_emulator_key() {
    let (_, sink, harness) = harness_with(
        ScriptedRuntime::new(ScriptedBehaviour::ReadyAfter(Duration::ZERO), emulator_pem())
            .with_access_key(EMULATOR_KEY),
        Duration::from_secs(30),
    );
    harness.begin().await.unwrap();

    let keys = &harness.settings().publish.keys;
    let trust = harness.trust_settings().await.unwrap();
    assert_eq!(trust.password.expose(), EMULATOR_KEY);
    assert_eq!(sink.get(&keys.access_key).as_deref(), Some(EMULATOR_KEY));
    assert_eq!(trust.store_type, TrustStoreFormat::Pkcs12);
    assert_eq!(trust.load_certificates().unwrap().len(), 1);

    let reopened = TlsTrustSettings {
        location: sink.get(&keys.trust_store_path).unwrap().into(),
        password: trust.password.clone(),
        store_type: TrustStoreFormat::Pkcs12,
    };
    assert_eq!(reopened, trust);
    harness.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn custom_publish_keys_are_honoured() {
    ephemera_logging::init_test_logging();
    let runtime = Arc::new(ScriptedRuntime::new(
        ScriptedBehaviour::ReadyAfter(Duration::ZERO),
        emulator_pem(),
    ));
    let sink = Arc::new(MemorySink::new());
    let mut settings = settings(Duration::from_secs(30));
    settings.publish.keys.endpoint_uri = "cosmos.endpoint".into();
    settings.publish.keys.trust_store_path = "tls.trust-store".into();
    let temp_root = tempfile::tempdir().unwrap();
    settings.trust_store.temp_root = Some(temp_root.path().to_path_buf());
    let harness = HarnessLifecycle::new(settings, runtime, Arc::clone(&sink));

    harness.begin().await.unwrap();

    assert!(sink.get("cosmos.endpoint").is_some());
    assert!(sink.get("azure.cosmosdb.uri").is_none());
    let store = sink.get("tls.trust-store").unwrap();
    assert!(Path::new(&store).starts_with(temp_root.path()));
    harness.teardown().await;
}
