//! ---
//! eph_section: "15-testing-qa-runbook"
//! eph_subsection: "integration-tests"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Client settings built from a published harness session."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use ephemera_common::config::HarnessSettings;
use ephemera_core::{HarnessLifecycle, MemorySink, ScriptedBehaviour, ScriptedRuntime};
use ephemera_cosmos::{ClientSettingsError, CosmosClientSettings, EMULATOR_KEY};

fn emulator_pem() -> Vec<u8> {
    let params = rcgen::CertificateParams::new(vec!["localhost".to_string()]);
    rcgen::Certificate::from_params(params)
        .unwrap()
        .serialize_pem()
        .unwrap()
        .into_bytes()
}

fn published_harness() -> (Arc<MemorySink>, HarnessLifecycle<ScriptedRuntime, MemorySink>) {
    ephemera_logging::init_test_logging();
    let runtime = Arc::new(
        ScriptedRuntime::new(ScriptedBehaviour::ReadyAfter(Duration::from_secs(2)), emulator_pem())
            .with_access_key(EMULATOR_KEY),
    );
    let sink = Arc::new(MemorySink::new());
    let mut settings = HarnessSettings::default();
    settings.publish.server_port = 0;
    let harness = HarnessLifecycle::new(settings, runtime, Arc::clone(&sink));
    (sink, harness)
}

#[tokio::test(start_paused = true)]
async fn client_settings_follow_published_values() {
    let (sink, harness) = published_harness();
    harness.begin().await.unwrap();

    let keys = &harness.settings().publish.keys;
    let settings = CosmosClientSettings::from_lookup(keys, |key| sink.get(key)).unwrap();

    assert_eq!(settings.endpoint.as_str(), "https://127.0.0.1:8081/");
    assert_eq!(settings.key.expose(), EMULATOR_KEY);
    assert!(settings.gateway_mode);
    assert!(!settings.endpoint_discovery);
    assert_eq!(settings.trust, harness.trust_settings().await);
    settings.http_client().unwrap();

    harness.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn client_cannot_be_built_after_teardown() {
    let (sink, harness) = published_harness();
    harness.begin().await.unwrap();
    let keys = harness.settings().publish.keys.clone();
    harness.teardown().await;

    let settings = CosmosClientSettings::from_lookup(&keys, |key| sink.get(key)).unwrap();
    assert!(matches!(
        settings.http_client(),
        Err(ClientSettingsError::Trust { .. })
    ));
}

#[tokio::test]
async fn empty_sink_has_no_settings() {
    let sink = MemorySink::new();
    let keys = HarnessSettings::default().publish.keys;
    let err = CosmosClientSettings::from_lookup(&keys, |key| sink.get(key)).unwrap_err();
    assert!(matches!(err, ClientSettingsError::MissingKey { .. }));
}
