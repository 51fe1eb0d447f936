//! ---
//! eph_section: "02-harness-lifecycle"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Session lifecycle: start, export, publish, teardown."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ephemera_common::config::HarnessSettings;
use ephemera_logging::{eph_debug, eph_info, eph_warn, log_lifecycle_event, LifecycleOutcome, LogContext};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{ExportError, HarnessError, StartupError, TeardownError};
use crate::exporter::{TlsTrustSettings, TrustStoreArtifact, TrustStoreExporter};
use crate::port::PortReservation;
use crate::process::{EmulatorProcess, ProcessState};
use crate::runtime::{ContainerRuntime, LaunchSpec};
use crate::scope::TempScope;
use crate::sink::{ConfigurationSink, PublishedConfig};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Observable harness state. Transitions only move to a higher rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Idle,
    Starting,
    Ready,
    Exporting,
    Published,
    Failed,
    TornDown,
}

impl LifecycleState {
    fn rank(self) -> u8 {
        match self {
            LifecycleState::Idle => 0,
            LifecycleState::Starting => 1,
            LifecycleState::Ready => 2,
            LifecycleState::Exporting => 3,
            LifecycleState::Published => 4,
            LifecycleState::Failed => 5,
            LifecycleState::TornDown => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Ready => "ready",
            LifecycleState::Exporting => "exporting",
            LifecycleState::Published => "published",
            LifecycleState::Failed => "failed",
            LifecycleState::TornDown => "torn_down",
        }
    }

    /// No further progress is possible from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Failed | LifecycleState::TornDown)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`HarnessLifecycle::teardown`].
#[derive(Debug)]
pub struct TeardownReport {
    /// State the harness was in when teardown was called.
    pub previous_state: LifecycleState,
    /// Steps that failed. Teardown ran every step regardless.
    pub errors: Vec<TeardownError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

struct Session<R: ContainerRuntime + ?Sized> {
    process: Option<EmulatorProcess<R>>,
    reservation: Option<PortReservation>,
    scope: Option<TempScope>,
    artifact: Option<TrustStoreArtifact>,
    published: Option<PublishedConfig>,
}

impl<R: ContainerRuntime + ?Sized> Session<R> {
    fn empty() -> Self {
        Self {
            process: None,
            reservation: None,
            scope: None,
            artifact: None,
            published: None,
        }
    }
}

/// One emulator-backed test session.
///
/// `begin` brings the emulator up and publishes its connection settings into
/// the sink; `teardown` releases everything. Both take the session lock, so a
/// teardown issued while `begin` is running waits for it to settle.
pub struct HarnessLifecycle<R: ContainerRuntime + ?Sized, S: ConfigurationSink + ?Sized> {
    session_id: String,
    settings: HarnessSettings,
    runtime: Arc<R>,
    sink: Arc<S>,
    exporter: TrustStoreExporter,
    state: Mutex<LifecycleState>,
    session: AsyncMutex<Session<R>>,
}

impl<R: ContainerRuntime + ?Sized, S: ConfigurationSink + ?Sized> HarnessLifecycle<R, S> {
    pub fn new(settings: HarnessSettings, runtime: Arc<R>, sink: Arc<S>) -> Self {
        let session_id = format!("eph-{}", NEXT_SESSION.fetch_add(1, Ordering::Relaxed));
        let exporter = TrustStoreExporter::from_settings(&settings.trust_store);
        Self {
            session_id,
            settings,
            runtime,
            sink,
            exporter,
            state: Mutex::new(LifecycleState::Idle),
            session: AsyncMutex::new(Session::empty()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Directory holding the session's trust store, once created.
    pub async fn scope_path(&self) -> Option<PathBuf> {
        let session = self.session.lock().await;
        session
            .scope
            .as_ref()
            .filter(|scope| scope.is_open())
            .map(|scope| scope.path().to_path_buf())
    }

    /// TLS trust settings for clients; present only while published.
    pub async fn trust_settings(&self) -> Option<TlsTrustSettings> {
        let session = self.session.lock().await;
        session.artifact.as_ref().map(TrustStoreArtifact::tls_settings)
    }

    /// The batch handed to the sink; present only while published.
    pub async fn published(&self) -> Option<PublishedConfig> {
        self.session.lock().await.published.clone()
    }

    pub async fn emulator_state(&self) -> Option<ProcessState> {
        let session = self.session.lock().await;
        session.process.as_ref().map(EmulatorProcess::state)
    }

    fn transition(&self, next: LifecycleState) {
        let mut state = self.state.lock();
        if next.rank() > state.rank() {
            let ctx = LogContext::new()
                .with_session(&self.session_id)
                .with_state(next.as_str());
            eph_debug!(context = ctx, "harness {} -> {}", *state, next);
            *state = next;
        }
    }

    /// Start the emulator, export its trust store and publish the connection
    /// settings. Callable once per instance.
    pub async fn begin(&self) -> Result<(), HarnessError> {
        let mut session = self.session.lock().await;
        {
            let mut state = self.state.lock();
            if *state != LifecycleState::Idle {
                return Err(HarnessError::AlreadyStarted { state: *state });
            }
            *state = LifecycleState::Starting;
        }

        let image = self.settings.emulator.image_reference();
        match self.provision(&mut session).await {
            Ok(()) => {
                let ctx = LogContext::new()
                    .with_session(&self.session_id)
                    .with_image(&image)
                    .with_state(LifecycleState::Published.as_str());
                log_lifecycle_event(
                    Some(&ctx),
                    "harness.begin",
                    "connection settings published",
                    LifecycleOutcome::Success,
                );
                Ok(())
            }
            Err(err) => {
                self.transition(LifecycleState::Failed);
                session.reservation = None;
                if let Some(process) = session.process.as_mut() {
                    if let Err(stop_err) = process.stop().await {
                        let ctx = LogContext::new().with_session(&self.session_id);
                        eph_warn!(context = ctx, "emulator stop after failed begin: {stop_err}");
                    }
                }
                let ctx = LogContext::new()
                    .with_session(&self.session_id)
                    .with_image(&image)
                    .with_state(err.state().as_str());
                log_lifecycle_event(
                    Some(&ctx),
                    "harness.begin",
                    &err.to_string(),
                    LifecycleOutcome::Fault,
                );
                Err(err)
            }
        }
    }

    async fn provision(&self, session: &mut Session<R>) -> Result<(), HarnessError> {
        let requested = self.settings.publish.server_port;
        let reservation = PortReservation::reserve(requested).map_err(|source| {
            HarnessError::PortUnavailable {
                port: requested,
                source,
            }
        })?;
        let server_port = reservation.port();
        session.reservation = Some(reservation);

        let emulator = &self.settings.emulator;
        let process = session.process.insert(EmulatorProcess::new(
            Arc::clone(&self.runtime),
            LaunchSpec::from_settings(emulator),
            emulator.poll_interval_ms,
        ));
        let startup_err = |source: StartupError| HarnessError::Startup {
            state: LifecycleState::Starting,
            source,
        };
        process.start().await.map_err(startup_err)?;
        process
            .await_ready(emulator.readiness_timeout)
            .await
            .map_err(startup_err)?;
        self.transition(LifecycleState::Ready);

        let material = process
            .fetch_key_material()
            .await
            .map_err(|source| HarnessError::Extraction {
                state: LifecycleState::Ready,
                source,
            })?;
        let endpoint = material.endpoint().to_string();

        self.transition(LifecycleState::Exporting);
        let export_err = |source: ExportError| HarnessError::Export {
            state: LifecycleState::Exporting,
            source,
        };
        let temp_root = self.settings.trust_store.temp_root.as_deref();
        let scope = TempScope::create(temp_root).map_err(|source| {
            export_err(ExportError::Write {
                path: temp_root.map_or_else(std::env::temp_dir, PathBuf::from),
                source,
            })
        })?;
        let scope = session.scope.insert(scope);
        let artifact = self.exporter.export(material, scope).map_err(export_err)?;

        let keys = &self.settings.publish.keys;
        let mut config = PublishedConfig::new();
        config.insert(&keys.endpoint_uri, endpoint);
        config.insert(&keys.access_key, artifact.password().expose());
        config.insert(&keys.server_port, server_port.to_string());
        config.insert(&keys.trust_store_path, artifact.path().display().to_string());

        if let Some(reservation) = session.reservation.take() {
            reservation.release();
        }
        self.sink.apply(&config);
        session.artifact = Some(artifact);
        session.published = Some(config);
        self.transition(LifecycleState::Published);
        Ok(())
    }

    /// Release every resource of the session. Safe in any state; calls after
    /// the first return an empty report.
    pub async fn teardown(&self) -> TeardownReport {
        let mut session = self.session.lock().await;
        let previous_state = self.state();
        let mut errors = Vec::new();
        if previous_state == LifecycleState::TornDown {
            return TeardownReport {
                previous_state,
                errors,
            };
        }

        if let Some(process) = session.process.as_mut() {
            if let Err(source) = process.stop().await {
                let container = process
                    .handle()
                    .container()
                    .map(|container| container.id.as_str())
                    .unwrap_or("unlaunched");
                let ctx = LogContext::new()
                    .with_session(&self.session_id)
                    .with_image(&process.spec().image);
                eph_warn!(
                    context = ctx,
                    "emulator container {container} may still be running and needs manual removal"
                );
                errors.push(TeardownError::Stop { source });
            }
        }
        session.reservation = None;
        session.published = None;
        if let Some(artifact) = session.artifact.take() {
            let path = artifact.path().to_path_buf();
            if let Err(source) = artifact.remove() {
                errors.push(TeardownError::ArtifactRemoval { path, source });
            }
        }
        if let Some(scope) = session.scope.as_mut() {
            if let Err(source) = scope.close() {
                errors.push(TeardownError::ScopeRemoval {
                    path: scope.path().to_path_buf(),
                    source,
                });
            }
        }
        self.transition(LifecycleState::TornDown);

        let ctx = LogContext::new()
            .with_session(&self.session_id)
            .with_state(previous_state.as_str());
        for err in &errors {
            eph_warn!(context = ctx, "teardown step failed: {err}");
        }
        let outcome = if errors.is_empty() {
            LifecycleOutcome::Success
        } else {
            LifecycleOutcome::Fault
        };
        log_lifecycle_event(Some(&ctx), "harness.teardown", "session released", outcome);
        eph_info!(context = ctx, "harness torn down after {} failed step(s)", errors.len());

        TeardownReport {
            previous_state,
            errors,
        }
    }
}

impl<R: ContainerRuntime + ?Sized, S: ConfigurationSink + ?Sized> Drop for HarnessLifecycle<R, S> {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if !matches!(state, LifecycleState::Idle | LifecycleState::TornDown) {
            let ctx = LogContext::new()
                .with_session(&self.session_id)
                .with_state(state.as_str());
            eph_warn!(context = ctx, "harness dropped without teardown");
        }
    }
}
