//! ---
//! eph_section: "02-harness-lifecycle"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Single emulator container: launch, readiness wait, stop."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ExtractionError, StartupError};
use crate::material::{AccessKey, CredentialMaterial};
use crate::runtime::{ContainerRef, ContainerRuntime, LaunchSpec, ProbeOutcome, RuntimeError};

/// Emulator handle state. Transitions only move to a higher rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    Created,
    Starting,
    Ready,
    Failed,
    Stopped,
}

impl ProcessState {
    fn rank(self) -> u8 {
        match self {
            ProcessState::Created => 0,
            ProcessState::Starting => 1,
            ProcessState::Ready => 2,
            ProcessState::Failed => 3,
            ProcessState::Stopped => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Created => "created",
            ProcessState::Starting => "starting",
            ProcessState::Ready => "ready",
            ProcessState::Failed => "failed",
            ProcessState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the emulator container as seen by the harness.
#[derive(Debug, Clone)]
pub struct EmulatorHandle {
    container: Option<ContainerRef>,
    state: ProcessState,
    endpoint: Option<Url>,
    port: Option<u16>,
}

impl EmulatorHandle {
    fn new() -> Self {
        Self {
            container: None,
            state: ProcessState::Created,
            endpoint: None,
            port: None,
        }
    }

    pub fn container(&self) -> Option<&ContainerRef> {
        self.container.as_ref()
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Resolved endpoint; set once the handle is ready.
    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

/// Wraps one sandboxed emulator container behind a [`ContainerRuntime`].
pub struct EmulatorProcess<R: ContainerRuntime + ?Sized> {
    runtime: Arc<R>,
    spec: LaunchSpec,
    poll_interval: Duration,
    handle: EmulatorHandle,
}

impl<R: ContainerRuntime + ?Sized> EmulatorProcess<R> {
    pub fn new(runtime: Arc<R>, spec: LaunchSpec, poll_interval: Duration) -> Self {
        Self {
            runtime,
            spec,
            poll_interval,
            handle: EmulatorHandle::new(),
        }
    }

    pub fn handle(&self) -> &EmulatorHandle {
        &self.handle
    }

    pub fn state(&self) -> ProcessState {
        self.handle.state
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    fn advance(&mut self, next: ProcessState) {
        let current = self.handle.state;
        if next.rank() > current.rank() {
            debug!(container = ?self.handle.container.as_ref().map(|c| &c.id), from = %current, to = %next, "emulator state transition");
            self.handle.state = next;
        }
    }

    /// Launch the container. Does not wait for readiness.
    pub async fn start(&mut self) -> Result<&EmulatorHandle, StartupError> {
        if self.handle.state != ProcessState::Created {
            return Err(StartupError::InvalidState {
                state: self.handle.state,
                expected: ProcessState::Created,
            });
        }
        self.advance(ProcessState::Starting);
        let image = self.spec.image_reference();
        match self.runtime.launch(&self.spec).await {
            Ok(container) => {
                info!(%image, container = %container.id, "emulator container launched");
                self.handle.container = Some(container);
                Ok(&self.handle)
            }
            Err(source) => {
                self.advance(ProcessState::Failed);
                Err(StartupError::Launch { image, source })
            }
        }
    }

    /// Poll the readiness probe until it succeeds, the container exits or `timeout` elapses.
    pub async fn await_ready(&mut self, timeout: Duration) -> Result<Url, StartupError> {
        if self.handle.state == ProcessState::Ready {
            if let Some(endpoint) = &self.handle.endpoint {
                return Ok(endpoint.clone());
            }
        }
        let container = match (&self.handle.container, self.handle.state) {
            (Some(container), ProcessState::Starting) => container.clone(),
            (_, state) => {
                return Err(StartupError::InvalidState {
                    state,
                    expected: ProcessState::Starting,
                })
            }
        };

        let runtime = Arc::clone(&self.runtime);
        let poll_interval = self.poll_interval;
        let probe_loop = async {
            loop {
                match runtime.probe(&container).await {
                    Ok(ProbeOutcome::Ready) => return Ok(()),
                    Ok(ProbeOutcome::Exited { code }) => return Err(code),
                    Ok(ProbeOutcome::Pending) => {}
                    Err(err) => debug!(container = %container.id, error = %err, "readiness probe failed"),
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, probe_loop).await {
            Err(_elapsed) => {
                warn!(container = %container.id, ?timeout, "emulator readiness timed out");
                self.advance(ProcessState::Failed);
                Err(StartupError::StartupTimeout { timeout })
            }
            Ok(Err(exit_code)) => {
                warn!(container = %container.id, ?exit_code, "emulator exited before readiness");
                self.advance(ProcessState::Failed);
                Err(StartupError::ProcessCrashed { exit_code })
            }
            Ok(Ok(())) => match self.runtime.endpoint(&container).await {
                Ok(endpoint) => {
                    info!(container = %container.id, %endpoint, "emulator ready");
                    self.handle.port = endpoint.port_or_known_default();
                    self.handle.endpoint = Some(endpoint.clone());
                    self.advance(ProcessState::Ready);
                    Ok(endpoint)
                }
                Err(source) => {
                    self.advance(ProcessState::Failed);
                    Err(StartupError::Endpoint { source })
                }
            },
        }
    }

    /// Read endpoint, key and trust material. Requires a ready handle.
    pub async fn fetch_key_material(&self) -> Result<CredentialMaterial, ExtractionError> {
        let (Some(container), Some(endpoint), ProcessState::Ready) =
            (&self.handle.container, &self.handle.endpoint, self.handle.state)
        else {
            return Err(ExtractionError::NotReady {
                state: self.handle.state,
            });
        };
        let key = self
            .runtime
            .access_key(container)
            .map_err(|source| ExtractionError::Runtime { source })?;
        if key.is_empty() {
            return Err(ExtractionError::EmptyKey);
        }
        let trust_material = self
            .runtime
            .trust_material(container)
            .await
            .map_err(|source| ExtractionError::Runtime { source })?;
        Ok(CredentialMaterial::new(
            endpoint.clone(),
            AccessKey::new(key),
            trust_material,
        ))
    }

    /// Stop the container. A no-op when already stopped or never launched.
    pub async fn stop(&mut self) -> Result<(), RuntimeError> {
        if self.handle.state == ProcessState::Stopped {
            return Ok(());
        }
        if let Some(container) = &self.handle.container {
            self.runtime.stop(container).await?;
            info!(container = %container.id, "emulator container stopped");
        }
        self.advance(ProcessState::Stopped);
        Ok(())
    }
}
