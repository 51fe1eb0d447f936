//! ---
//! eph_section: "02-harness-lifecycle"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Container runtime collaborator contract."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
//! The harness only needs a narrow slice of a container runtime: launch a
//! pinned image, probe it, read endpoint/key/trust material, stop it.
//! [`ContainerRuntime`] is that slice; [`scripted::ScriptedRuntime`] is the
//! deterministic in-process implementation used by tests.

use std::time::Duration;

use async_trait::async_trait;
use ephemera_common::config::EmulatorSettings;
use indexmap::IndexMap;
use thiserror::Error;
use url::Url;

pub mod scripted;

pub use scripted::{ScriptedBehaviour, ScriptedRuntime};

/// Opaque reference to a launched container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerRef {
    pub id: String,
}

impl ContainerRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Everything the runtime needs to launch the emulator image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub image: String,
    pub tag: String,
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub env: IndexMap<String, String>,
    pub probe_path: String,
    /// Upper bound on the runtime's own start sequence, image pull included.
    pub startup_timeout: Duration,
}

impl LaunchSpec {
    pub fn from_settings(settings: &EmulatorSettings) -> Self {
        Self {
            image: settings.image.clone(),
            tag: settings.tag.clone(),
            container_port: settings.container_port,
            host_port: settings.host_port,
            env: settings.env.clone(),
            probe_path: settings.probe_path.clone(),
            startup_timeout: settings.readiness_timeout,
        }
    }

    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

/// Result of a single readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    Pending,
    Exited { code: Option<i64> },
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("launch of {image} failed: {reason}")]
    Launch { image: String, reason: String },

    #[error("unknown container {id}")]
    UnknownContainer { id: String },

    #[error("{operation} failed for container {id}: {reason}")]
    Operation {
        operation: &'static str,
        id: String,
        reason: String,
    },
}

impl RuntimeError {
    pub fn operation(operation: &'static str, container: &ContainerRef, reason: impl ToString) -> Self {
        Self::Operation {
            operation,
            id: container.id.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Launch the image described by `spec` and return without waiting for readiness.
    async fn launch(&self, spec: &LaunchSpec) -> Result<ContainerRef, RuntimeError>;

    /// Run one readiness probe. Errors are treated as "not ready yet" by callers.
    async fn probe(&self, container: &ContainerRef) -> Result<ProbeOutcome, RuntimeError>;

    async fn endpoint(&self, container: &ContainerRef) -> Result<Url, RuntimeError>;

    fn access_key(&self, container: &ContainerRef) -> Result<String, RuntimeError>;

    /// PEM-encoded certificate(s) a client must trust to reach the endpoint.
    async fn trust_material(&self, container: &ContainerRef) -> Result<Vec<u8>, RuntimeError>;

    /// Stop and remove the container. Stopping an unknown container succeeds.
    async fn stop(&self, container: &ContainerRef) -> Result<(), RuntimeError>;
}
