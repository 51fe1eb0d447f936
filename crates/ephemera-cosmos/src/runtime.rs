//! ---
//! eph_section: "04-cosmos-emulator"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Container runtime backed by testcontainers for the Cosmos DB emulator."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::models::{ContainerState, ContainerStateStatusEnum};
use bollard::Docker;
use ephemera_core::runtime::{ContainerRef, ContainerRuntime, LaunchSpec, ProbeOutcome, RuntimeError};
use parking_lot::Mutex;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// Well-known account key of the Cosmos DB emulator.
pub const EMULATOR_KEY: &str =
    "C2y6yDjf5/R+ob0N8A7Cgv30VRDJIWEHLM+4QDU5DE2nQ9nDuVTqobD4b8mGGyPMbIZnqyMsEcaGQy67XIw/Jw==";

const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RuntimeSetupError {
    #[error("unable to build probe client: {0}")]
    ProbeClient(#[from] reqwest::Error),

    #[error("unable to configure docker client: {0}")]
    Docker(#[from] bollard::errors::Error),
}

/// A started emulator together with what the probe needs to reach it.
struct RunningEmulator {
    container: Arc<ContainerAsync<GenericImage>>,
    container_port: u16,
    probe_path: String,
}

/// Runs the emulator image through the local Docker daemon.
///
/// The emulator serves its certificate over its own self-signed TLS, so the
/// probe client skips verification. Clients built from the published settings
/// verify against the exported trust store instead.
pub struct CosmosEmulatorRuntime {
    probe_client: reqwest::Client,
    docker: Docker,
    running: Mutex<HashMap<String, RunningEmulator>>,
}

impl CosmosEmulatorRuntime {
    /// Connects lazily; `DOCKER_HOST` is honoured the same way testcontainers does.
    pub fn new() -> Result<Self, RuntimeSetupError> {
        let probe_client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(PROBE_REQUEST_TIMEOUT)
            .build()?;
        let docker = Docker::connect_with_defaults()?;
        Ok(Self {
            probe_client,
            docker,
            running: Mutex::new(HashMap::new()),
        })
    }

    fn lookup(
        &self,
        container: &ContainerRef,
    ) -> Result<(Arc<ContainerAsync<GenericImage>>, u16, String), RuntimeError> {
        self.running
            .lock()
            .get(&container.id)
            .map(|entry| {
                (
                    Arc::clone(&entry.container),
                    entry.container_port,
                    entry.probe_path.clone(),
                )
            })
            .ok_or_else(|| RuntimeError::UnknownContainer {
                id: container.id.clone(),
            })
    }

    async fn resolve_endpoint(&self, container: &ContainerRef) -> Result<Url, RuntimeError> {
        let (running, port, _) = self.lookup(container)?;
        let host = running
            .get_host()
            .await
            .map_err(|err| RuntimeError::operation("endpoint", container, err))?;
        let host_port = running
            .get_host_port_ipv4(port.tcp())
            .await
            .map_err(|err| RuntimeError::operation("endpoint", container, err))?;
        Url::parse(&format!("https://{host}:{host_port}/"))
            .map_err(|err| RuntimeError::operation("endpoint", container, err))
    }

    async fn certificate_url(&self, container: &ContainerRef) -> Result<Url, RuntimeError> {
        let (_, _, probe_path) = self.lookup(container)?;
        self.resolve_endpoint(container)
            .await?
            .join(&probe_path)
            .map_err(|err| RuntimeError::operation("endpoint", container, err))
    }
}

#[async_trait]
impl ContainerRuntime for CosmosEmulatorRuntime {
    async fn launch(&self, spec: &LaunchSpec) -> Result<ContainerRef, RuntimeError> {
        let image = spec.image_reference();
        let mut request = GenericImage::new(spec.image.as_str(), spec.tag.as_str())
            .with_exposed_port(spec.container_port.tcp())
            .with_startup_timeout(spec.startup_timeout);
        if let Some(host_port) = spec.host_port {
            request = request.with_mapped_port(host_port, spec.container_port.tcp());
        }
        for (key, value) in &spec.env {
            request = request.with_env_var(key.as_str(), value.as_str());
        }
        let started = request.start().await.map_err(|err| RuntimeError::Launch {
            image: image.clone(),
            reason: err.to_string(),
        })?;
        let container = ContainerRef::new(started.id());
        info!(%image, container = %container.id, "cosmos emulator container started");
        self.running.lock().insert(
            container.id.clone(),
            RunningEmulator {
                container: Arc::new(started),
                container_port: spec.container_port,
                probe_path: spec.probe_path.clone(),
            },
        );
        Ok(container)
    }

    async fn probe(&self, container: &ContainerRef) -> Result<ProbeOutcome, RuntimeError> {
        self.lookup(container)?;
        let inspected = self
            .docker
            .inspect_container(&container.id, None)
            .await
            .map_err(|err| RuntimeError::operation("probe", container, err))?;
        if let Some(exited) = exit_outcome(inspected.state.as_ref()) {
            warn!(container = %container.id, ?exited, "emulator container is no longer running");
            return Ok(exited);
        }
        let url = self.certificate_url(container).await?;
        match self.probe_client.get(url).send().await {
            Ok(response) if response.status().is_success() => Ok(ProbeOutcome::Ready),
            Ok(response) => {
                debug!(container = %container.id, status = %response.status(), "emulator not ready");
                Ok(ProbeOutcome::Pending)
            }
            Err(err) => {
                debug!(container = %container.id, error = %err, "emulator not reachable yet");
                Ok(ProbeOutcome::Pending)
            }
        }
    }

    async fn endpoint(&self, container: &ContainerRef) -> Result<Url, RuntimeError> {
        self.resolve_endpoint(container).await
    }

    fn access_key(&self, container: &ContainerRef) -> Result<String, RuntimeError> {
        self.lookup(container)?;
        Ok(EMULATOR_KEY.to_owned())
    }

    async fn trust_material(&self, container: &ContainerRef) -> Result<Vec<u8>, RuntimeError> {
        let url = self.certificate_url(container).await?;
        let response = self
            .probe_client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| RuntimeError::operation("trust_material", container, err))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RuntimeError::operation("trust_material", container, err))?;
        Ok(bytes.to_vec())
    }

    async fn stop(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        let Some(entry) = self.running.lock().remove(&container.id) else {
            return Ok(());
        };
        match Arc::try_unwrap(entry.container) {
            Ok(owned) => owned
                .rm()
                .await
                .map_err(|err| RuntimeError::operation("stop", container, err))?,
            Err(shared) => {
                warn!(container = %container.id, "container still referenced, stopping without removal");
                shared
                    .stop()
                    .await
                    .map_err(|err| RuntimeError::operation("stop", container, err))?;
            }
        }
        info!(container = %container.id, "cosmos emulator container removed");
        Ok(())
    }
}

/// `Some(Exited)` once the daemon reports the container as exited or dead.
fn exit_outcome(state: Option<&ContainerState>) -> Option<ProbeOutcome> {
    let state = state?;
    match state.status {
        Some(ContainerStateStatusEnum::EXITED | ContainerStateStatusEnum::DEAD) => {
            Some(ProbeOutcome::Exited {
                code: state.exit_code,
            })
        }
        _ => None,
    }
}
