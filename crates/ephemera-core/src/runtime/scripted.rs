//! ---
//! eph_section: "02-harness-lifecycle"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Deterministic in-process container runtime for tests."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use url::Url;

use super::{ContainerRef, ContainerRuntime, LaunchSpec, ProbeOutcome, RuntimeError};

/// Key returned by [`ScriptedRuntime`] unless overridden.
pub const SCRIPTED_ACCESS_KEY: &str = "c2NyaXB0ZWQtZW11bGF0b3Ita2V5";

/// How a scripted container behaves after launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedBehaviour {
    /// Probes succeed once `delay` has elapsed since launch.
    ReadyAfter(Duration),
    /// Probes never succeed.
    NeverReady,
    /// The container exits with `exit_code` once `after` has elapsed.
    CrashAfter { after: Duration, exit_code: i64 },
    /// `launch` itself fails.
    FailLaunch { reason: String },
}

/// Container runtime driven by a script instead of a container engine.
///
/// Time is read from `tokio::time`, so tests running on a paused clock see
/// readiness delays elapse instantly. Launch and stop calls are counted.
#[derive(Debug)]
pub struct ScriptedRuntime {
    behaviour: ScriptedBehaviour,
    endpoint: Url,
    access_key: String,
    trust_material: Vec<u8>,
    stop_failure: Option<String>,
    launches: AtomicUsize,
    stops: AtomicUsize,
    running: Mutex<HashMap<String, Instant>>,
}

impl ScriptedRuntime {
    /// Construct a runtime serving `trust_material` (PEM) from every container.
    pub fn new(behaviour: ScriptedBehaviour, trust_material: impl Into<Vec<u8>>) -> Self {
        Self {
            behaviour,
            endpoint: Url::parse("https://127.0.0.1:8081/").expect("static endpoint parses"),
            access_key: SCRIPTED_ACCESS_KEY.to_owned(),
            trust_material: trust_material.into(),
            stop_failure: None,
            launches: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_access_key(mut self, key: impl Into<String>) -> Self {
        self.access_key = key.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Make every `stop` fail with `reason`, leaving the container running.
    pub fn with_failing_stop(mut self, reason: impl Into<String>) -> Self {
        self.stop_failure = Some(reason.into());
        self
    }

    /// Number of `launch` calls, successful or not.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls that hit a running container.
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Number of containers currently running.
    pub fn running(&self) -> usize {
        self.running.lock().len()
    }

    fn launched_at(&self, container: &ContainerRef) -> Result<Instant, RuntimeError> {
        self.running
            .lock()
            .get(&container.id)
            .copied()
            .ok_or_else(|| RuntimeError::UnknownContainer {
                id: container.id.clone(),
            })
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn launch(&self, spec: &LaunchSpec) -> Result<ContainerRef, RuntimeError> {
        let ordinal = self.launches.fetch_add(1, Ordering::SeqCst);
        if let ScriptedBehaviour::FailLaunch { reason } = &self.behaviour {
            return Err(RuntimeError::Launch {
                image: spec.image_reference(),
                reason: reason.clone(),
            });
        }
        let container = ContainerRef::new(format!("scripted-{ordinal}"));
        self.running
            .lock()
            .insert(container.id.clone(), Instant::now());
        Ok(container)
    }

    async fn probe(&self, container: &ContainerRef) -> Result<ProbeOutcome, RuntimeError> {
        let Ok(launched_at) = self.launched_at(container) else {
            return Ok(ProbeOutcome::Exited { code: None });
        };
        let elapsed = launched_at.elapsed();
        let outcome = match &self.behaviour {
            ScriptedBehaviour::ReadyAfter(delay) if elapsed >= *delay => ProbeOutcome::Ready,
            ScriptedBehaviour::CrashAfter { after, exit_code } if elapsed >= *after => {
                self.running.lock().remove(&container.id);
                ProbeOutcome::Exited {
                    code: Some(*exit_code),
                }
            }
            _ => ProbeOutcome::Pending,
        };
        Ok(outcome)
    }

    async fn endpoint(&self, container: &ContainerRef) -> Result<Url, RuntimeError> {
        self.launched_at(container)?;
        Ok(self.endpoint.clone())
    }

    fn access_key(&self, container: &ContainerRef) -> Result<String, RuntimeError> {
        self.launched_at(container)?;
        Ok(self.access_key.clone())
    }

    async fn trust_material(&self, container: &ContainerRef) -> Result<Vec<u8>, RuntimeError> {
        self.launched_at(container)?;
        Ok(self.trust_material.clone())
    }

    async fn stop(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        if let Some(reason) = &self.stop_failure {
            return Err(RuntimeError::operation("stop", container, reason));
        }
        if self.running.lock().remove(&container.id).is_some() {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
