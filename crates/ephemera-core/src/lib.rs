//! ---
//! eph_section: "02-harness-lifecycle"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Harness lifecycle kernel for emulator-backed integration tests."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
//! Brings an external service emulator up for a test session, exports its
//! TLS trust material into a session-scoped PKCS12 store, publishes the
//! connection settings into a [`ConfigurationSink`] and tears everything
//! down again.

pub mod error;
pub mod exporter;
pub mod lifecycle;
pub mod material;
pub mod port;
pub mod process;
pub mod runtime;
pub mod scope;
pub mod sink;

pub use error::{ExportError, ExtractionError, HarnessError, StartupError, TeardownError};
pub use exporter::{TlsTrustSettings, TrustStoreArtifact, TrustStoreExporter, TrustStoreFormat};
pub use lifecycle::{HarnessLifecycle, LifecycleState, TeardownReport};
pub use material::{AccessKey, CredentialMaterial};
pub use port::PortReservation;
pub use process::{EmulatorHandle, EmulatorProcess, ProcessState};
pub use runtime::{
    ContainerRef, ContainerRuntime, LaunchSpec, ProbeOutcome, RuntimeError, ScriptedBehaviour,
    ScriptedRuntime,
};
pub use scope::TempScope;
pub use sink::{ConfigurationSink, MemorySink, PublishedConfig};
