//! ---
//! eph_section: "02-harness-lifecycle"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Error taxonomy for startup, extraction, export and teardown."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::LifecycleState;
use crate::process::ProcessState;
use crate::runtime::RuntimeError;

/// Failures while launching the emulator or waiting for readiness.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The container runtime refused to launch the image.
    #[error("failed to launch {image}: {source}")]
    Launch {
        /// Image reference that was requested.
        image: String,
        /// Underlying runtime failure.
        #[source]
        source: RuntimeError,
    },

    /// The readiness probe did not succeed within the timeout.
    #[error("emulator not ready after {timeout:?}")]
    StartupTimeout {
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The container exited before it became ready.
    #[error("emulator exited before readiness (exit code {exit_code:?})")]
    ProcessCrashed {
        /// Exit code reported by the runtime, when known.
        exit_code: Option<i64>,
    },

    /// Readiness succeeded but the endpoint could not be resolved.
    #[error("unable to resolve emulator endpoint: {source}")]
    Endpoint {
        /// Underlying runtime failure.
        #[source]
        source: RuntimeError,
    },

    /// The operation does not apply to the handle's current state.
    #[error("emulator handle is {state}, expected {expected}")]
    InvalidState {
        /// Current handle state.
        state: ProcessState,
        /// State the operation requires.
        expected: ProcessState,
    },
}

/// Failures while reading credentials from a running emulator.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Key material was requested before readiness.
    #[error("emulator is {state}, key material requires ready")]
    NotReady {
        /// Current handle state.
        state: ProcessState,
    },

    /// The runtime returned an empty access key.
    #[error("emulator reported an empty access key")]
    EmptyKey,

    /// The runtime failed to provide key or trust material.
    #[error("credential extraction failed: {source}")]
    Runtime {
        /// Underlying runtime failure.
        #[source]
        source: RuntimeError,
    },
}

/// Failures while writing the trust store.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Filesystem failure; nothing is left at the artifact path.
    #[error("unable to write trust store at {path}: {source}")]
    Write {
        /// Path being written.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },

    /// The material could not be encoded as (or decoded from) PKCS12.
    #[error("trust store encoding failed: {reason}")]
    Encoding {
        /// Description of the encoding failure.
        reason: String,
    },
}

/// Session-level failures returned by [`crate::HarnessLifecycle::begin`].
#[derive(Debug, Error)]
pub enum HarnessError {
    /// `begin` was already called on this instance.
    #[error("harness already started (state {state})")]
    AlreadyStarted {
        /// State observed by the rejected call.
        state: LifecycleState,
    },

    /// The server port could not be reserved.
    #[error("server port {port} unavailable: {source}")]
    PortUnavailable {
        /// Requested port.
        port: u16,
        /// Bind failure.
        #[source]
        source: std::io::Error,
    },

    /// Emulator startup failed.
    #[error("startup failed during {state}: {source}")]
    Startup {
        /// Lifecycle state at failure.
        state: LifecycleState,
        /// Underlying startup failure.
        #[source]
        source: StartupError,
    },

    /// Credential extraction failed.
    #[error("credential extraction failed during {state}: {source}")]
    Extraction {
        /// Lifecycle state at failure.
        state: LifecycleState,
        /// Underlying extraction failure.
        #[source]
        source: ExtractionError,
    },

    /// Trust-store export failed.
    #[error("trust store export failed during {state}: {source}")]
    Export {
        /// Lifecycle state at failure.
        state: LifecycleState,
        /// Underlying export failure.
        #[source]
        source: ExportError,
    },
}

impl HarnessError {
    /// Lifecycle state in which the error was raised.
    pub fn state(&self) -> LifecycleState {
        match self {
            Self::AlreadyStarted { state }
            | Self::Startup { state, .. }
            | Self::Extraction { state, .. }
            | Self::Export { state, .. } => *state,
            Self::PortUnavailable { .. } => LifecycleState::Starting,
        }
    }

    /// True when the failure came from the readiness timeout.
    pub fn is_startup_timeout(&self) -> bool {
        matches!(
            self,
            Self::Startup {
                source: StartupError::StartupTimeout { .. },
                ..
            }
        )
    }
}

/// Non-fatal failures collected during teardown.
#[derive(Debug, Error)]
pub enum TeardownError {
    /// Stopping the emulator failed.
    #[error("failed to stop emulator: {source}")]
    Stop {
        /// Underlying runtime failure.
        #[source]
        source: RuntimeError,
    },

    /// Deleting the trust-store artifact failed.
    #[error("failed to remove trust store {path}: {source}")]
    ArtifactRemoval {
        /// Artifact path.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },

    /// Removing the scoped temporary directory failed.
    #[error("failed to remove scope {path}: {source}")]
    ScopeRemoval {
        /// Scope directory.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },
}
