//! ---
//! eph_section: "04-cosmos-emulator"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Azure Cosmos DB emulator adapter for the harness."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
//! Wires the harness to the Linux Cosmos DB emulator image and turns the
//! published settings back into a client configuration.

use std::sync::Arc;

use ephemera_common::config::HarnessSettings;
use ephemera_core::{ConfigurationSink, HarnessLifecycle};

pub mod client;
pub mod runtime;

pub use client::{ClientSettingsError, CosmosClientSettings};
pub use runtime::{CosmosEmulatorRuntime, RuntimeSetupError, EMULATOR_KEY};

/// Harness driving the Cosmos DB emulator.
pub type CosmosHarness<S> = HarnessLifecycle<CosmosEmulatorRuntime, S>;

/// Build a harness for `settings` publishing into `sink`.
pub fn cosmos_harness<S: ConfigurationSink + ?Sized>(
    settings: HarnessSettings,
    sink: Arc<S>,
) -> Result<CosmosHarness<S>, RuntimeSetupError> {
    let runtime = Arc::new(CosmosEmulatorRuntime::new()?);
    Ok(HarnessLifecycle::new(settings, runtime, sink))
}
