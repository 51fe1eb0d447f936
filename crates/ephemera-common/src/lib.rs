//! ---
//! eph_section: "01-core-functionality"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Shared settings for the harness workspace."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
//! Shared primitives for the Ephemera workspace.
//! This crate owns the settings model and its layered loading.

pub mod config;

pub use config::{
    EmulatorSettings, HarnessSettings, LoadedSettings, LogFormat, LoggingConfig, PublishKeys,
    PublishSettings, TrustStoreSettings, DEFAULT_PROFILE,
};
