//! ---
//! eph_section: "01-core-functionality"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Harness settings model and layered loading."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

/// Profile applied when neither the caller nor `EPHEMERA_PROFILE` selects one.
pub const DEFAULT_PROFILE: &str = "integration-test";

fn default_profile() -> String {
    DEFAULT_PROFILE.to_owned()
}

fn default_image() -> String {
    "mcr.microsoft.com/cosmosdb/linux/azure-cosmos-emulator".to_owned()
}

fn default_tag() -> String {
    "latest".to_owned()
}

fn default_container_port() -> u16 {
    8081
}

fn default_host_port() -> Option<u16> {
    Some(8081)
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_probe_path() -> String {
    "/_explorer/emulator.pem".to_owned()
}

fn default_trust_store_file() -> String {
    "azure-cosmos-emulator.keystore".to_owned()
}

fn default_trust_store_alias() -> String {
    "cosmos-emulator".to_owned()
}

fn default_server_port() -> u16 {
    8090
}

fn default_endpoint_key() -> String {
    "azure.cosmosdb.uri".to_owned()
}

fn default_access_key_key() -> String {
    "azure.cosmosdb.key".to_owned()
}

fn default_server_port_key() -> String {
    "server.port".to_owned()
}

fn default_trust_store_key() -> String {
    "azure.cosmosdb.trust-store".to_owned()
}

/// Top-level settings for one harness session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessSettings {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default)]
    pub emulator: EmulatorSettings,
    #[serde(default)]
    pub trust_store: TrustStoreSettings,
    #[serde(default)]
    pub publish: PublishSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings together with the directory they were resolved from.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: HarnessSettings,
    pub source_dir: PathBuf,
}

impl HarnessSettings {
    /// Explicit settings file, layered above the profile files.
    pub const ENV_CONFIG_PATH: &'static str = "EPHEMERA_CONFIG";
    /// Overrides the active profile.
    pub const ENV_PROFILE: &'static str = "EPHEMERA_PROFILE";
    /// Prefix for `EPHEMERA__SECTION__FIELD` overrides.
    pub const ENV_PREFIX: &'static str = "EPHEMERA";

    /// Load settings from `config_dir`, honouring `EPHEMERA_PROFILE`.
    ///
    /// Layers, lowest precedence first: `harness.toml`, `harness.{profile}.toml`,
    /// the file named by `EPHEMERA_CONFIG`, then `EPHEMERA__*` variables.
    /// Missing files are skipped; the merged result must validate.
    pub fn load(config_dir: impl AsRef<Path>) -> Result<LoadedSettings> {
        let profile = std::env::var(Self::ENV_PROFILE)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(default_profile);
        Self::load_profile(config_dir, &profile)
    }

    /// Load settings for an explicit profile.
    pub fn load_profile(config_dir: impl AsRef<Path>, profile: &str) -> Result<LoadedSettings> {
        let dir = config_dir.as_ref();
        let base = dir.join("harness.toml");
        let overlay = dir.join(format!("harness.{profile}.toml"));
        debug!(base = %base.display(), overlay = %overlay.display(), %profile, "loading harness settings");

        let mut builder = Config::builder()
            .add_source(File::from(base.as_path()).required(false))
            .add_source(File::from(overlay.as_path()).required(false));

        if let Ok(explicit) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !explicit.trim().is_empty() {
                builder = builder.add_source(File::from(PathBuf::from(explicit)).required(true));
            }
        }

        let merged = builder
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("unable to merge harness settings from {}", dir.display()))?;

        let mut settings: HarnessSettings = merged
            .try_deserialize()
            .with_context(|| "failed to deserialise harness settings")?;
        settings.profile = profile.to_owned();
        settings.validate()?;
        Ok(LoadedSettings {
            settings,
            source_dir: dir.to_path_buf(),
        })
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.emulator.validate()?;
        self.trust_store.validate()?;
        self.publish.keys.validate()?;
        Ok(())
    }
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            emulator: EmulatorSettings::default(),
            trust_store: TrustStoreSettings::default(),
            publish: PublishSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for HarnessSettings {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let settings: HarnessSettings =
            toml::from_str(content).with_context(|| "failed to parse harness settings")?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Container image, port mapping and readiness parameters.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorSettings {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    /// Fixed host port; `None` lets the runtime pick one.
    #[serde(default = "default_host_port")]
    pub host_port: Option<u16>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default = "default_readiness_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub readiness_timeout: Duration,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval_ms: Duration,
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
}

impl EmulatorSettings {
    /// `image:tag` reference handed to the container runtime.
    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() || self.tag.trim().is_empty() {
            return Err(anyhow!("emulator image and tag must be set"));
        }
        if self.container_port == 0 {
            return Err(anyhow!("emulator container_port must be non-zero"));
        }
        if self.readiness_timeout.is_zero() {
            return Err(anyhow!("emulator readiness_timeout must be positive"));
        }
        if self.poll_interval_ms.is_zero() || self.poll_interval_ms > self.readiness_timeout {
            return Err(anyhow!(
                "emulator poll interval must be positive and no longer than the readiness timeout"
            ));
        }
        if !self.probe_path.starts_with('/') {
            return Err(anyhow!(
                "emulator probe_path '{}' must be absolute",
                self.probe_path
            ));
        }
        Ok(())
    }
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self {
            image: default_image(),
            tag: default_tag(),
            container_port: default_container_port(),
            host_port: default_host_port(),
            env: IndexMap::new(),
            readiness_timeout: default_readiness_timeout(),
            poll_interval_ms: default_poll_interval(),
            probe_path: default_probe_path(),
        }
    }
}

/// Where and how the exported trust store is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustStoreSettings {
    #[serde(default = "default_trust_store_file")]
    pub file_name: String,
    #[serde(default = "default_trust_store_alias")]
    pub alias: String,
    /// Parent directory for the session scope; the system temp dir when unset.
    #[serde(default)]
    pub temp_root: Option<PathBuf>,
}

impl TrustStoreSettings {
    pub fn validate(&self) -> Result<()> {
        let name = self.file_name.trim();
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(anyhow!(
                "trust_store file_name '{}' must be a bare file name",
                self.file_name
            ));
        }
        if self.alias.trim().is_empty() {
            return Err(anyhow!("trust_store alias cannot be empty"));
        }
        Ok(())
    }
}

impl Default for TrustStoreSettings {
    fn default() -> Self {
        Self {
            file_name: default_trust_store_file(),
            alias: default_trust_store_alias(),
            temp_root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSettings {
    /// Port reserved for the application under test.
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default)]
    pub keys: PublishKeys,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            keys: PublishKeys::default(),
        }
    }
}

/// Names of the four published configuration keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishKeys {
    #[serde(default = "default_endpoint_key")]
    pub endpoint_uri: String,
    #[serde(default = "default_access_key_key")]
    pub access_key: String,
    #[serde(default = "default_server_port_key")]
    pub server_port: String,
    #[serde(default = "default_trust_store_key")]
    pub trust_store_path: String,
}

impl PublishKeys {
    pub fn as_array(&self) -> [&str; 4] {
        [
            &self.endpoint_uri,
            &self.access_key,
            &self.server_port,
            &self.trust_store_path,
        ]
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for key in self.as_array() {
            if key.trim().is_empty() {
                return Err(anyhow!("published configuration keys cannot be empty"));
            }
            if !seen.insert(key) {
                return Err(anyhow!("published configuration key '{}' is duplicated", key));
            }
        }
        Ok(())
    }
}

impl Default for PublishKeys {
    fn default() -> Self {
        Self {
            endpoint_uri: default_endpoint_key(),
            access_key: default_access_key_key(),
            server_port: default_server_port_key(),
            trust_store_path: default_trust_store_key(),
        }
    }
}

/// Available log formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// When set, a daily rolling JSON log is written here as well.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}
