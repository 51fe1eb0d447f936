//! ---
//! eph_section: "04-cosmos-emulator"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Client settings assembled from published harness configuration."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
use std::path::PathBuf;

use ephemera_common::config::PublishKeys;
use ephemera_core::exporter::{TlsTrustSettings, TrustStoreFormat};
use ephemera_core::material::AccessKey;
use ephemera_core::ExportError;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ClientSettingsError {
    #[error("published configuration has no value for {key}")]
    MissingKey { key: String },

    #[error("invalid endpoint {value}: {source}")]
    InvalidEndpoint {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unable to load trust store: {source}")]
    Trust {
        #[source]
        source: ExportError,
    },

    #[error("unable to build http client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },
}

/// Connection settings for a Cosmos DB client talking to the emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosmosClientSettings {
    pub endpoint: Url,
    pub key: AccessKey,
    /// The emulator only supports gateway connections from outside its container.
    pub gateway_mode: bool,
    pub endpoint_discovery: bool,
    pub trust: Option<TlsTrustSettings>,
}

impl CosmosClientSettings {
    /// Build settings from published values.
    ///
    /// `lookup` is typically [`ephemera_core::MemorySink::get`]. The trust store
    /// key is optional; when present the store is opened with the access key.
    pub fn from_lookup<F>(keys: &PublishKeys, lookup: F) -> Result<Self, ClientSettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| ClientSettingsError::MissingKey {
                key: key.to_owned(),
            })
        };
        let raw_endpoint = required(&keys.endpoint_uri)?;
        let endpoint =
            Url::parse(&raw_endpoint).map_err(|source| ClientSettingsError::InvalidEndpoint {
                value: raw_endpoint.clone(),
                source,
            })?;
        let key = AccessKey::new(required(&keys.access_key)?);
        let trust = lookup(&keys.trust_store_path).map(|path| TlsTrustSettings {
            location: PathBuf::from(path),
            password: key.clone(),
            store_type: TrustStoreFormat::Pkcs12,
        });
        Ok(Self {
            endpoint,
            key,
            gateway_mode: true,
            endpoint_discovery: false,
            trust,
        })
    }

    pub fn with_trust(mut self, trust: TlsTrustSettings) -> Self {
        self.trust = Some(trust);
        self
    }

    /// HTTP client trusting exactly the certificates in the exported store.
    pub fn http_client(&self) -> Result<reqwest::Client, ClientSettingsError> {
        let mut builder = reqwest::Client::builder();
        if let Some(trust) = &self.trust {
            let certificates = trust
                .load_certificates()
                .map_err(|source| ClientSettingsError::Trust { source })?;
            builder = builder.tls_built_in_root_certs(false);
            for der in certificates {
                let certificate = reqwest::Certificate::from_der(&der)
                    .map_err(|source| ClientSettingsError::Client { source })?;
                builder = builder.add_root_certificate(certificate);
            }
        }
        builder
            .build()
            .map_err(|source| ClientSettingsError::Client { source })
    }
}
