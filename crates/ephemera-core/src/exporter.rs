//! ---
//! eph_section: "02-harness-lifecycle"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "PKCS12 trust-store export of emulator certificates."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
//! The emulator serves a self-signed certificate. Clients built for the
//! session load it from a PKCS12 store whose password is the emulator access
//! key.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ephemera_common::config::TrustStoreSettings;
use p12_keystore::{Certificate, KeyStore, KeyStoreEntry};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::ExportError;
use crate::material::{AccessKey, CredentialMaterial};
use crate::scope::TempScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustStoreFormat {
    #[default]
    Pkcs12,
}

impl TrustStoreFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustStoreFormat::Pkcs12 => "PKCS12",
        }
    }
}

impl fmt::Display for TrustStoreFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TLS trust configuration a client needs to reach the emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsTrustSettings {
    pub location: PathBuf,
    pub password: AccessKey,
    pub store_type: TrustStoreFormat,
}

impl TlsTrustSettings {
    /// Open the store and return the DER bytes of every trusted certificate.
    pub fn load_certificates(&self) -> Result<Vec<Vec<u8>>, ExportError> {
        let data = std::fs::read(&self.location).map_err(|source| ExportError::Write {
            path: self.location.clone(),
            source,
        })?;
        let store = KeyStore::from_pkcs12(&data, self.password.expose()).map_err(|err| {
            ExportError::Encoding {
                reason: format!("unable to open {}: {err}", self.location.display()),
            }
        })?;
        let certificates: Vec<Vec<u8>> = store
            .entries()
            .filter_map(|(_, entry)| match entry {
                KeyStoreEntry::Certificate(cert) => Some(cert.as_der().to_vec()),
                _ => None,
            })
            .collect();
        if certificates.is_empty() {
            return Err(ExportError::Encoding {
                reason: format!("{} holds no trusted certificates", self.location.display()),
            });
        }
        Ok(certificates)
    }
}

/// Trust store written for one session.
#[derive(Debug)]
pub struct TrustStoreArtifact {
    path: PathBuf,
    password: AccessKey,
    format: TrustStoreFormat,
    certificates: usize,
}

impl TrustStoreArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn password(&self) -> &AccessKey {
        &self.password
    }

    pub fn format(&self) -> TrustStoreFormat {
        self.format
    }

    /// Number of certificate entries in the store.
    pub fn certificates(&self) -> usize {
        self.certificates
    }

    pub fn tls_settings(&self) -> TlsTrustSettings {
        TlsTrustSettings {
            location: self.path.clone(),
            password: self.password.clone(),
            store_type: self.format,
        }
    }

    /// Delete the store. A missing file counts as removed.
    pub fn remove(self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

/// Converts emulator trust material into a PKCS12 file inside a session scope.
#[derive(Debug, Clone)]
pub struct TrustStoreExporter {
    file_name: String,
    alias: String,
}

impl TrustStoreExporter {
    pub fn new(file_name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            alias: alias.into(),
        }
    }

    pub fn from_settings(settings: &TrustStoreSettings) -> Self {
        Self::new(settings.file_name.clone(), settings.alias.clone())
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn export(
        &self,
        material: CredentialMaterial,
        scope: &TempScope,
    ) -> Result<TrustStoreArtifact, ExportError> {
        let (_, access_key, trust_material) = material.into_parts();
        let certificates = parse_certificates(&trust_material)?;
        let encoded = self.encode(&certificates, &access_key)?;
        let path = scope.join(&self.file_name);
        write_atomically(scope.path(), &path, &encoded)?;
        info!(path = %path.display(), certificates = certificates.len(), "trust store exported");
        Ok(TrustStoreArtifact {
            path,
            password: access_key,
            format: TrustStoreFormat::Pkcs12,
            certificates: certificates.len(),
        })
    }

    fn encode(&self, certificates: &[Vec<u8>], password: &AccessKey) -> Result<Vec<u8>, ExportError> {
        let mut store = KeyStore::new();
        for (index, der) in certificates.iter().enumerate() {
            let certificate = Certificate::from_der(der).map_err(|err| ExportError::Encoding {
                reason: format!("certificate {index} is not valid X.509: {err}"),
            })?;
            let alias = if index == 0 {
                self.alias.clone()
            } else {
                format!("{}-{index}", self.alias)
            };
            store.add_entry(&alias, KeyStoreEntry::Certificate(certificate));
        }
        store
            .writer(password.expose())
            .write()
            .map_err(|err| ExportError::Encoding {
                reason: err.to_string(),
            })
    }
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<Vec<u8>>, ExportError> {
    let mut reader = pem;
    let certificates = rustls_pemfile::certs(&mut reader)
        .map(|item| item.map(|der| der.as_ref().to_vec()))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|err| ExportError::Encoding {
            reason: format!("malformed PEM: {err}"),
        })?;
    if certificates.is_empty() {
        return Err(ExportError::Encoding {
            reason: "no certificate found in trust material".to_owned(),
        });
    }
    debug!(count = certificates.len(), "parsed emulator certificates");
    Ok(certificates)
}

fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let write_err = |source| ExportError::Write {
        path: target.to_path_buf(),
        source,
    };
    let mut staged = NamedTempFile::new_in(dir).map_err(write_err)?;
    staged.write_all(bytes).map_err(write_err)?;
    staged.as_file().sync_all().map_err(write_err)?;
    staged
        .persist(target)
        .map_err(|err| write_err(err.error))?;
    Ok(())
}
