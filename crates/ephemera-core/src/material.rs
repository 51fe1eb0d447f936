//! ---
//! eph_section: "02-harness-lifecycle"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Credential material extracted from a running emulator."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
use std::fmt;

use url::Url;

/// Secret access key; never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessKey(String);

impl AccessKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Reveal the key for publication or trust-store encryption.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessKey(***)")
    }
}

/// Endpoint, key and trust material of one ready emulator.
///
/// Moved into the exporter and dropped once the trust store is written.
#[derive(Clone)]
pub struct CredentialMaterial {
    endpoint: Url,
    access_key: AccessKey,
    trust_material: Vec<u8>,
}

impl CredentialMaterial {
    pub fn new(endpoint: Url, access_key: AccessKey, trust_material: Vec<u8>) -> Self {
        Self {
            endpoint,
            access_key,
            trust_material,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn access_key(&self) -> &AccessKey {
        &self.access_key
    }

    /// PEM certificate bytes served by the emulator.
    pub fn trust_material(&self) -> &[u8] {
        &self.trust_material
    }

    pub fn into_parts(self) -> (Url, AccessKey, Vec<u8>) {
        (self.endpoint, self.access_key, self.trust_material)
    }
}

impl fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialMaterial")
            .field("endpoint", &self.endpoint.as_str())
            .field("access_key", &self.access_key)
            .field("trust_material_len", &self.trust_material.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_key() {
        let material = CredentialMaterial::new(
            Url::parse("https://127.0.0.1:8081/").unwrap(),
            AccessKey::new("super-secret"),
            b"-----BEGIN CERTIFICATE-----".to_vec(),
        );
        let rendered = format!("{material:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("AccessKey(***)"));
        assert!(rendered.contains("trust_material_len: 27"));
    }

    #[test]
    fn into_parts_returns_owned_values() {
        let material = CredentialMaterial::new(
            Url::parse("https://localhost:8081/").unwrap(),
            AccessKey::new("key"),
            vec![1, 2, 3],
        );
        let (endpoint, key, bytes) = material.into_parts();
        assert_eq!(endpoint.port(), Some(8081));
        assert_eq!(key.expose(), "key");
        assert_eq!(bytes, vec![1, 2, 3]);
    }
}
