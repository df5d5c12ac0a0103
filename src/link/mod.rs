//! Device-link records.
//!
//! A [`DeviceLink`] pairs one master (primary account) key with one slave
//! (secondary device) key. It is only valid when both signatures verify:
//! the request signature against the master key, the grant signature
//! against the slave key.
//!
//! A [`DeviceLinkSet`] is every link for one master key. The directory and
//! the local store only ever replace or clear a whole set, never a single
//! entry.

pub mod device;
pub mod signature;

pub use device::Device;
pub use signature::{public_key_hex, SignatureKind, PUBLIC_KEY_LEN, SIGNATURE_LEN};

use ring::signature::Ed25519KeyPair;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Why a candidate link failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkCheckError {
    #[error("{role} key is malformed: {reason}")]
    InvalidKey { role: &'static str, reason: String },
    #[error("master and slave share the same key")]
    SameKey,
    #[error("request signature does not verify against the master key")]
    RequestSignature,
    #[error("grant signature does not verify against the slave key")]
    GrantSignature,
}

/// A signed pairing between a master account key and a slave device key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceLink {
    pub master_public_key: String,
    pub slave_public_key: String,
    #[serde(with = "b64")]
    pub request_signature: Vec<u8>,
    #[serde(with = "b64")]
    pub grant_signature: Vec<u8>,
}

impl DeviceLink {
    /// An unsigned link for the given pair. Sign it with
    /// [`sign_request`](Self::sign_request) and [`sign_grant`](Self::sign_grant).
    pub fn new(master_public_key: impl Into<String>, slave_public_key: impl Into<String>) -> Self {
        Self {
            master_public_key: master_public_key.into(),
            slave_public_key: slave_public_key.into(),
            request_signature: Vec::new(),
            grant_signature: Vec::new(),
        }
    }

    fn decoded_keys(&self) -> Result<([u8; PUBLIC_KEY_LEN], [u8; PUBLIC_KEY_LEN]), LinkCheckError> {
        let master = signature::decode_public_key(&self.master_public_key).map_err(|reason| {
            LinkCheckError::InvalidKey {
                role: "master",
                reason,
            }
        })?;
        let slave = signature::decode_public_key(&self.slave_public_key).map_err(|reason| {
            LinkCheckError::InvalidKey {
                role: "slave",
                reason,
            }
        })?;
        Ok((master, slave))
    }

    /// Sign the request half with the master's key pair.
    pub fn sign_request(&mut self, master: &Ed25519KeyPair) -> Result<(), LinkCheckError> {
        let (m, s) = self.decoded_keys()?;
        self.request_signature = signature::sign(master, SignatureKind::Request, &m, &s);
        Ok(())
    }

    /// Sign the grant half with the slave's key pair.
    pub fn sign_grant(&mut self, slave: &Ed25519KeyPair) -> Result<(), LinkCheckError> {
        let (m, s) = self.decoded_keys()?;
        self.grant_signature = signature::sign(slave, SignatureKind::Grant, &m, &s);
        Ok(())
    }

    /// Check key shape, distinct keys, and both signatures.
    pub fn verify(&self) -> Result<(), LinkCheckError> {
        let (m, s) = self.decoded_keys()?;
        if m == s {
            return Err(LinkCheckError::SameKey);
        }
        if !signature::verify(&m, SignatureKind::Request, &m, &s, &self.request_signature) {
            return Err(LinkCheckError::RequestSignature);
        }
        if !signature::verify(&s, SignatureKind::Grant, &m, &s, &self.grant_signature) {
            return Err(LinkCheckError::GrantSignature);
        }
        Ok(())
    }

    /// Whether this link pairs exactly `master` and `slave`.
    pub fn pairs(&self, master: &str, slave: &str) -> bool {
        self.master_public_key == master && self.slave_public_key == slave
    }
}

/// Every device link for one master key, keyed by (master, slave).
///
/// Inserting a link for an existing pair replaces it, so the set can never
/// hold two links for the same pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<DeviceLink>", into = "Vec<DeviceLink>")]
pub struct DeviceLinkSet {
    links: BTreeMap<(String, String), DeviceLink>,
}

impl DeviceLinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the link for its (master, slave) pair.
    /// Returns `true` if the pair was not present before.
    pub fn insert(&mut self, link: DeviceLink) -> bool {
        let key = (link.master_public_key.clone(), link.slave_public_key.clone());
        self.links.insert(key, link).is_none()
    }

    pub fn get(&self, master: &str, slave: &str) -> Option<&DeviceLink> {
        self.links.get(&(master.to_string(), slave.to_string()))
    }

    pub fn contains(&self, master: &str, slave: &str) -> bool {
        self.get(master, slave).is_some()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceLink> {
        self.links.values()
    }
}

impl From<Vec<DeviceLink>> for DeviceLinkSet {
    fn from(links: Vec<DeviceLink>) -> Self {
        links.into_iter().collect()
    }
}

impl From<DeviceLinkSet> for Vec<DeviceLink> {
    fn from(set: DeviceLinkSet) -> Self {
        set.links.into_values().collect()
    }
}

impl FromIterator<DeviceLink> for DeviceLinkSet {
    fn from_iter<I: IntoIterator<Item = DeviceLink>>(iter: I) -> Self {
        let mut set = Self::new();
        for link in iter {
            set.insert(link);
        }
        set
    }
}

impl IntoIterator for DeviceLinkSet {
    type Item = DeviceLink;
    type IntoIter = std::collections::btree_map::IntoValues<(String, String), DeviceLink>;

    fn into_iter(self) -> Self::IntoIter {
        self.links.into_values()
    }
}

/// Signatures travel as standard base64 strings.
mod b64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
