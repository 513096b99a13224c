//! Node identity, discovery group tags, and the connection dedupe key.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of a randomly generated [`Identity`].
pub const IDENTITY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IdentityError {
    #[error("identity must not be empty")]
    Empty,
    #[error("invalid identity hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Fixed-length byte string naming one swarm instance.
///
/// Sent as the handshake payload in both directions; two engines sharing an
/// identity are indistinguishable, which is how self-connections are detected.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Identity(Bytes);

impl Identity {
    /// Generate a fresh random identity of [`IDENTITY_LEN`] bytes.
    pub fn random() -> Self {
        let mut bytes = [0u8; IDENTITY_LEN];
        rand::rng().fill(&mut bytes);
        Self(Bytes::copy_from_slice(&bytes))
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self, IdentityError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Dedupe key of a connection to this identity under `group`.
    pub fn connection_key(&self, group: Option<&GroupTag>) -> ConnectionKey {
        ConnectionKey::new(self, group)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Identity").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(hex::decode(s)?)
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Opaque identifier of a discovery group (the overlay topic a peer was found under).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupTag(Bytes);

impl GroupTag {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for GroupTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.debug_tuple("GroupTag").field(&s).finish(),
            Err(_) => f.debug_tuple("GroupTag").field(&self.to_hex()).finish(),
        }
    }
}

impl fmt::Display for GroupTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for GroupTag {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for GroupTag {
    fn from(value: String) -> Self {
        Self(Bytes::from(value.into_bytes()))
    }
}

impl From<&[u8]> for GroupTag {
    fn from(value: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for GroupTag {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<Bytes> for GroupTag {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

/// Dedupe key for established connections: identity hex, suffixed with
/// `@<group hex>` when the connection carries a group tag.
///
/// Ordering is plain lexicographic comparison of the key string. Both ends of
/// a connection pair compare keys carrying the same suffix, so the ordering
/// reduces to comparing the identities' hex representations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey(String);

impl ConnectionKey {
    pub fn new(identity: &Identity, group: Option<&GroupTag>) -> Self {
        match group {
            Some(group) => Self(format!("{}@{}", identity.to_hex(), group.to_hex())),
            None => Self(identity.to_hex()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
