//! Dialable peer endpoints.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::GroupTag;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddrParseError {
    #[error("missing port in {0:?}")]
    MissingPort(String),
    #[error("invalid port in {0:?}")]
    InvalidPort(String),
    #[error("empty host in {0:?}")]
    EmptyHost(String),
}

/// A `host:port` endpoint as announced by discovery or added manually.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Registry key for this address announced under `group`.
    pub fn key(&self, group: Option<&GroupTag>) -> PeerKey {
        PeerKey::new(self, group)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for PeerAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddrParseError::MissingPort(s.to_string()))?;
        let port = port
            .parse()
            .map_err(|_| AddrParseError::InvalidPort(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(AddrParseError::EmptyHost(s.to_string()));
        }
        Ok(Self::new(host, port))
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Registry key of a discovered peer: `host:port`, suffixed with
/// `@<group hex>` when the peer was announced under a group.
///
/// The suffix keeps the same address announced under two groups apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerKey(String);

impl PeerKey {
    pub fn new(addr: &PeerAddr, group: Option<&GroupTag>) -> Self {
        match group {
            Some(group) => Self(format!("{}:{}@{}", addr.host, addr.port, group.to_hex())),
            None => Self(format!("{}:{}", addr.host, addr.port)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let addr: PeerAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(addr, PeerAddr::new("127.0.0.1", 9999));
        assert_eq!(addr.to_string(), "127.0.0.1:9999");
    }

    #[test]
    fn test_parse_ipv6() {
        let addr: PeerAddr = "[::1]:80".parse().unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.to_string(), "[::1]:80");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "localhost".parse::<PeerAddr>(),
            Err(AddrParseError::MissingPort(_))
        ));
        assert!(matches!(
            "localhost:http".parse::<PeerAddr>(),
            Err(AddrParseError::InvalidPort(_))
        ));
        assert!(matches!(
            ":80".parse::<PeerAddr>(),
            Err(AddrParseError::EmptyHost(_))
        ));
    }

    #[test]
    fn test_peer_key_group_suffix() {
        let addr = PeerAddr::new("10.0.0.1", 4000);
        assert_eq!(addr.key(None).as_str(), "10.0.0.1:4000");

        let a = addr.key(Some(&GroupTag::from("a")));
        let b = addr.key(Some(&GroupTag::from("b")));
        assert_eq!(a.as_str(), "10.0.0.1:4000@61");
        assert_ne!(a, b);
    }
}
