use std::io;

use peerswarm_net_discovery::DiscoveryError;
use peerswarm_net_peer_registry::RejectReason;
use peerswarm_net_primitives::TransportKind;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("swarm destroyed")]
    Destroyed,
    #[error("no transport enabled")]
    NoTransport,
    #[error("failed to bind {kind} listener on port {port}: {source}")]
    Bind {
        kind: TransportKind,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("peer rejected: {0}")]
    Rejected(RejectReason),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SwarmError {
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::Destroyed)
    }
}
