//! Discovery feed consumed by the swarm engine.
//!
//! A [`Discovery`] announces the local listening port under a group and
//! reports peers found under the groups it has joined as [`DiscoveryEvent`]s.
//! The engine attaches a sink once, then calls [`Discovery::join`] and
//! [`Discovery::leave`] as the application joins and leaves groups.

mod local;

use async_trait::async_trait;
use peerswarm_net_primitives::{GroupTag, PeerAddr};
use tokio::sync::mpsc;

pub use local::{LocalDiscovery, LocalDiscoveryHub};

/// Sending half of the discovery feed.
pub type DiscoverySink = mpsc::UnboundedSender<DiscoveryEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A peer announced itself at `addr` under `group`.
    Peer {
        group: Option<GroupTag>,
        addr: PeerAddr,
    },
    /// Non-fatal lookup or announce failure.
    Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery destroyed")]
    Destroyed,
    #[error("discovery failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Discovery: Send + 'static {
    /// Install the sink that receives every subsequent [`DiscoveryEvent`].
    fn attach(&mut self, sink: DiscoverySink);

    /// Announce `port` under `group` and start reporting its peers.
    async fn join(&mut self, group: &GroupTag, port: u16) -> Result<(), DiscoveryError>;

    /// Stop announcing under `group`.
    async fn leave(&mut self, group: &GroupTag, port: u16) -> Result<(), DiscoveryError>;

    /// Stop everything. No events are delivered afterwards.
    async fn destroy(&mut self);
}

/// Discovery that never finds anyone; peers are added manually.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiscovery;

#[async_trait]
impl Discovery for NoDiscovery {
    fn attach(&mut self, _sink: DiscoverySink) {}

    async fn join(&mut self, _group: &GroupTag, _port: u16) -> Result<(), DiscoveryError> {
        Ok(())
    }

    async fn leave(&mut self, _group: &GroupTag, _port: u16) -> Result<(), DiscoveryError> {
        Ok(())
    }

    async fn destroy(&mut self) {}
}
