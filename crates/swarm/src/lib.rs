//! Peer-swarm connection manager.
//!
//! Given a feed of discovered peer addresses, a [`Swarm`] keeps a bounded set
//! of live connections to remote peers:
//!
//! - peers are admitted through a registry (dedupe, bans, allow-list) and
//!   queued for dialing,
//! - each dial races a reliable and an optional best-effort [`Transport`]
//!   under a shared deadline,
//! - raw connections, dialed or accepted, exchange identities in a framed
//!   handshake that also detects connections to ourselves,
//! - duplicate connections to the same remote are resolved so both ends keep
//!   the same physical connection,
//! - failed peers are requeued on a fixed backoff schedule, then dropped.
//!
//! ```no_run
//! # async fn example() -> Result<(), peerswarm::SwarmError> {
//! use peerswarm::{Swarm, SwarmConfig, SwarmEvent};
//!
//! let (swarm, mut events) = Swarm::spawn(SwarmConfig::default());
//! swarm.join("my-topic").await?;
//!
//! // Dropping a connection closes it.
//! let mut connections = Vec::new();
//! while let Some(event) = events.recv().await {
//!     if let SwarmEvent::Connection { info, connection } = event {
//!         println!("connected to {} over {}", info.remote, info.kind);
//!         connections.push(connection);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
mod connection;
mod controller;
mod dialer;
mod error;
mod events;
mod handle;
mod listener;
mod metrics;
pub mod port_map;
pub mod resolver;

pub use config::{ConfigError, SwarmConfig};
pub use connection::{ConnId, Connection};
pub use error::SwarmError;
pub use events::{BanReason, ConnectionInfo, SwarmEvent, SwarmEvents};
pub use handle::{Swarm, SwarmBuilder, SwarmStats};
pub use port_map::PortMapper;

pub use peerswarm_net_discovery::{
    Discovery, DiscoveryError, DiscoveryEvent, LocalDiscovery, LocalDiscoveryHub, NoDiscovery,
};
pub use peerswarm_net_handshake::{HandshakeError, Handshaked, Role, StreamWrapper, WrapContext};
pub use peerswarm_net_peer_backoff::BackoffSchedule;
pub use peerswarm_net_peer_registry::RejectReason;
pub use peerswarm_net_primitives::{
    ConnectionKey, GroupTag, Identity, PeerAddr, PeerKey, TransportKind,
};
pub use peerswarm_net_transport::{
    BoxedStream, Listener, MEMORY_HOST, MemoryNetwork, MemoryTransport, TcpTransport,
    Transport,
};
