//! Application-facing handle and builder.

use std::sync::Arc;

use peerswarm_net_discovery::{Discovery, NoDiscovery};
use peerswarm_net_handshake::{Handshake, StreamWrapper};
use peerswarm_net_primitives::{GroupTag, Identity, PeerAddr, PeerKey};
use peerswarm_net_transport::{TcpTransport, Transport};
use tokio::sync::{mpsc, oneshot};

use crate::config::SwarmConfig;
use crate::controller::{Command, Controller, Parts};
use crate::error::SwarmError;
use crate::events::{EventSink, SwarmEvents};
use crate::port_map::PortMapper;

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Point-in-time connection counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwarmStats {
    /// Peers waiting to be dialed.
    pub queued: usize,
    /// Dials and handshakes in flight.
    pub connecting: usize,
    /// Established connections.
    pub connected: usize,
    /// `connecting + connected`, the figure capped by `max_connections`.
    pub total: usize,
    /// Listening port, once bound.
    pub port: Option<u16>,
}

/// Collects the collaborators a swarm runs with.
///
/// Without an explicit reliable transport the swarm dials and listens over
/// TCP. The best-effort transport is only raced when one is installed.
pub struct SwarmBuilder {
    config: SwarmConfig,
    reliable: Option<Arc<dyn Transport>>,
    best_effort: Option<Arc<dyn Transport>>,
    discovery: Box<dyn Discovery>,
    port_mapper: Option<Arc<dyn PortMapper>>,
    wrapper: Option<Arc<dyn StreamWrapper>>,
}

impl SwarmBuilder {
    pub fn new(config: SwarmConfig) -> Self {
        Self {
            config,
            reliable: None,
            best_effort: None,
            discovery: Box::new(NoDiscovery),
            port_mapper: None,
            wrapper: None,
        }
    }

    pub fn with_reliable_transport(mut self, transport: impl Transport) -> Self {
        self.reliable = Some(Arc::new(transport));
        self
    }

    pub fn with_best_effort_transport(mut self, transport: impl Transport) -> Self {
        self.best_effort = Some(Arc::new(transport));
        self
    }

    pub fn with_discovery(mut self, discovery: impl Discovery) -> Self {
        self.discovery = Box::new(discovery);
        self
    }

    pub fn with_port_mapper(mut self, mapper: impl PortMapper) -> Self {
        self.port_mapper = Some(Arc::new(mapper));
        self
    }

    /// Replace the built-in identity exchange with a wrapping stream.
    pub fn with_stream_wrapper(mut self, wrapper: impl StreamWrapper) -> Self {
        self.wrapper = Some(Arc::new(wrapper));
        self
    }

    /// Start the swarm on the current tokio runtime.
    pub fn spawn(self) -> (Swarm, SwarmEvents) {
        let Self {
            config,
            reliable,
            best_effort,
            discovery,
            port_mapper,
            wrapper,
        } = self;

        let local = config
            .local_identity
            .clone()
            .unwrap_or_else(Identity::random);
        let reliable = if config.enable_reliable_transport {
            Some(reliable.unwrap_or_else(|| Arc::new(TcpTransport::default())))
        } else {
            None
        };
        let best_effort = best_effort.filter(|_| config.enable_best_effort_transport);

        let mut handshake = Handshake::new(local.clone()).with_timeout(config.handshake_timeout);
        if let Some(wrapper) = wrapper {
            handshake = handshake.with_wrapper(wrapper);
        }

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (sink, events) = EventSink::new();
        let controller = Controller::new(
            Parts {
                config,
                local: local.clone(),
                reliable,
                best_effort,
                handshake,
                discovery,
                port_mapper,
            },
            commands_rx,
            sink,
        );
        tokio::spawn(controller.run());

        (
            Swarm {
                commands: commands_tx,
                local,
            },
            events,
        )
    }
}

/// Cloneable handle to a running swarm.
///
/// Dropping every handle destroys the swarm.
#[derive(Debug, Clone)]
pub struct Swarm {
    commands: mpsc::Sender<Command>,
    local: Identity,
}

impl Swarm {
    pub fn builder(config: SwarmConfig) -> SwarmBuilder {
        SwarmBuilder::new(config)
    }

    /// Spawn a TCP-only swarm without discovery.
    pub fn spawn(config: SwarmConfig) -> (Self, SwarmEvents) {
        SwarmBuilder::new(config).spawn()
    }

    pub fn local_identity(&self) -> &Identity {
        &self.local
    }

    /// Whether the swarm has been destroyed.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SwarmError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SwarmError::Destroyed)?;
        rx.await.map_err(|_| SwarmError::Destroyed)
    }

    /// Bind both transports on `port` (`0` for ephemeral) and return the bound port.
    /// Already listening swarms return their current port.
    pub async fn listen(&self, port: u16) -> Result<u16, SwarmError> {
        self.request(|reply| Command::Listen { port, reply }).await?
    }

    /// Join a discovery group, listening first if needed.
    pub async fn join(&self, group: impl Into<GroupTag>) -> Result<(), SwarmError> {
        let group = group.into();
        self.request(|reply| Command::Join { group, reply }).await?
    }

    pub async fn leave(&self, group: impl Into<GroupTag>) -> Result<(), SwarmError> {
        let group = group.into();
        self.request(|reply| Command::Leave { group, reply }).await?
    }

    /// Queue a peer for dialing as if discovery had announced it.
    pub async fn add_peer(
        &self,
        group: Option<GroupTag>,
        addr: PeerAddr,
    ) -> Result<PeerKey, SwarmError> {
        self.request(|reply| Command::AddPeer { group, addr, reply })
            .await?
    }

    /// Ban a peer. Queued entries for it are skipped.
    pub async fn remove_peer(
        &self,
        group: Option<GroupTag>,
        addr: PeerAddr,
    ) -> Result<PeerKey, SwarmError> {
        self.request(|reply| Command::RemovePeer { group, addr, reply })
            .await
    }

    pub async fn stats(&self) -> Result<SwarmStats, SwarmError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Tear the swarm down. Safe to call any number of times from any handle;
    /// only the first call emits [`SwarmEvent::Closed`](crate::SwarmEvent::Closed).
    pub async fn destroy(&self) {
        let _ = self.request(|reply| Command::Destroy { reply }).await;
    }
}
