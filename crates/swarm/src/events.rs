//! Swarm notifications and the sink they are delivered through.

use peerswarm_net_peer_registry::RejectReason;
use peerswarm_net_primitives::{
    ConnectionKey, GroupTag, Identity, PeerAddr, PeerKey, TransportKind,
};
use tokio::sync::mpsc;
use tracing::trace;

use crate::connection::{ConnId, Connection};

/// Receiving half of a swarm's notifications.
pub type SwarmEvents = mpsc::UnboundedReceiver<SwarmEvent>;

/// Why a peer was banned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum BanReason {
    /// [`Swarm::remove_peer`](crate::Swarm::remove_peer) was called.
    ApplicationRequested,
    /// The handshake returned our own identity.
    SelfConnection,
}

/// Metadata of an established (or just rejected) connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnId,
    pub kind: TransportKind,
    /// Whether we dialed it.
    pub initiator: bool,
    /// Dialed address for outbound connections, remote socket for inbound ones.
    pub addr: PeerAddr,
    pub group: Option<GroupTag>,
    pub remote: Identity,
    /// Dedupe key: remote identity suffixed with the group.
    pub key: ConnectionKey,
}

/// Everything the swarm reports. [`SwarmEvent::name`] yields the stable
/// kebab-case name of each variant.
#[derive(Debug, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum SwarmEvent {
    PeerDiscovered {
        peer: PeerKey,
        addr: PeerAddr,
        group: Option<GroupTag>,
    },
    PeerBanned {
        peer: PeerKey,
        reason: BanReason,
    },
    /// Retries exhausted; the peer may be rediscovered later.
    PeerDropped {
        peer: PeerKey,
    },
    PeerRejected {
        addr: PeerAddr,
        group: Option<GroupTag>,
        reason: RejectReason,
    },
    Connecting {
        peer: PeerKey,
        addr: PeerAddr,
        retries: usize,
    },
    ConnectFailed {
        peer: PeerKey,
        addr: PeerAddr,
        timed_out: bool,
    },
    HandshakeTimeout {
        addr: PeerAddr,
        initiator: bool,
    },
    /// Lost duplicate resolution and was destroyed.
    RedundantConnection {
        info: ConnectionInfo,
    },
    Connection {
        info: ConnectionInfo,
        connection: Connection,
    },
    ConnectionClosed {
        info: ConnectionInfo,
    },
    Listening {
        port: u16,
    },
    /// Non-fatal listener, discovery or port-mapping failure.
    Error {
        message: String,
    },
    Closed,
}

impl SwarmEvent {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn is_connection_event(&self) -> bool {
        matches!(
            self,
            Self::Connecting { .. }
                | Self::ConnectFailed { .. }
                | Self::Connection { .. }
                | Self::ConnectionClosed { .. }
                | Self::RedundantConnection { .. }
        )
    }

    pub fn is_peer_event(&self) -> bool {
        matches!(
            self,
            Self::PeerDiscovered { .. }
                | Self::PeerBanned { .. }
                | Self::PeerDropped { .. }
                | Self::PeerRejected { .. }
        )
    }
}

/// Delivers events to the application until muted.
#[derive(Debug)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<SwarmEvent>,
    muted: bool,
}

impl EventSink {
    pub(crate) fn new() -> (Self, SwarmEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, muted: false }, rx)
    }

    pub(crate) fn emit(&self, event: SwarmEvent) {
        if self.muted {
            return;
        }
        trace!(event = event.name(), "swarm event");
        // A dropped receiver only means nobody is listening.
        let _ = self.tx.send(event);
    }

    /// Emit [`SwarmEvent::Closed`] and drop everything after it.
    pub(crate) fn close(&mut self) {
        self.emit(SwarmEvent::Closed);
        self.muted = true;
    }
}
