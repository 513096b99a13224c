//! Transport abstractions consumed by the swarm engine.
//!
//! A [`Transport`] opens outbound raw connections and binds [`Listener`]s for
//! inbound ones. Two transports are raced per peer: a reliable one
//! ([`TcpTransport`]) and an optional best-effort one supplied by the
//! application. [`MemoryNetwork`] provides in-process transports of either kind.

pub mod memory;
pub mod tcp;

use std::io;

use async_trait::async_trait;
use peerswarm_net_primitives::{PeerAddr, TransportKind};
use tokio::io::{AsyncRead, AsyncWrite};

pub use memory::{MEMORY_HOST, MemoryNetwork, MemoryTransport};
pub use tcp::TcpTransport;

/// Byte stream of a raw or established connection.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Socket factory for one transport kind.
///
/// Dropping the future returned by [`Transport::connect`] abandons the attempt
/// and releases the socket.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn kind(&self) -> TransportKind;

    async fn connect(&self, addr: &PeerAddr) -> io::Result<BoxedStream>;

    /// Bind a listener on `port`; `0` lets the transport pick an ephemeral port.
    async fn listen(&self, port: u16) -> io::Result<Box<dyn Listener>>;
}

/// Bound listening socket. Dropping it closes the socket.
#[async_trait]
pub trait Listener: Send + 'static {
    /// Port actually bound (resolved when listening on port `0`).
    fn local_port(&self) -> u16;

    async fn accept(&mut self) -> io::Result<(BoxedStream, PeerAddr)>;
}
