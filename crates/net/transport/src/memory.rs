//! In-process transports backed by `tokio::io::duplex` pipes.
//!
//! A [`MemoryNetwork`] is a port namespace per [`TransportKind`]. Transports
//! created from the same network can reach each other's listeners; the host
//! part of a dialed address is ignored. Connect latency and refusal can be
//! injected per transport to exercise dial racing.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use peerswarm_net_primitives::{PeerAddr, TransportKind};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::trace;

use crate::{BoxedStream, Listener, Transport};

/// Host reported for in-memory remote addresses.
pub const MEMORY_HOST: &str = "memory";

const FIRST_EPHEMERAL_PORT: u16 = 49152;
const PIPE_CAPACITY: usize = 64 * 1024;

type Incoming = (DuplexStream, PeerAddr);

#[derive(Debug)]
struct Namespace {
    listeners: HashMap<u16, mpsc::UnboundedSender<Incoming>>,
    next_port: u16,
}

impl Default for Namespace {
    fn default() -> Self {
        Self {
            listeners: HashMap::new(),
            next_port: FIRST_EPHEMERAL_PORT,
        }
    }
}

impl Namespace {
    fn ephemeral(&mut self) -> io::Result<u16> {
        for _ in 0..=(u16::MAX - FIRST_EPHEMERAL_PORT) {
            let port = self.next_port;
            self.next_port = if port == u16::MAX {
                FIRST_EPHEMERAL_PORT
            } else {
                port + 1
            };
            if !self.listeners.contains_key(&port) {
                return Ok(port);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no free ephemeral port",
        ))
    }
}

/// Shared port namespace for in-memory transports.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    namespaces: Mutex<HashMap<TransportKind, Namespace>>,
    next_client_port: Mutex<u16>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport of `kind` attached to this network.
    pub fn transport(self: &Arc<Self>, kind: TransportKind) -> MemoryTransport {
        MemoryTransport {
            network: Arc::clone(self),
            kind,
            connect_delay: Duration::ZERO,
            refuse: false,
        }
    }

    /// Whether something is listening on `port` for `kind`.
    pub fn is_bound(&self, kind: TransportKind, port: u16) -> bool {
        self.namespaces
            .lock()
            .get(&kind)
            .is_some_and(|ns| ns.listeners.contains_key(&port))
    }

    fn bind(
        &self,
        kind: TransportKind,
        port: u16,
    ) -> io::Result<(u16, mpsc::UnboundedReceiver<Incoming>)> {
        let mut namespaces = self.namespaces.lock();
        let ns = namespaces.entry(kind).or_default();

        let port = if port == 0 {
            ns.ephemeral()?
        } else if ns.listeners.contains_key(&port) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{kind} port {port} in use"),
            ));
        } else {
            port
        };

        let (tx, rx) = mpsc::unbounded_channel();
        ns.listeners.insert(port, tx);
        Ok((port, rx))
    }

    fn unbind(&self, kind: TransportKind, port: u16) {
        if let Some(ns) = self.namespaces.lock().get_mut(&kind) {
            ns.listeners.remove(&port);
        }
    }

    fn listener(&self, kind: TransportKind, port: u16) -> Option<mpsc::UnboundedSender<Incoming>> {
        self.namespaces
            .lock()
            .get(&kind)
            .and_then(|ns| ns.listeners.get(&port).cloned())
    }

    fn client_addr(&self) -> PeerAddr {
        let mut next = self.next_client_port.lock();
        *next = next.wrapping_add(1).max(1);
        PeerAddr::new(MEMORY_HOST, *next)
    }
}

/// Transport of one kind on a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    kind: TransportKind,
    connect_delay: Duration,
    refuse: bool,
}

impl MemoryTransport {
    /// Delay every outbound connect by `delay` before it resolves.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Fail every outbound connect (after the connect delay).
    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.network
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&self, addr: &PeerAddr) -> io::Result<BoxedStream> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if self.refuse {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }

        let listener = self
            .network
            .listener(self.kind, addr.port)
            .ok_or(io::ErrorKind::ConnectionRefused)?;

        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        listener
            .send((remote, self.network.client_addr()))
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;

        trace!(kind = %self.kind, %addr, "memory connect");
        Ok(Box::new(local))
    }

    async fn listen(&self, port: u16) -> io::Result<Box<dyn Listener>> {
        let (port, incoming) = self.network.bind(self.kind, port)?;
        trace!(kind = %self.kind, port, "memory listening");
        Ok(Box::new(MemoryListener {
            network: Arc::clone(&self.network),
            kind: self.kind,
            port,
            incoming,
        }))
    }
}

struct MemoryListener {
    network: Arc<MemoryNetwork>,
    kind: TransportKind,
    port: u16,
    incoming: mpsc::UnboundedReceiver<Incoming>,
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.network.unbind(self.kind, self.port);
    }
}

#[async_trait]
impl Listener for MemoryListener {
    fn local_port(&self) -> u16 {
        self.port
    }

    async fn accept(&mut self) -> io::Result<(BoxedStream, PeerAddr)> {
        let (stream, remote) = self
            .incoming
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "listener closed"))?;
        Ok((Box::new(stream), remote))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let network = MemoryNetwork::new();
        let transport = network.transport(TransportKind::Reliable);

        let mut listener = transport.listen(0).await.unwrap();
        let port = listener.local_port();
        assert_eq!(port, FIRST_EPHEMERAL_PORT);

        let mut client = transport
            .connect(&PeerAddr::new(MEMORY_HOST, port))
            .await
            .unwrap();
        let (mut server, remote) = listener.accept().await.unwrap();
        assert_eq!(remote.host, MEMORY_HOST);

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_namespaces_per_kind() {
        let network = MemoryNetwork::new();
        let reliable = network.transport(TransportKind::Reliable);
        let best_effort = network.transport(TransportKind::BestEffort);

        let listener = reliable.listen(0).await.unwrap();
        let port = listener.local_port();

        // Same port is free on the other kind.
        let other = best_effort.listen(port).await.unwrap();
        assert_eq!(other.local_port(), port);

        // But not twice on the same kind.
        let err = reliable.listen(port).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);

        // Best-effort dial cannot reach a reliable-only port.
        drop(other);
        let err = best_effort
            .connect(&PeerAddr::new(MEMORY_HOST, port))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_drop_unbinds() {
        let network = MemoryNetwork::new();
        let transport = network.transport(TransportKind::Reliable);

        let listener = transport.listen(4000).await.unwrap();
        assert!(network.is_bound(TransportKind::Reliable, 4000));
        drop(listener);
        assert!(!network.is_bound(TransportKind::Reliable, 4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refusing_after_delay() {
        let network = MemoryNetwork::new();
        let transport = network.transport(TransportKind::Reliable);
        let _listener = transport.listen(4000).await.unwrap();

        let refusing = transport
            .clone()
            .with_connect_delay(Duration::from_millis(100))
            .refusing();
        let start = tokio::time::Instant::now();
        let err = refusing
            .connect(&PeerAddr::new(MEMORY_HOST, 4000))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
