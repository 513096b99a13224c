//! Reliable transport over TCP.

use std::io;

use async_trait::async_trait;
use peerswarm_net_primitives::{PeerAddr, TransportKind};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace};

use crate::{BoxedStream, Listener, Transport};

#[derive(Debug, Clone)]
pub struct TcpTransport {
    bind_host: String,
    nodelay: bool,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            nodelay: true,
        }
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interface to bind listeners on (default `0.0.0.0`).
    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Reliable
    }

    async fn connect(&self, addr: &PeerAddr) -> io::Result<BoxedStream> {
        trace!(%addr, "tcp connect");
        let stream = TcpStream::connect((addr.host.as_str(), addr.port)).await?;
        stream.set_nodelay(self.nodelay)?;
        Ok(Box::new(stream))
    }

    async fn listen(&self, port: u16) -> io::Result<Box<dyn Listener>> {
        let listener = TcpListener::bind((self.bind_host.as_str(), port)).await?;
        let port = listener.local_addr()?.port();
        debug!(host = %self.bind_host, port, "tcp listening");
        Ok(Box::new(TcpAcceptor {
            listener,
            port,
            nodelay: self.nodelay,
        }))
    }
}

struct TcpAcceptor {
    listener: TcpListener,
    port: u16,
    nodelay: bool,
}

#[async_trait]
impl Listener for TcpAcceptor {
    fn local_port(&self) -> u16 {
        self.port
    }

    async fn accept(&mut self) -> io::Result<(BoxedStream, PeerAddr)> {
        let (stream, remote) = self.listener.accept().await?;
        stream.set_nodelay(self.nodelay)?;
        Ok((Box::new(stream), PeerAddr::from(remote)))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn test_tcp_connect_accept() {
        let transport = TcpTransport::new().with_bind_host("127.0.0.1");
        let mut listener = transport.listen(0).await.unwrap();
        let port = listener.local_port();
        assert_ne!(port, 0);

        let accept = tokio::spawn(async move {
            let (mut stream, remote) = listener.accept().await.unwrap();
            assert_eq!(remote.host, "127.0.0.1");
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut stream = transport
            .connect(&PeerAddr::new("127.0.0.1", port))
            .await
            .unwrap();
        stream.write_all(b"ping").await.unwrap();

        assert_eq!(&accept.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let transport = TcpTransport::new().with_bind_host("127.0.0.1");
        let listener = transport.listen(0).await.unwrap();
        let port = listener.local_port();
        drop(listener);

        assert!(
            transport
                .connect(&PeerAddr::new("127.0.0.1", port))
                .await
                .is_err()
        );
    }
}
