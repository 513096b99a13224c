//! Established connection handed to the application.
//!
//! The application owns a [`Connection`] and reads/writes it like any socket.
//! The swarm keeps a [`ConnectionHandle`] to the same socket so it can destroy
//! it (duplicate resolution, teardown) regardless of what the application is
//! doing with it. When the socket reaches EOF, errors, is closed or dropped by
//! the application, the swarm is told exactly once; a socket destroyed by the
//! swarm itself is not reported back.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::task::AtomicWaker;
use parking_lot::Mutex;
use peerswarm_net_transport::BoxedStream;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

use crate::events::ConnectionInfo;

/// Swarm-local id of a connection attempt, carried through to the
/// established connection it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Shared {
    id: ConnId,
    stream: Mutex<Option<BoxedStream>>,
    read_waker: AtomicWaker,
    write_waker: AtomicWaker,
    on_close: Mutex<Option<mpsc::UnboundedSender<ConnId>>>,
}

impl Shared {
    /// Report the close to the swarm, at most once.
    fn report_closed(&self) {
        if let Some(tx) = self.on_close.lock().take() {
            let _ = tx.send(self.id);
        }
    }

    fn release(&self) {
        let stream = self.stream.lock().take();
        drop(stream);
        self.read_waker.wake();
        self.write_waker.wake();
    }

    fn is_closed(&self) -> bool {
        self.stream.lock().is_none()
    }
}

pub(crate) fn pair(
    stream: BoxedStream,
    info: ConnectionInfo,
    on_close: mpsc::UnboundedSender<ConnId>,
) -> (Connection, ConnectionHandle) {
    let shared = Arc::new(Shared {
        id: info.id,
        stream: Mutex::new(Some(stream)),
        read_waker: AtomicWaker::new(),
        write_waker: AtomicWaker::new(),
        on_close: Mutex::new(Some(on_close)),
    });
    let handle = ConnectionHandle {
        shared: Arc::clone(&shared),
    };
    (Connection { shared, info }, handle)
}

/// The swarm's side of an established connection.
pub(crate) struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Destroy the socket without reporting the close back.
    pub(crate) fn kill(&self) {
        self.shared.on_close.lock().take();
        self.shared.release();
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionHandle")
            .field(&self.shared.id)
            .finish()
    }
}

/// Live connection to a remote peer. Dropping it closes the socket.
pub struct Connection {
    shared: Arc<Shared>,
    info: ConnectionInfo,
}

impl Connection {
    pub fn id(&self) -> ConnId {
        self.shared.id
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Whether the socket has been closed by either side or by the swarm.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Close the socket now. The swarm treats this like a remote close.
    pub fn close(&self) {
        self.shared.release();
        self.shared.report_closed();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("info", &self.info)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut guard = self.shared.stream.lock();
        let Some(stream) = guard.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        self.shared.read_waker.register(cx.waker());

        let filled = buf.filled().len();
        let res = Pin::new(stream).poll_read(cx, buf);
        let eof = matches!(res, Poll::Ready(Ok(()))) && buf.filled().len() == filled;
        if (eof && buf.remaining() > 0) || matches!(res, Poll::Ready(Err(_))) {
            drop(guard);
            self.close();
        }
        res
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut guard = self.shared.stream.lock();
        let Some(stream) = guard.as_mut() else {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        };
        self.shared.write_waker.register(cx.waker());

        let res = Pin::new(stream).poll_write(cx, buf);
        if matches!(res, Poll::Ready(Err(_))) {
            drop(guard);
            self.close();
        }
        res
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut guard = self.shared.stream.lock();
        match guard.as_mut() {
            Some(stream) => Pin::new(stream).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut guard = self.shared.stream.lock();
        match guard.as_mut() {
            Some(stream) => Pin::new(stream).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use peerswarm_net_primitives::{Identity, PeerAddr, TransportKind};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn info(id: u64) -> ConnectionInfo {
        let remote = Identity::random();
        ConnectionInfo {
            id: ConnId::new(id),
            kind: TransportKind::Reliable,
            initiator: true,
            addr: PeerAddr::new("127.0.0.1", 1),
            group: None,
            key: remote.connection_key(None),
            remote,
        }
    }

    fn connected(
        id: u64,
    ) -> (
        Connection,
        ConnectionHandle,
        tokio::io::DuplexStream,
        mpsc::UnboundedReceiver<ConnId>,
    ) {
        let (local, remote) = tokio::io::duplex(1024);
        let (tx, rx) = mpsc::unbounded_channel();
        let (conn, handle) = pair(Box::new(local), info(id), tx);
        (conn, handle, remote, rx)
    }

    #[tokio::test]
    async fn test_read_write_through() {
        let (mut conn, _handle, mut remote, _rx) = connected(1);

        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        remote.write_all(b"pong").await.unwrap();
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_remote_eof_reported_once() {
        let (mut conn, _handle, remote, mut rx) = connected(7);
        drop(remote);

        let mut buf = Vec::new();
        conn.read_to_end(&mut buf).await.unwrap();
        assert!(conn.is_closed());
        drop(conn);

        assert_eq!(rx.recv().await, Some(ConnId::new(7)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_reports_close() {
        let (conn, _handle, _remote, mut rx) = connected(3);
        drop(conn);
        assert_eq!(rx.recv().await, Some(ConnId::new(3)));
    }

    #[tokio::test]
    async fn test_kill_wakes_reader_without_report() {
        let (mut conn, handle, _remote, mut rx) = connected(4);

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            let n = conn.read(&mut buf).await.unwrap();
            (n, conn)
        });
        tokio::task::yield_now().await;
        handle.kill();

        let (n, conn) = reader.await.unwrap();
        assert_eq!(n, 0);
        assert!(conn.is_closed());
        drop(conn);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_write_after_kill_fails() {
        let (mut conn, handle, _remote, _rx) = connected(5);
        handle.kill();
        let err = conn.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
