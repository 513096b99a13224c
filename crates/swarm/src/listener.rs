//! Shared-port listening across both transports.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use peerswarm_net_primitives::{PeerAddr, TransportKind};
use peerswarm_net_transport::{BoxedStream, Listener, Transport};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::SwarmError;

/// Pause after a failed accept so a broken listener does not spin.
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Listeners bound to one port number.
pub(crate) struct Bound {
    pub(crate) port: u16,
    pub(crate) listeners: Vec<(TransportKind, Box<dyn Listener>)>,
}

impl std::fmt::Debug for Bound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bound")
            .field("port", &self.port)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Bind every given transport on the same port.
///
/// The first transport picks the port (ephemeral when `port` is `0`); the rest
/// bind to the port it resolved. If a later bind fails on an ephemeral port,
/// the whole allocation is retried once with a fresh one.
pub(crate) async fn bind_shared(
    transports: &[&Arc<dyn Transport>],
    port: u16,
) -> Result<Bound, SwarmError> {
    if transports.is_empty() {
        return Err(SwarmError::NoTransport);
    }

    match try_bind(transports, port).await {
        Err(SwarmError::Bind { kind, port: taken, source }) if port == 0 => {
            debug!(%kind, port = taken, %source, "shared port unavailable, retrying");
            try_bind(transports, 0).await
        }
        res => res,
    }
}

async fn try_bind(transports: &[&Arc<dyn Transport>], port: u16) -> Result<Bound, SwarmError> {
    let mut listeners = Vec::with_capacity(transports.len());
    let mut port = port;

    for transport in transports {
        let kind = transport.kind();
        let listener = transport
            .listen(port)
            .await
            .map_err(|source| SwarmError::Bind { kind, port, source })?;
        port = listener.local_port();
        listeners.push((kind, listener));
    }

    Ok(Bound { port, listeners })
}

/// Incoming raw connection reported by an accept loop.
pub(crate) struct Accepted {
    pub(crate) stream: BoxedStream,
    pub(crate) addr: PeerAddr,
    pub(crate) kind: TransportKind,
}

impl std::fmt::Debug for Accepted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accepted")
            .field("addr", &self.addr)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub(crate) enum AcceptEvent {
    Accepted(Accepted),
    Failed {
        kind: TransportKind,
        error: io::Error,
    },
}

/// Forward every accepted connection until the receiver goes away.
pub(crate) async fn accept_loop(
    kind: TransportKind,
    mut listener: Box<dyn Listener>,
    tx: mpsc::UnboundedSender<AcceptEvent>,
) {
    loop {
        let (event, failed) = match listener.accept().await {
            Ok((stream, addr)) => (AcceptEvent::Accepted(Accepted { stream, addr, kind }), false),
            Err(error) => {
                warn!(%kind, %error, "accept failed");
                (AcceptEvent::Failed { kind, error }, true)
            }
        };
        if tx.send(event).is_err() {
            return;
        }
        if failed {
            tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
        }
    }
}
