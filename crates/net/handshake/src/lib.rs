//! Identity handshake promoting a raw connection into a named one.
//!
//! Both sides write one length-prefixed frame carrying their [`Identity`] and
//! read the remote's frame from the same stream. The dialer appends the group
//! tag it dialed under to its frame, so the accepting side learns which group
//! the connection belongs to and both ends compute the same
//! [`ConnectionKey`](peerswarm_net_primitives::ConnectionKey).
//!
//! Applications that layer their own protocol over the raw stream (e.g. an
//! encrypted channel) can install a [`StreamWrapper`] instead; the identity is
//! then whatever the wrapper surfaces once its own handshake completes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use peerswarm_net_primitives::{GroupTag, Identity};
use peerswarm_net_transport::BoxedStream;
use tracing::trace;

mod error;
pub mod frame;

pub use error::HandshakeError;

/// Time allowed for the whole exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on an identity frame (identity plus group tag).
pub const MAX_FRAME_LEN: usize = 4096;

/// Which side of the raw connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We dialed; the group tag is the one the peer was discovered under.
    Dialer,
    /// We accepted; the group tag comes from the dialer's frame.
    Listener,
}

impl Role {
    pub fn is_initiator(&self) -> bool {
        matches!(self, Role::Dialer)
    }
}

/// A raw connection that completed the handshake.
pub struct Handshaked {
    pub stream: BoxedStream,
    pub remote: Identity,
    pub group: Option<GroupTag>,
}

impl std::fmt::Debug for Handshaked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshaked")
            .field("remote", &self.remote)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// What a [`StreamWrapper`] knows about the connection it wraps.
#[derive(Debug, Clone)]
pub struct WrapContext {
    pub local: Identity,
    pub role: Role,
    pub group: Option<GroupTag>,
}

/// Caller-supplied wrapping stream that performs the identity exchange itself.
#[async_trait]
pub trait StreamWrapper: Send + Sync + 'static {
    /// Wrap `stream` and resolve once the wrapper's handshake has surfaced the
    /// remote identity.
    async fn wrap(
        &self,
        stream: BoxedStream,
        ctx: WrapContext,
    ) -> Result<Handshaked, HandshakeError>;
}

#[derive(Clone)]
pub struct Handshake {
    local: Identity,
    timeout: Duration,
    wrapper: Option<Arc<dyn StreamWrapper>>,
}

impl Handshake {
    pub fn new(local: Identity) -> Self {
        Self {
            local,
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            wrapper: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_wrapper(mut self, wrapper: Arc<dyn StreamWrapper>) -> Self {
        self.wrapper = Some(wrapper);
        self
    }

    pub fn local(&self) -> &Identity {
        &self.local
    }

    /// Run the exchange under the handshake timeout. The stream is dropped
    /// (closing the connection) on any failure.
    pub async fn run(
        &self,
        stream: BoxedStream,
        role: Role,
        group: Option<GroupTag>,
    ) -> Result<Handshaked, HandshakeError> {
        let exchange = async {
            match &self.wrapper {
                Some(wrapper) => {
                    let ctx = WrapContext {
                        local: self.local.clone(),
                        role,
                        group,
                    };
                    wrapper.wrap(stream, ctx).await
                }
                None => self.exchange(stream, role, group).await,
            }
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| HandshakeError::Timeout)?
    }

    async fn exchange(
        &self,
        mut stream: BoxedStream,
        role: Role,
        group: Option<GroupTag>,
    ) -> Result<Handshaked, HandshakeError> {
        let mut payload = self.local.as_bytes().to_vec();
        if let (Role::Dialer, Some(group)) = (role, &group) {
            payload.extend_from_slice(group.as_bytes());
        }
        frame::write_frame(&mut stream, &payload, MAX_FRAME_LEN).await?;

        let mut remote = frame::read_frame(&mut stream, MAX_FRAME_LEN).await?;
        let group = match role {
            Role::Dialer => group,
            Role::Listener => {
                let id_len = self.local.len();
                if remote.len() < id_len {
                    return Err(HandshakeError::IdentityTooShort(remote.len(), id_len));
                }
                let tag = remote.split_off(id_len);
                (!tag.is_empty()).then(|| GroupTag::from(tag))
            }
        };

        let remote = Identity::from_bytes(remote)?;
        trace!(?role, %remote, ?group, "handshake complete");

        Ok(Handshaked {
            stream,
            remote,
            group,
        })
    }
}
