//! Error types for the identity handshake.

use std::io;

use peerswarm_net_primitives::IdentityError;

/// Failure while promoting a raw connection.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("handshake timed out")]
    Timeout,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid frame length prefix: {0}")]
    LengthPrefix(#[from] unsigned_varint::decode::Error),
    #[error("frame of {0} bytes exceeds limit of {1}")]
    FrameTooLarge(usize, usize),
    #[error("remote identity frame of {0} bytes is shorter than {1}")]
    IdentityTooShort(usize, usize),
    #[error("invalid remote identity: {0}")]
    InvalidIdentity(#[from] IdentityError),
    #[error("stream wrapper failed: {0}")]
    Wrapper(Box<dyn std::error::Error + Send + Sync>),
}

impl HandshakeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HandshakeError::Timeout)
    }
}
