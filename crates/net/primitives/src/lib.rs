//! Primitive types shared by the peerswarm connection engine.
//!
//! - [`Identity`] - fixed-length node identity exchanged during the handshake
//! - [`GroupTag`] - opaque discovery group (topic) identifier
//! - [`PeerAddr`] / [`PeerKey`] - dialable endpoint and its registry key
//! - [`ConnectionKey`] - dedupe key for established connections
//! - [`TransportKind`] - which of the two raced transports a socket runs on

mod address;
mod identity;
mod kind;

pub use address::{AddrParseError, PeerAddr, PeerKey};
pub use identity::{ConnectionKey, GroupTag, IDENTITY_LEN, Identity, IdentityError};
pub use kind::TransportKind;
