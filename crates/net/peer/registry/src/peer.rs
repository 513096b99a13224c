use peerswarm_net_primitives::{GroupTag, PeerAddr, PeerKey};

/// A remote endpoint waiting to be dialed, being dialed, or backing a live
/// outbound connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    addr: PeerAddr,
    group: Option<GroupTag>,
    key: PeerKey,
    retries: usize,
}

impl Peer {
    pub fn new(addr: PeerAddr, group: Option<GroupTag>) -> Self {
        let key = addr.key(group.as_ref());
        Self {
            addr,
            group,
            key,
            retries: 0,
        }
    }

    pub fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    pub fn group(&self) -> Option<&GroupTag> {
        self.group.as_ref()
    }

    pub fn key(&self) -> &PeerKey {
        &self.key
    }

    /// Failed dial cycles since the last successful handshake.
    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn set_retries(&mut self, retries: usize) {
        self.retries = retries;
    }

    pub fn reset_retries(&mut self) {
        self.retries = 0;
    }
}
