//! Peer admission and dial queue.
//!
//! The registry remembers every peer key it has accepted (`Seen`) or been told
//! to avoid (`Banned`), enforces the optional host allow-list, and owns the
//! FIFO queue of peers waiting to be dialed. It is a plain owned value: the
//! swarm controller is its only mutator.

mod peer;

use std::collections::{HashMap, HashSet, VecDeque};

use peerswarm_net_primitives::{GroupTag, PeerAddr, PeerKey};
use tracing::{debug, trace};

pub use peer::Peer;

/// Registry status of a peer key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PeerStatus {
    /// Accepted once; further announcements of the same key are duplicates.
    Seen,
    /// Never dial again (until the application adds it back after a drop).
    Banned,
}

/// Why [`PeerRegistry::add_peer`] refused a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum RejectReason {
    /// Host is not on the configured allow-list.
    Whitelist,
    /// Key already seen.
    Duplicate,
    /// Key is banned.
    Banned,
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    status: HashMap<PeerKey, PeerStatus>,
    queue: VecDeque<Peer>,
    allow_list: HashSet<String>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that only admits the given hosts. An empty list admits everyone.
    pub fn with_allow_list<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow_list: hosts.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn allows(&self, host: &str) -> bool {
        self.allow_list.is_empty() || self.allow_list.contains(host)
    }

    /// Admit a discovered or manually added peer and queue it for dialing.
    ///
    /// Returns a copy of the queued peer. A rejection leaves the registry untouched.
    pub fn add_peer(
        &mut self,
        group: Option<GroupTag>,
        addr: PeerAddr,
    ) -> Result<Peer, RejectReason> {
        if !self.allows(&addr.host) {
            trace!(%addr, "peer not on allow-list");
            return Err(RejectReason::Whitelist);
        }

        let peer = Peer::new(addr, group);
        match self.status.get(peer.key()) {
            Some(PeerStatus::Seen) => return Err(RejectReason::Duplicate),
            Some(PeerStatus::Banned) => return Err(RejectReason::Banned),
            None => {}
        }

        self.status.insert(peer.key().clone(), PeerStatus::Seen);
        self.queue.push_back(peer.clone());
        debug!(key = %peer.key(), queued = self.queue.len(), "peer queued");
        Ok(peer)
    }

    /// Ban the key for `addr` under `group`. Queued entries are skipped lazily on dequeue.
    pub fn remove_peer(&mut self, group: Option<&GroupTag>, addr: &PeerAddr) -> PeerKey {
        let key = addr.key(group);
        self.ban(&key);
        key
    }

    pub fn ban(&mut self, key: &PeerKey) {
        debug!(%key, "peer banned");
        self.status.insert(key.clone(), PeerStatus::Banned);
    }

    /// Forget the key entirely so it can be rediscovered. Returns whether it was known.
    pub fn drop_peer(&mut self, key: &PeerKey) -> bool {
        debug!(%key, "peer dropped");
        self.status.remove(key).is_some()
    }

    /// Put a peer back at the end of the dial queue.
    pub fn requeue(&mut self, peer: Peer) {
        trace!(key = %peer.key(), retries = peer.retries(), "peer requeued");
        self.queue.push_back(peer);
    }

    /// Pop the next peer worth dialing, discarding banned entries on the way.
    pub fn next_dialable(&mut self) -> Option<Peer> {
        while let Some(peer) = self.queue.pop_front() {
            if self.is_banned(peer.key()) {
                trace!(key = %peer.key(), "skipping banned peer");
                continue;
            }
            return Some(peer);
        }
        None
    }

    pub fn status(&self, key: &PeerKey) -> Option<PeerStatus> {
        self.status.get(key).copied()
    }

    pub fn is_banned(&self, key: &PeerKey) -> bool {
        self.status(key) == Some(PeerStatus::Banned)
    }

    /// Peers waiting in the queue, banned entries not yet skipped included.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn known_len(&self) -> usize {
        self.status.len()
    }

    pub fn clear(&mut self) {
        self.status.clear();
        self.queue.clear();
    }
}
