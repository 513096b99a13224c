//! Duplicate connection resolution.
//!
//! At most one connection per [`ConnectionKey`] lives at a time. When a second
//! one completes its handshake, both ends decide independently which physical
//! connection survives, using only their own role and identity ordering. The
//! rule keeps the connection dialed by the side with the smaller key, except
//! that a reliable connection always supersedes a best-effort one.

use std::collections::{HashMap, HashSet};

use peerswarm_net_peer_registry::Peer;
use peerswarm_net_primitives::{ConnectionKey, TransportKind};

use crate::connection::{ConnId, Connection, ConnectionHandle};
use crate::events::ConnectionInfo;

/// The parts of a connection the resolution rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Side {
    pub kind: TransportKind,
    pub initiator: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep the existing connection, destroy the candidate.
    KeepExisting,
    /// Evict the existing connection, install the candidate.
    ReplaceExisting,
}

/// Decide between an `existing` live connection and a `candidate` with the
/// same remote `key`, from the point of view of the engine whose own key is
/// `local`.
pub fn resolve(
    local: &ConnectionKey,
    key: &ConnectionKey,
    existing: Side,
    candidate: Side,
) -> Verdict {
    if existing.kind.is_best_effort() && candidate.kind.is_reliable() {
        return Verdict::ReplaceExisting;
    }

    let loses = (candidate.initiator && key < local)
        || (!candidate.initiator && key > local)
        || (candidate.kind.is_best_effort() && existing.kind.is_reliable());

    if loses {
        Verdict::KeepExisting
    } else {
        Verdict::ReplaceExisting
    }
}

/// A connection in the live set.
#[derive(Debug)]
pub(crate) struct LiveEntry {
    pub(crate) info: ConnectionInfo,
    pub(crate) handle: ConnectionHandle,
    /// Dialed peers to requeue when this connection closes. Every dial that
    /// reached this remote ends up here, whichever physical connection won.
    pub(crate) peers: Vec<Peer>,
    /// Set while the application half has not been handed out yet.
    pub(crate) held: Option<Held>,
}

/// A connection kept back from the application until the in-flight attempts
/// that could still replace it have finished.
#[derive(Debug)]
pub(crate) struct Held {
    pub(crate) connection: Connection,
    pub(crate) blockers: HashSet<ConnId>,
}

impl LiveEntry {
    pub(crate) fn side(&self) -> Side {
        Side {
            kind: self.info.kind,
            initiator: self.info.initiator,
        }
    }
}

/// Live connections keyed by remote [`ConnectionKey`].
#[derive(Debug, Default)]
pub(crate) struct LiveConnections {
    by_key: HashMap<ConnectionKey, LiveEntry>,
    by_id: HashMap<ConnId, ConnectionKey>,
}

impl LiveConnections {
    pub(crate) fn get(&self, key: &ConnectionKey) -> Option<&LiveEntry> {
        self.by_key.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &ConnectionKey) -> Option<&mut LiveEntry> {
        self.by_key.get_mut(key)
    }

    /// Install `entry`, returning whatever it displaced.
    pub(crate) fn insert(&mut self, entry: LiveEntry) -> Option<LiveEntry> {
        let key = entry.info.key.clone();
        self.by_id.insert(entry.info.id, key.clone());
        let old = self.by_key.insert(key, entry);
        if let Some(old) = &old {
            self.by_id.remove(&old.info.id);
        }
        old
    }

    pub(crate) fn remove(&mut self, key: &ConnectionKey) -> Option<LiveEntry> {
        let entry = self.by_key.remove(key)?;
        self.by_id.remove(&entry.info.id);
        Some(entry)
    }

    /// Remove the connection with `id` if it is still the live one for its key.
    pub(crate) fn remove_by_id(&mut self, id: ConnId) -> Option<LiveEntry> {
        let key = self.by_id.remove(&id)?;
        self.by_key.remove(&key)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut LiveEntry> + '_ {
        self.by_key.values_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = LiveEntry> + '_ {
        self.by_id.clear();
        self.by_key.drain().map(|(_, entry)| entry)
    }
}

#[cfg(test)]
mod tests {
    use peerswarm_net_primitives::{GroupTag, Identity};
    use proptest::prelude::*;

    use super::*;

    const RELIABLE: TransportKind = TransportKind::Reliable;
    const BEST_EFFORT: TransportKind = TransportKind::BestEffort;

    fn side(kind: TransportKind, initiator: bool) -> Side {
        Side { kind, initiator }
    }

    fn keys() -> (ConnectionKey, ConnectionKey) {
        let group = GroupTag::from("test");
        let a = Identity::from_bytes(vec![0x01; 32]).unwrap();
        let b = Identity::from_bytes(vec![0x02; 32]).unwrap();
        (
            a.connection_key(Some(&group)),
            b.connection_key(Some(&group)),
        )
    }

    #[test]
    fn test_reliable_supersedes_best_effort() {
        let (small, large) = keys();
        // Even a candidate that would lose on ordering wins on transport.
        assert_eq!(
            resolve(&large, &small, side(BEST_EFFORT, true), side(RELIABLE, true)),
            Verdict::ReplaceExisting
        );
    }

    #[test]
    fn test_best_effort_never_replaces_reliable() {
        let (small, large) = keys();
        assert_eq!(
            resolve(&small, &large, side(RELIABLE, false), side(BEST_EFFORT, true)),
            Verdict::KeepExisting
        );
    }

    #[test]
    fn test_smaller_side_dial_survives() {
        let (small, large) = keys();

        // Local is smaller: our outbound candidate replaces their inbound one.
        assert_eq!(
            resolve(&small, &large, side(RELIABLE, false), side(RELIABLE, true)),
            Verdict::ReplaceExisting
        );
        // Local is larger: our outbound candidate loses to the one they dialed.
        assert_eq!(
            resolve(&large, &small, side(RELIABLE, false), side(RELIABLE, true)),
            Verdict::KeepExisting
        );
    }

    /// Which physical connection (identified by which engine dialed it) an
    /// engine keeps after seeing `first` then `second`.
    fn survivor(
        local: &ConnectionKey,
        remote: &ConnectionKey,
        first: (TransportKind, bool),
        second: (TransportKind, bool),
    ) -> (TransportKind, bool) {
        match resolve(
            local,
            remote,
            side(first.0, first.1),
            side(second.0, second.1),
        ) {
            Verdict::KeepExisting => first,
            Verdict::ReplaceExisting => second,
        }
    }

    fn kind() -> impl Strategy<Value = TransportKind> {
        prop_oneof![Just(RELIABLE), Just(BEST_EFFORT)]
    }

    proptest! {
        /// Two engines holding the same pair of physical connections, seen in
        /// any order, agree on which one survives.
        #[test]
        fn test_resolution_is_symmetric(
            a_bytes in proptest::collection::vec(any::<u8>(), 32),
            b_bytes in proptest::collection::vec(any::<u8>(), 32),
            kind_a in kind(),
            kind_b in kind(),
            a_order in any::<bool>(),
            b_order in any::<bool>(),
        ) {
            prop_assume!(a_bytes != b_bytes);
            let group = GroupTag::from("g");
            let a = Identity::from_bytes(a_bytes).unwrap().connection_key(Some(&group));
            let b = Identity::from_bytes(b_bytes).unwrap().connection_key(Some(&group));

            // Connection 1 was dialed by A over kind_a, connection 2 by B over kind_b.
            // On A, conn 1 is outbound; on B, conn 2 is outbound.
            let a_view = if a_order {
                survivor(&a, &b, (kind_a, true), (kind_b, false))
            } else {
                survivor(&a, &b, (kind_b, false), (kind_a, true))
            };
            let b_view = if b_order {
                survivor(&b, &a, (kind_b, true), (kind_a, false))
            } else {
                survivor(&b, &a, (kind_a, false), (kind_b, true))
            };

            // Translate each view to "dialed by A".
            let a_keeps_a_dial = a_view.1;
            let b_keeps_a_dial = !b_view.1;
            prop_assert_eq!(a_keeps_a_dial, b_keeps_a_dial);
        }
    }

    #[test]
    fn test_live_set_replace_and_remove_by_id() {
        use peerswarm_net_primitives::PeerAddr;
        use tokio::sync::mpsc;

        let remote = Identity::random();
        let key = remote.connection_key(None);
        let (tx, _rx) = mpsc::unbounded_channel();
        let entry = |id: u64| {
            let info = ConnectionInfo {
                id: ConnId::new(id),
                kind: RELIABLE,
                initiator: true,
                addr: PeerAddr::new("127.0.0.1", 1),
                group: None,
                key: key.clone(),
                remote: remote.clone(),
            };
            let (stream, _) = tokio::io::duplex(8);
            let (conn, handle) =
                crate::connection::pair(Box::new(stream), info.clone(), tx.clone());
            drop(conn);
            LiveEntry {
                info,
                handle,
                peers: Vec::new(),
                held: None,
            }
        };

        let mut live = LiveConnections::default();
        assert!(live.insert(entry(1)).is_none());
        let old = live.insert(entry(2)).unwrap();
        assert_eq!(old.info.id, ConnId::new(1));
        assert_eq!(live.len(), 1);

        // Stale id is ignored.
        assert!(live.remove_by_id(ConnId::new(1)).is_none());
        assert_eq!(live.len(), 1);
        assert_eq!(live.remove_by_id(ConnId::new(2)).unwrap().info.id, ConnId::new(2));
        assert_eq!(live.len(), 0);
    }
}
