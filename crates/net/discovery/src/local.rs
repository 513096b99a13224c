//! In-process discovery: every member of a group hears about every other
//! member and about itself, the way multicast DNS echoes local announcements.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use peerswarm_net_primitives::{GroupTag, PeerAddr};
use tracing::{debug, trace};

use crate::{Discovery, DiscoveryError, DiscoveryEvent, DiscoverySink};

const DEFAULT_ANNOUNCE_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone)]
struct Member {
    id: u64,
    addr: PeerAddr,
    sink: DiscoverySink,
}

/// Shared announcement board for [`LocalDiscovery`] instances.
#[derive(Debug, Default)]
pub struct LocalDiscoveryHub {
    groups: Mutex<HashMap<GroupTag, Vec<Member>>>,
    next_id: AtomicU64,
}

impl LocalDiscoveryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Discovery client announcing on `127.0.0.1`.
    pub fn discovery(self: &Arc<Self>) -> LocalDiscovery {
        LocalDiscovery {
            hub: Arc::clone(self),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            host: DEFAULT_ANNOUNCE_HOST.to_string(),
            sink: None,
        }
    }

    /// Number of members announced under `group`.
    pub fn members(&self, group: &GroupTag) -> usize {
        self.groups.lock().get(group).map_or(0, Vec::len)
    }

    fn announce(&self, group: &GroupTag, member: Member) {
        let mut groups = self.groups.lock();
        let members = groups.entry(group.clone()).or_default();
        members.retain(|m| !(m.id == member.id && m.addr == member.addr));

        // Tell everyone (the newcomer included) about the newcomer, then tell
        // the newcomer about everyone already present.
        members.push(member.clone());
        for m in members.iter() {
            let _ = m.sink.send(DiscoveryEvent::Peer {
                group: Some(group.clone()),
                addr: member.addr.clone(),
            });
            if m.id != member.id {
                let _ = member.sink.send(DiscoveryEvent::Peer {
                    group: Some(group.clone()),
                    addr: m.addr.clone(),
                });
            }
        }
        trace!(?group, addr = %member.addr, members = members.len(), "announced");
    }

    fn withdraw(&self, group: Option<&GroupTag>, id: u64) {
        let mut groups = self.groups.lock();
        match group {
            Some(group) => {
                if let Some(members) = groups.get_mut(group) {
                    members.retain(|m| m.id != id);
                }
            }
            None => groups.values_mut().for_each(|members| members.retain(|m| m.id != id)),
        }
        groups.retain(|_, members| !members.is_empty());
    }
}

/// One swarm's view of a [`LocalDiscoveryHub`].
#[derive(Debug)]
pub struct LocalDiscovery {
    hub: Arc<LocalDiscoveryHub>,
    id: u64,
    host: String,
    sink: Option<DiscoverySink>,
}

impl LocalDiscovery {
    /// Host announced to other members.
    pub fn with_announce_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

#[async_trait]
impl Discovery for LocalDiscovery {
    fn attach(&mut self, sink: DiscoverySink) {
        self.sink = Some(sink);
    }

    async fn join(&mut self, group: &GroupTag, port: u16) -> Result<(), DiscoveryError> {
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| DiscoveryError::Failed("no sink attached".into()))?;
        debug!(?group, port, "joining local discovery");
        self.hub.announce(
            group,
            Member {
                id: self.id,
                addr: PeerAddr::new(self.host.clone(), port),
                sink,
            },
        );
        Ok(())
    }

    async fn leave(&mut self, group: &GroupTag, _port: u16) -> Result<(), DiscoveryError> {
        debug!(?group, "leaving local discovery");
        self.hub.withdraw(Some(group), self.id);
        Ok(())
    }

    async fn destroy(&mut self) {
        self.hub.withdraw(None, self.id);
        self.sink = None;
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio::sync::mpsc;

    use super::*;

    fn attached(hub: &Arc<LocalDiscoveryHub>) -> (LocalDiscovery, mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut discovery = hub.discovery();
        discovery.attach(tx);
        (discovery, rx)
    }

    fn ports(rx: &mut mpsc::UnboundedReceiver<DiscoveryEvent>) -> Vec<u16> {
        let mut ports = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DiscoveryEvent::Peer { addr, .. } = event {
                ports.push(addr.port);
            }
        }
        ports.sort_unstable();
        ports
    }

    #[tokio::test]
    async fn test_members_hear_each_other_and_themselves() {
        let hub = LocalDiscoveryHub::new();
        let group = GroupTag::from("test");
        let (mut a, mut rx_a) = attached(&hub);
        let (mut b, mut rx_b) = attached(&hub);

        a.join(&group, 1000).await.unwrap();
        b.join(&group, 2000).await.unwrap();

        assert_eq!(ports(&mut rx_a), vec![1000, 2000]);
        assert_eq!(ports(&mut rx_b), vec![1000, 2000]);
        assert_eq!(hub.members(&group), 2);
    }

    #[tokio::test]
    async fn test_events_carry_group() {
        let hub = LocalDiscoveryHub::new();
        let group = GroupTag::from("g");
        let (mut a, mut rx) = attached(&hub);

        a.join(&group, 1000).await.unwrap();
        assert_matches!(
            rx.try_recv(),
            Ok(DiscoveryEvent::Peer { group: Some(g), addr }) if g == group && addr.host == "127.0.0.1"
        );
    }

    #[tokio::test]
    async fn test_groups_are_isolated() {
        let hub = LocalDiscoveryHub::new();
        let (mut a, mut rx_a) = attached(&hub);
        let (mut b, _rx_b) = attached(&hub);

        a.join(&GroupTag::from("x"), 1000).await.unwrap();
        b.join(&GroupTag::from("y"), 2000).await.unwrap();

        assert_eq!(ports(&mut rx_a), vec![1000]);
    }

    #[tokio::test]
    async fn test_leave_and_destroy_withdraw() {
        let hub = LocalDiscoveryHub::new();
        let group = GroupTag::from("test");
        let (mut a, _rx_a) = attached(&hub);
        let (mut b, _rx_b) = attached(&hub);

        a.join(&group, 1000).await.unwrap();
        b.join(&group, 2000).await.unwrap();

        a.leave(&group, 1000).await.unwrap();
        assert_eq!(hub.members(&group), 1);

        b.destroy().await;
        assert_eq!(hub.members(&group), 0);
    }

    #[tokio::test]
    async fn test_join_without_sink_fails() {
        let hub = LocalDiscoveryHub::new();
        let mut discovery = hub.discovery();
        assert_matches!(
            discovery.join(&GroupTag::from("g"), 1).await,
            Err(DiscoveryError::Failed(_))
        );
    }
}
