//! The swarm controller: sole owner of the registry, the live connection set
//! and the slot accounting.
//!
//! Every mutation happens on the controller task. Dials, handshakes, backoff
//! timers and accept loops run as spawned tasks and report back over
//! channels, so two handshakes finishing "at once" or a timeout racing a
//! connect are just two messages handled one after the other.

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;

use peerswarm_net_discovery::{Discovery, DiscoveryEvent};
use peerswarm_net_handshake::{Handshake, HandshakeError, Handshaked, Role};
use peerswarm_net_peer_backoff::Backoff;
use peerswarm_net_peer_registry::{Peer, PeerRegistry};
use peerswarm_net_primitives::{GroupTag, Identity, PeerAddr, PeerKey, TransportKind};
use peerswarm_net_transport::Transport;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::config::SwarmConfig;
use crate::connection::{self, ConnId};
use crate::dialer::{DialOutcome, DialRace};
use crate::error::SwarmError;
use crate::events::{BanReason, ConnectionInfo, EventSink, SwarmEvent};
use crate::handle::SwarmStats;
use crate::listener::{AcceptEvent, Accepted, accept_loop, bind_shared};
use crate::metrics::SwarmMetrics;
use crate::port_map::PortMapper;
use crate::resolver::{Held, LiveConnections, LiveEntry, Side, Verdict, resolve};

/// Requests from [`Swarm`](crate::Swarm) handles.
pub(crate) enum Command {
    Listen {
        port: u16,
        reply: oneshot::Sender<Result<u16, SwarmError>>,
    },
    Join {
        group: GroupTag,
        reply: oneshot::Sender<Result<(), SwarmError>>,
    },
    Leave {
        group: GroupTag,
        reply: oneshot::Sender<Result<(), SwarmError>>,
    },
    AddPeer {
        group: Option<GroupTag>,
        addr: PeerAddr,
        reply: oneshot::Sender<Result<PeerKey, SwarmError>>,
    },
    RemovePeer {
        group: Option<GroupTag>,
        addr: PeerAddr,
        reply: oneshot::Sender<PeerKey>,
    },
    Stats {
        reply: oneshot::Sender<SwarmStats>,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
}

/// Outcomes of spawned dial, handshake and timer tasks.
enum TaskEvent {
    DialFailed {
        id: ConnId,
        peer: Peer,
        timed_out: bool,
    },
    Handshake(HandshakeOutcome),
    Requeue {
        peer: Peer,
    },
}

struct HandshakeOutcome {
    id: ConnId,
    /// Set for outbound attempts.
    peer: Option<Peer>,
    addr: PeerAddr,
    kind: TransportKind,
    role: Role,
    result: Result<Handshaked, HandshakeError>,
}

/// An in-flight dial or inbound handshake, as far as duplicate resolution
/// can tell before the remote identity is known.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Attempt {
    Outbound { group: Option<GroupTag> },
    Inbound,
}

/// Everything [`Controller::new`] needs besides its channels.
pub(crate) struct Parts {
    pub(crate) config: SwarmConfig,
    pub(crate) local: Identity,
    pub(crate) reliable: Option<Arc<dyn Transport>>,
    pub(crate) best_effort: Option<Arc<dyn Transport>>,
    pub(crate) handshake: Handshake,
    pub(crate) discovery: Box<dyn Discovery>,
    pub(crate) port_mapper: Option<Arc<dyn PortMapper>>,
}

pub(crate) struct Controller {
    config: SwarmConfig,
    local: Identity,
    reliable: Option<Arc<dyn Transport>>,
    best_effort: Option<Arc<dyn Transport>>,
    race: DialRace,
    handshake: Handshake,
    discovery: Box<dyn Discovery>,
    port_mapper: Option<Arc<dyn PortMapper>>,

    registry: PeerRegistry,
    live: LiveConnections,
    /// In-flight dials, handshakes and established connections.
    slots: HashSet<ConnId>,
    /// Dials and inbound handshakes that have not produced a connection yet.
    attempts: HashMap<ConnId, Attempt>,
    next_id: u64,
    /// Bound port once listening.
    port: Option<u16>,
    /// Joined groups, replayed to discovery once listening.
    groups: Vec<GroupTag>,
    destroyed: bool,

    tasks: JoinSet<()>,
    accept_tasks: JoinSet<()>,
    events: EventSink,
    metrics: SwarmMetrics,

    commands: mpsc::Receiver<Command>,
    task_tx: mpsc::UnboundedSender<TaskEvent>,
    task_rx: mpsc::UnboundedReceiver<TaskEvent>,
    accept_tx: mpsc::UnboundedSender<AcceptEvent>,
    accept_rx: mpsc::UnboundedReceiver<AcceptEvent>,
    closed_tx: mpsc::UnboundedSender<ConnId>,
    closed_rx: mpsc::UnboundedReceiver<ConnId>,
    discovery_rx: mpsc::UnboundedReceiver<DiscoveryEvent>,
}

impl Controller {
    pub(crate) fn new(parts: Parts, commands: mpsc::Receiver<Command>, events: EventSink) -> Self {
        let Parts {
            config,
            local,
            reliable,
            best_effort,
            handshake,
            mut discovery,
            port_mapper,
        } = parts;

        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let (discovery_tx, discovery_rx) = mpsc::unbounded_channel();
        discovery.attach(discovery_tx);

        let race = DialRace::new(
            reliable.clone(),
            best_effort.clone(),
            config.connect_timeout,
            config.best_effort_grace,
        );
        let registry = PeerRegistry::with_allow_list(config.allow_list.iter().cloned());

        Self {
            config,
            local,
            reliable,
            best_effort,
            race,
            handshake,
            discovery,
            port_mapper,
            registry,
            live: LiveConnections::default(),
            slots: HashSet::new(),
            attempts: HashMap::new(),
            next_id: 0,
            port: None,
            groups: Vec::new(),
            destroyed: false,
            tasks: JoinSet::new(),
            accept_tasks: JoinSet::new(),
            events,
            metrics: SwarmMetrics::default(),
            commands,
            task_tx,
            task_rx,
            accept_tx,
            accept_rx,
            closed_tx,
            closed_rx,
            discovery_rx,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(local = %self.local, "swarm controller started");
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => {
                        if self.on_command(cmd).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        debug!("all swarm handles dropped");
                        self.destroy().await;
                        break;
                    }
                },
                Some(event) = self.task_rx.recv() => self.on_task_event(event),
                Some(event) = self.accept_rx.recv() => self.on_accept(event),
                Some(id) = self.closed_rx.recv() => self.on_connection_closed(id),
                Some(event) = self.discovery_rx.recv() => self.on_discovery(event),
                Some(res) = self.tasks.join_next() => {
                    if let Err(error) = res {
                        if error.is_panic() {
                            warn!(%error, "swarm task panicked");
                        }
                    }
                }
            }
        }
    }

    /// Handle one request. Breaks once the swarm is destroyed.
    async fn on_command(&mut self, cmd: Command) -> ControlFlow<()> {
        match cmd {
            Command::Listen { port, reply } => {
                let _ = reply.send(self.listen(port).await);
            }
            Command::Join { group, reply } => {
                let _ = reply.send(self.join(group).await);
            }
            Command::Leave { group, reply } => {
                let _ = reply.send(self.leave(group).await);
            }
            Command::AddPeer { group, addr, reply } => {
                let _ = reply.send(self.add_peer(group, addr));
            }
            Command::RemovePeer { group, addr, reply } => {
                let _ = reply.send(self.remove_peer(group, addr));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Destroy { reply } => {
                self.destroy().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn listen(&mut self, port: u16) -> Result<u16, SwarmError> {
        if let Some(bound) = self.port {
            return Ok(bound);
        }

        let transports: Vec<&Arc<dyn Transport>> =
            self.reliable.iter().chain(self.best_effort.iter()).collect();
        let bound = match bind_shared(&transports, port).await {
            Ok(bound) => bound,
            Err(error) => {
                warn!(port, %error, "failed to listen");
                self.events.emit(SwarmEvent::Error {
                    message: error.to_string(),
                });
                return Err(error);
            }
        };

        let port = bound.port;
        for (kind, listener) in bound.listeners {
            self.accept_tasks
                .spawn(accept_loop(kind, listener, self.accept_tx.clone()));
        }
        self.port = Some(port);
        info!(port, "listening");
        self.events.emit(SwarmEvent::Listening { port });

        if let Some(mapper) = &self.port_mapper {
            if let Err(error) = mapper.map_port(port, port).await {
                debug!(port, %error, "port mapping failed");
                self.events.emit(SwarmEvent::Error {
                    message: format!("port mapping failed: {error}"),
                });
            }
        }

        for group in self.groups.clone() {
            if let Err(error) = self.discovery.join(&group, port).await {
                self.events.emit(SwarmEvent::Error {
                    message: error.to_string(),
                });
            }
        }
        Ok(port)
    }

    async fn join(&mut self, group: GroupTag) -> Result<(), SwarmError> {
        if !self.groups.contains(&group) {
            self.groups.push(group.clone());
        }
        match self.port {
            Some(port) => {
                debug!(?group, port, "joining");
                Ok(self.discovery.join(&group, port).await?)
            }
            // Listening replays every joined group.
            None => self.listen(self.config.port).await.map(|_| ()),
        }
    }

    async fn leave(&mut self, group: GroupTag) -> Result<(), SwarmError> {
        self.groups.retain(|g| g != &group);
        if let Some(port) = self.port {
            debug!(?group, port, "leaving");
            self.discovery.leave(&group, port).await?;
        }
        Ok(())
    }

    fn add_peer(&mut self, group: Option<GroupTag>, addr: PeerAddr) -> Result<PeerKey, SwarmError> {
        match self.registry.add_peer(group.clone(), addr.clone()) {
            Ok(peer) => {
                let key = peer.key().clone();
                self.events.emit(SwarmEvent::PeerDiscovered {
                    peer: key.clone(),
                    addr,
                    group,
                });
                self.dial_next();
                Ok(key)
            }
            Err(reason) => {
                trace!(%addr, %reason, "peer rejected");
                self.events.emit(SwarmEvent::PeerRejected {
                    addr,
                    group,
                    reason,
                });
                Err(SwarmError::Rejected(reason))
            }
        }
    }

    fn remove_peer(&mut self, group: Option<GroupTag>, addr: PeerAddr) -> PeerKey {
        let key = self.registry.remove_peer(group.as_ref(), &addr);
        self.events.emit(SwarmEvent::PeerBanned {
            peer: key.clone(),
            reason: BanReason::ApplicationRequested,
        });
        key
    }

    fn stats(&self) -> SwarmStats {
        let total = self.slots.len();
        let connected = self.live.len();
        SwarmStats {
            queued: self.registry.queued_len(),
            connecting: total.saturating_sub(connected),
            connected,
            total,
            port: self.port,
        }
    }

    fn reserve(&mut self) -> ConnId {
        self.next_id += 1;
        let id = ConnId::new(self.next_id);
        self.slots.insert(id);
        self.metrics.set_connections(self.slots.len());
        id
    }

    /// Free the slot of `id`. Returns false when it was already free.
    fn release(&mut self, id: ConnId) -> bool {
        let released = self.slots.remove(&id);
        if released {
            self.metrics.set_connections(self.slots.len());
        }
        released
    }

    /// Start dialing queued peers while capacity allows.
    fn dial_next(&mut self) {
        while !self.destroyed && !self.config.is_full(self.slots.len()) {
            let Some(peer) = self.registry.next_dialable() else {
                break;
            };
            self.start_dial(peer);
        }
    }

    fn start_dial(&mut self, peer: Peer) {
        let id = self.reserve();
        self.attempts.insert(
            id,
            Attempt::Outbound {
                group: peer.group().cloned(),
            },
        );
        debug!(%id, peer = %peer.key(), retries = peer.retries(), "dialing");
        self.metrics.inc_dial_attempts();
        self.events.emit(SwarmEvent::Connecting {
            peer: peer.key().clone(),
            addr: peer.addr().clone(),
            retries: peer.retries(),
        });

        let race = self.race.clone();
        let handshake = self.handshake.clone();
        let tx = self.task_tx.clone();
        self.tasks.spawn(async move {
            let addr = peer.addr().clone();
            let event = match race.run(&addr).await {
                DialOutcome::Connected { stream, kind } => {
                    let result = handshake
                        .run(stream, Role::Dialer, peer.group().cloned())
                        .await;
                    TaskEvent::Handshake(HandshakeOutcome {
                        id,
                        peer: Some(peer),
                        addr,
                        kind,
                        role: Role::Dialer,
                        result,
                    })
                }
                DialOutcome::Failed { timed_out } => TaskEvent::DialFailed {
                    id,
                    peer,
                    timed_out,
                },
            };
            let _ = tx.send(event);
        });
    }

    fn on_accept(&mut self, event: AcceptEvent) {
        let Accepted { stream, addr, kind } = match event {
            AcceptEvent::Accepted(accepted) => accepted,
            AcceptEvent::Failed { kind, error } => {
                self.events.emit(SwarmEvent::Error {
                    message: format!("{kind} listener: {error}"),
                });
                return;
            }
        };

        if self.destroyed {
            return;
        }
        if self.config.is_full(self.slots.len()) {
            debug!(%addr, %kind, "at capacity, refusing inbound connection");
            return;
        }

        let id = self.reserve();
        self.attempts.insert(id, Attempt::Inbound);
        trace!(%id, %addr, %kind, "inbound connection");
        let handshake = self.handshake.clone();
        let tx = self.task_tx.clone();
        self.tasks.spawn(async move {
            let result = handshake.run(stream, Role::Listener, None).await;
            let _ = tx.send(TaskEvent::Handshake(HandshakeOutcome {
                id,
                peer: None,
                addr,
                kind,
                role: Role::Listener,
                result,
            }));
        });
    }

    fn on_task_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::DialFailed {
                id,
                peer,
                timed_out,
            } => {
                if self.release(id) {
                    debug!(%id, peer = %peer.key(), timed_out, "dial failed");
                    self.metrics.inc_dial_failures();
                    self.events.emit(SwarmEvent::ConnectFailed {
                        peer: peer.key().clone(),
                        addr: peer.addr().clone(),
                        timed_out,
                    });
                    self.backoff(peer);
                    self.dial_next();
                }
                self.settle(id);
            }
            TaskEvent::Handshake(outcome) => {
                let id = outcome.id;
                self.on_handshake(outcome);
                self.settle(id);
            }
            TaskEvent::Requeue { peer } => {
                if self.destroyed {
                    return;
                }
                self.registry.requeue(peer);
                self.dial_next();
            }
        }
    }

    fn on_handshake(&mut self, outcome: HandshakeOutcome) {
        let HandshakeOutcome {
            id,
            peer,
            addr,
            kind,
            role,
            result,
        } = outcome;
        if !self.slots.contains(&id) {
            return;
        }

        let Handshaked {
            stream,
            remote,
            group,
        } = match result {
            Ok(handshaked) => handshaked,
            Err(error) => {
                self.release(id);
                debug!(%id, %addr, ?role, %error, "handshake failed");
                if error.is_timeout() {
                    self.metrics.inc_handshake_timeouts();
                    self.events.emit(SwarmEvent::HandshakeTimeout {
                        addr: addr.clone(),
                        initiator: role.is_initiator(),
                    });
                }
                if let Some(peer) = peer {
                    if !error.is_timeout() {
                        self.events.emit(SwarmEvent::ConnectFailed {
                            peer: peer.key().clone(),
                            addr,
                            timed_out: false,
                        });
                    }
                    self.backoff(peer);
                }
                self.dial_next();
                return;
            }
        };

        let key = remote.connection_key(group.as_ref());
        if key == self.local.connection_key(group.as_ref()) {
            self.release(id);
            drop(stream);
            debug!(%id, %addr, "connected to self");
            if let Some(peer) = peer {
                self.registry.ban(peer.key());
                self.events.emit(SwarmEvent::PeerBanned {
                    peer: peer.key().clone(),
                    reason: BanReason::SelfConnection,
                });
            }
            self.dial_next();
            return;
        }

        let peer = peer.map(|mut peer| {
            peer.reset_retries();
            peer
        });
        let info = ConnectionInfo {
            id,
            kind,
            initiator: role.is_initiator(),
            addr,
            group,
            remote,
            key,
        };
        self.establish(info, stream, peer);
        self.dial_next();
    }

    /// Install a handshaked connection, resolving against any live duplicate.
    fn establish(
        &mut self,
        info: ConnectionInfo,
        stream: peerswarm_net_transport::BoxedStream,
        peer: Option<Peer>,
    ) {
        let mut peers: Vec<Peer> = peer.into_iter().collect();

        if let Some(existing) = self.live.get(&info.key) {
            let local = self.local.connection_key(info.group.as_ref());
            let candidate = Side {
                kind: info.kind,
                initiator: info.initiator,
            };

            match resolve(&local, &info.key, existing.side(), candidate) {
                Verdict::KeepExisting => {
                    debug!(id = %info.id, kept = %existing.info.id, key = %info.key, "redundant connection");
                    drop(stream);
                    self.release(info.id);
                    if let Some(existing) = self.live.get_mut(&info.key) {
                        // The survivor takes over reconnecting to the dialed peer.
                        existing.peers.append(&mut peers);
                    }
                    self.metrics.inc_redundant();
                    self.events.emit(SwarmEvent::RedundantConnection { info });
                    return;
                }
                Verdict::ReplaceExisting => {
                    // Evict before destroying so the old socket's close is not
                    // taken for a live connection closing.
                    if let Some(old) = self.live.remove(&info.key) {
                        debug!(id = %info.id, evicted = %old.info.id, key = %info.key, "replacing connection");
                        old.handle.kill();
                        self.release(old.info.id);
                        peers.extend(old.peers);
                        self.metrics.inc_redundant();
                        self.events
                            .emit(SwarmEvent::RedundantConnection { info: old.info });
                    }
                }
            }
        }

        let (connection, handle) = connection::pair(stream, info.clone(), self.closed_tx.clone());
        self.metrics.inc_established();
        info!(
            id = %info.id,
            remote = %info.remote,
            kind = %info.kind,
            initiator = info.initiator,
            addr = %info.addr,
            "connection established"
        );

        let blockers = self.challengers(&info);
        if blockers.is_empty() {
            self.live.insert(LiveEntry {
                info: info.clone(),
                handle,
                peers,
                held: None,
            });
            self.events
                .emit(SwarmEvent::Connection { info, connection });
        } else {
            debug!(id = %info.id, pending = blockers.len(), "holding connection back");
            self.live.insert(LiveEntry {
                info,
                handle,
                peers,
                held: Some(Held {
                    connection,
                    blockers,
                }),
            });
        }
    }

    /// In-flight attempts that would replace `info` if they turned out to reach
    /// the same remote. Inbound attempts have no group until their handshake
    /// completes, so any of them counts.
    fn challengers(&self, info: &ConnectionInfo) -> HashSet<ConnId> {
        let local = self.local.connection_key(info.group.as_ref());
        let existing = Side {
            kind: info.kind,
            initiator: info.initiator,
        };
        let replaces = |initiator: bool| {
            let challenger = Side {
                kind: info.kind,
                initiator,
            };
            resolve(&local, &info.key, existing, challenger) == Verdict::ReplaceExisting
        };

        self.attempts
            .iter()
            .filter(|(id, attempt)| {
                **id != info.id
                    && match attempt {
                        Attempt::Outbound { group } => *group == info.group && replaces(true),
                        Attempt::Inbound => replaces(false),
                    }
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Forget a finished attempt and hand out the connections that were only
    /// waiting on it.
    fn settle(&mut self, id: ConnId) {
        if self.attempts.remove(&id).is_none() {
            return;
        }

        let mut ready = Vec::new();
        for entry in self.live.iter_mut() {
            let Some(held) = &mut entry.held else {
                continue;
            };
            held.blockers.remove(&id);
            if held.blockers.is_empty() {
                if let Some(held) = entry.held.take() {
                    ready.push((entry.info.clone(), held.connection));
                }
            }
        }
        for (info, connection) in ready {
            trace!(id = %info.id, "releasing held connection");
            self.events
                .emit(SwarmEvent::Connection { info, connection });
        }
    }

    fn on_connection_closed(&mut self, id: ConnId) {
        // Evicted and killed connections are no longer live; ignore them.
        let Some(entry) = self.live.remove_by_id(id) else {
            trace!(%id, "close of a connection that is not live");
            return;
        };
        self.release(id);
        debug!(%id, key = %entry.info.key, "connection closed");
        self.events
            .emit(SwarmEvent::ConnectionClosed { info: entry.info });
        for peer in entry.peers {
            self.backoff(peer);
        }
        self.dial_next();
    }

    fn on_discovery(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Peer { group, addr } => {
                let _ = self.add_peer(group, addr);
            }
            DiscoveryEvent::Error(message) => {
                warn!(%message, "discovery error");
                self.events.emit(SwarmEvent::Error { message });
            }
        }
    }

    /// Schedule a requeue of `peer`, or drop it once its retries run out.
    fn backoff(&mut self, mut peer: Peer) {
        if self.destroyed || self.registry.is_banned(peer.key()) {
            return;
        }

        match self.config.backoff.next(peer.retries()) {
            Backoff::Retry { delay, retries } => {
                trace!(peer = %peer.key(), ?delay, retries, "requeue scheduled");
                peer.set_retries(retries);
                let tx = self.task_tx.clone();
                self.tasks.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(TaskEvent::Requeue { peer });
                });
            }
            Backoff::Drop => {
                let key = peer.key().clone();
                debug!(peer = %key, "retries exhausted, dropping peer");
                self.registry.drop_peer(&key);
                self.events.emit(SwarmEvent::PeerDropped { peer: key });
            }
        }
    }

    async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        debug!("destroying swarm");

        self.discovery.destroy().await;

        for entry in self.live.drain() {
            entry.handle.kill();
        }
        // In-flight dials and handshakes, backoff timers.
        self.tasks.shutdown().await;
        // Listening sockets close once their accept loops are gone.
        self.accept_tasks.shutdown().await;
        self.slots.clear();
        self.attempts.clear();
        self.metrics.set_connections(0);
        self.registry.clear();

        if let (Some(mapper), Some(port)) = (&self.port_mapper, self.port.take()) {
            if let Err(error) = mapper.unmap_port(port).await {
                warn!(port, %error, "failed to remove port mapping");
            }
        }

        info!("swarm closed");
        self.events.close();
    }
}
