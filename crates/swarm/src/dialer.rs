//! Races the reliable and best-effort transports for one peer.
//!
//! Both enabled transports dial concurrently under one shared deadline. A
//! reliable success wins immediately. A best-effort success is held for a
//! grace window while the reliable dial is still pending, since best-effort
//! "connected" is not trustworthy under loss; a reliable success inside the
//! window preempts it. Losing and abandoned sockets are dropped.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, OptionFuture};
use peerswarm_net_primitives::{PeerAddr, TransportKind};
use peerswarm_net_transport::{BoxedStream, Transport};
use tokio::time::Sleep;
use tracing::trace;

/// Result of one dial race.
pub(crate) enum DialOutcome {
    Connected {
        stream: BoxedStream,
        kind: TransportKind,
    },
    Failed {
        timed_out: bool,
    },
}

impl std::fmt::Debug for DialOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected { kind, .. } => f.debug_struct("Connected").field("kind", kind).finish(),
            Self::Failed { timed_out } => f
                .debug_struct("Failed")
                .field("timed_out", timed_out)
                .finish(),
        }
    }
}

/// One transport's progress within a race.
enum Slot {
    Dialing(BoxFuture<'static, io::Result<BoxedStream>>),
    Settled,
}

impl Slot {
    fn start(transport: Option<&Arc<dyn Transport>>, addr: &PeerAddr) -> Self {
        match transport {
            Some(transport) => {
                let transport = Arc::clone(transport);
                let addr = addr.clone();
                Self::Dialing(async move { transport.connect(&addr).await }.boxed())
            }
            None => Self::Settled,
        }
    }

    fn is_pending(&self) -> bool {
        matches!(self, Self::Dialing(_))
    }

    fn future(&mut self) -> OptionFuture<&mut BoxFuture<'static, io::Result<BoxedStream>>> {
        match self {
            Self::Dialing(fut) => Some(fut).into(),
            Self::Settled => None.into(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct DialRace {
    reliable: Option<Arc<dyn Transport>>,
    best_effort: Option<Arc<dyn Transport>>,
    timeout: Duration,
    grace: Duration,
}

impl DialRace {
    pub(crate) fn new(
        reliable: Option<Arc<dyn Transport>>,
        best_effort: Option<Arc<dyn Transport>>,
        timeout: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            reliable,
            best_effort,
            timeout,
            grace,
        }
    }

    pub(crate) async fn run(&self, addr: &PeerAddr) -> DialOutcome {
        let mut reliable = Slot::start(self.reliable.as_ref(), addr);
        let mut best_effort = Slot::start(self.best_effort.as_ref(), addr);
        let mut held: Option<BoxedStream> = None;
        let mut grace: Option<std::pin::Pin<Box<Sleep>>> = None;

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            if !reliable.is_pending() && !best_effort.is_pending() {
                return match held {
                    Some(stream) => best_effort_won(stream),
                    None => DialOutcome::Failed { timed_out: false },
                };
            }

            tokio::select! {
                Some(res) = reliable.future(), if reliable.is_pending() => {
                    reliable = Slot::Settled;
                    match res {
                        Ok(stream) => {
                            trace!(%addr, preempted = held.is_some(), "reliable dial won");
                            return DialOutcome::Connected {
                                stream,
                                kind: TransportKind::Reliable,
                            };
                        }
                        Err(error) => {
                            trace!(%addr, %error, "reliable dial failed");
                            if let Some(stream) = held.take() {
                                return best_effort_won(stream);
                            }
                        }
                    }
                }
                Some(res) = best_effort.future(), if best_effort.is_pending() => {
                    best_effort = Slot::Settled;
                    match res {
                        Ok(stream) if reliable.is_pending() => {
                            trace!(%addr, grace = ?self.grace, "best-effort connected, waiting for reliable");
                            held = Some(stream);
                            grace = Some(Box::pin(tokio::time::sleep(self.grace)));
                        }
                        Ok(stream) => return best_effort_won(stream),
                        Err(error) => trace!(%addr, %error, "best-effort dial failed"),
                    }
                }
                Some(()) = OptionFuture::from(grace.as_mut()), if grace.is_some() => {
                    if let Some(stream) = held.take() {
                        return best_effort_won(stream);
                    }
                    grace = None;
                }
                () = &mut deadline => {
                    return match held.take() {
                        Some(stream) => best_effort_won(stream),
                        None => {
                            trace!(%addr, timeout = ?self.timeout, "dial timed out");
                            DialOutcome::Failed { timed_out: true }
                        }
                    };
                }
            }
        }
    }
}

fn best_effort_won(stream: BoxedStream) -> DialOutcome {
    DialOutcome::Connected {
        stream,
        kind: TransportKind::BestEffort,
    }
}
