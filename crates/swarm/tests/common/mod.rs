#![allow(dead_code)]

use std::time::Duration;

use peerswarm::{Connection, Swarm, SwarmEvent, SwarmEvents, SwarmStats};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Event receiver that keeps every connection it skips past alive.
pub struct Events {
    rx: SwarmEvents,
    pub connections: Vec<Connection>,
    pub names: Vec<&'static str>,
}

impl Events {
    pub fn new(rx: SwarmEvents) -> Self {
        Self {
            rx,
            connections: Vec::new(),
            names: Vec::new(),
        }
    }

    pub async fn next(&mut self) -> Option<SwarmEvent> {
        let event = self.rx.recv().await?;
        self.names.push(event.name());
        Some(event)
    }

    /// Wait for the first event matching `pred`.
    pub async fn wait(
        &mut self,
        within: Duration,
        mut pred: impl FnMut(&SwarmEvent) -> bool,
    ) -> SwarmEvent {
        tokio::time::timeout(within, async {
            loop {
                let event = self.next().await.expect("event stream ended");
                if pred(&event) {
                    return event;
                }
                if let SwarmEvent::Connection { connection, .. } = event {
                    self.connections.push(connection);
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    pub async fn connection(&mut self, within: Duration) -> Connection {
        match self
            .wait(within, |e| matches!(e, SwarmEvent::Connection { .. }))
            .await
        {
            SwarmEvent::Connection { connection, .. } => connection,
            _ => unreachable!(),
        }
    }

    /// Drain whatever is already queued, keeping connections.
    pub fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.names.push(event.name());
            if let SwarmEvent::Connection { connection, .. } = event {
                self.connections.push(connection);
            }
        }
    }

    pub fn count(&self, name: &str) -> usize {
        self.names.iter().filter(|n| **n == name).count()
    }

    pub fn open_connections(&self) -> Vec<&Connection> {
        self.connections.iter().filter(|c| !c.is_closed()).collect()
    }
}

/// Poll `stats` until `pred` holds.
pub async fn wait_stats(
    swarm: &Swarm,
    within: Duration,
    mut pred: impl FnMut(&SwarmStats) -> bool,
) -> SwarmStats {
    tokio::time::timeout(within, async {
        loop {
            let stats = swarm.stats().await.expect("swarm alive");
            if pred(&stats) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for stats")
}

/// A local TCP port with nothing listening on it.
pub fn unused_tcp_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
