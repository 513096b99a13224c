//! Swarm metrics

use metrics::{Counter, Gauge};

/// Connection lifecycle metrics. No exporter is installed by this crate.
#[derive(Clone, Debug)]
pub(crate) struct SwarmMetrics {
    /// Dial attempts started
    dial_attempts_total: Counter,
    /// Dial attempts that never produced a raw connection
    dial_failures_total: Counter,
    /// Handshakes abandoned on timeout
    handshake_timeouts_total: Counter,
    /// Connections promoted to the live set
    established_total: Counter,
    /// Connections destroyed by duplicate resolution
    redundant_total: Counter,
    /// In-flight plus established connections
    connections: Gauge,
}

impl Default for SwarmMetrics {
    fn default() -> Self {
        Self {
            dial_attempts_total: metrics::counter!("peerswarm.dial.attempts_total"),
            dial_failures_total: metrics::counter!("peerswarm.dial.failures_total"),
            handshake_timeouts_total: metrics::counter!("peerswarm.handshake.timeouts_total"),
            established_total: metrics::counter!("peerswarm.connections.established_total"),
            redundant_total: metrics::counter!("peerswarm.connections.redundant_total"),
            connections: metrics::gauge!("peerswarm.connections.total"),
        }
    }
}

impl SwarmMetrics {
    pub(crate) fn inc_dial_attempts(&self) {
        self.dial_attempts_total.increment(1);
    }

    pub(crate) fn inc_dial_failures(&self) {
        self.dial_failures_total.increment(1);
    }

    pub(crate) fn inc_handshake_timeouts(&self) {
        self.handshake_timeouts_total.increment(1);
    }

    pub(crate) fn inc_established(&self) {
        self.established_total.increment(1);
    }

    pub(crate) fn inc_redundant(&self) {
        self.redundant_total.increment(1);
    }

    pub(crate) fn set_connections(&self, total: usize) {
        self.connections.set(total as f64);
    }
}
