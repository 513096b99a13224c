//! Swarm configuration, loadable from TOML.

use std::path::Path;
use std::time::Duration;

use peerswarm_net_peer_backoff::BackoffSchedule;
use peerswarm_net_primitives::Identity;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

/// Default cap on in-flight plus established connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Shared deadline for one dial attempt across both transports.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// How long a best-effort success waits for a still-pending reliable dial.
pub const DEFAULT_BEST_EFFORT_GRACE: Duration = Duration::from_millis(500);

pub use peerswarm_net_handshake::DEFAULT_HANDSHAKE_TIMEOUT;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Cap on in-flight dials, handshakes and established connections. `0` is unbounded.
    pub max_connections: usize,
    pub enable_reliable_transport: bool,
    /// Race the best-effort transport too. Ignored when none is installed.
    pub enable_best_effort_transport: bool,
    /// Hosts allowed to be dialed. Empty admits every host.
    pub allow_list: Vec<String>,
    /// Identity sent in the handshake; random when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_identity: Option<Identity>,
    /// Port to listen on when listening lazily; `0` picks an ephemeral one.
    pub port: u16,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub handshake_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub best_effort_grace: Duration,
    pub backoff: BackoffSchedule,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            enable_reliable_transport: true,
            enable_best_effort_transport: true,
            allow_list: Vec::new(),
            local_identity: None,
            port: 0,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            best_effort_grace: DEFAULT_BEST_EFFORT_GRACE,
            backoff: BackoffSchedule::default(),
        }
    }
}

impl SwarmConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_reliable_transport(mut self, enabled: bool) -> Self {
        self.enable_reliable_transport = enabled;
        self
    }

    pub fn with_best_effort_transport(mut self, enabled: bool) -> Self {
        self.enable_best_effort_transport = enabled;
        self
    }

    pub fn with_allow_list<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_list = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_local_identity(mut self, identity: Identity) -> Self {
        self.local_identity = Some(identity);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_best_effort_grace(mut self, grace: Duration) -> Self {
        self.best_effort_grace = grace;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether dialing is capped and `in_use` slots exhaust the cap.
    pub fn is_full(&self, in_use: usize) -> bool {
        self.max_connections != 0 && in_use >= self.max_connections
    }
}
