//! Command line arguments.

use std::path::PathBuf;

use clap::{Args, Parser};
use eyre::{Result, WrapErr};
use peerswarm::{PeerAddr, SwarmConfig};

/// Join a peer swarm, dial peers and log what happens.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) logs: LogArgs,

    #[command(flatten)]
    pub(crate) swarm: SwarmArgs,
}

/// Logging configuration.
#[derive(Debug, Args, Clone, Default)]
#[command(next_help_heading = "Logging")]
pub(crate) struct LogArgs {
    /// Silence all output.
    #[arg(short, long)]
    pub(crate) quiet: bool,

    /// Verbose mode (-v, -vv, -vvv, etc.).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub(crate) verbosity: u8,

    /// Log filter directive (e.g., "peerswarm=debug").
    #[arg(long = "log.filter", value_name = "DIRECTIVE")]
    pub(crate) filter: Option<String>,

    /// Use JSON format for log output.
    #[arg(long = "log.json")]
    pub(crate) json: bool,
}

#[derive(Debug, Args, Clone)]
#[command(next_help_heading = "Swarm")]
pub(crate) struct SwarmArgs {
    /// TOML file with swarm settings. Flags below override it.
    #[arg(long, value_name = "FILE")]
    pub(crate) config: Option<PathBuf>,

    /// Port to listen on (0 for ephemeral).
    #[arg(long)]
    pub(crate) port: Option<u16>,

    /// Upper bound on dialing plus connected peers (0 for unlimited).
    #[arg(long = "max-connections", value_name = "N")]
    pub(crate) max_connections: Option<usize>,

    /// Group to join.
    #[arg(long, value_name = "TAG")]
    pub(crate) group: Vec<String>,

    /// Peer to dial, as host:port. May be repeated.
    #[arg(long = "peer", value_name = "HOST:PORT")]
    pub(crate) peers: Vec<PeerAddr>,

    /// Text written to every new connection.
    #[arg(long)]
    pub(crate) greeting: Option<String>,
}

impl SwarmArgs {
    /// File settings overridden by flags.
    pub(crate) fn swarm_config(&self) -> Result<SwarmConfig> {
        let mut config = match &self.config {
            Some(path) => SwarmConfig::load(path)
                .wrap_err_with(|| format!("failed to load {}", path.display()))?,
            None => SwarmConfig::default(),
        };
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(max) = self.max_connections {
            config = config.with_max_connections(max);
        }
        Ok(config)
    }
}
