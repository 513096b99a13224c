//! Peer swarm command line node.

mod cli;
mod logging;

use clap::Parser;
use eyre::Result;
use peerswarm::{Connection, Swarm, SwarmEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.logs)?;

    let config = cli.swarm.swarm_config()?;
    let port = config.port;
    let (swarm, mut events) = Swarm::spawn(config);
    info!(identity = %swarm.local_identity(), "swarm started");

    if cli.swarm.group.is_empty() {
        swarm.listen(port).await?;
    }
    for group in &cli.swarm.group {
        swarm.join(group.as_str()).await?;
    }
    for addr in cli.swarm.peers.iter().cloned() {
        match swarm.add_peer(None, addr.clone()).await {
            Ok(_) => {}
            Err(error) if error.is_destroyed() => break,
            Err(error) => warn!(%addr, %error, "peer not added"),
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SwarmEvent::Connection { info, connection } => {
                        info!(
                            id = %info.id,
                            remote = %info.remote,
                            kind = %info.kind,
                            addr = %info.addr,
                            "connected"
                        );
                        tokio::spawn(serve(connection, cli.swarm.greeting.clone()));
                    }
                    SwarmEvent::Error { message } => warn!(%message, "swarm error"),
                    SwarmEvent::Closed => {
                        info!("swarm closed");
                        break;
                    }
                    other if other.is_connection_event() => {
                        info!(event = other.name(), "{other:?}")
                    }
                    other if other.is_peer_event() => debug!(event = other.name(), "{other:?}"),
                    other => info!(event = other.name(), "{other:?}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                swarm.destroy().await;
            }
        }
    }
    Ok(())
}

/// Greet the remote, then log whatever it sends until it goes away.
async fn serve(mut connection: Connection, greeting: Option<String>) {
    let id = connection.id();
    if let Some(greeting) = greeting {
        if let Err(error) = connection.write_all(greeting.as_bytes()).await {
            error!(%id, %error, "write failed");
            return;
        }
    }

    let mut buf = vec![0u8; 4096];
    loop {
        match connection.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(buf.get(..n).unwrap_or_default());
                info!(%id, bytes = n, "received: {}", text.trim_end());
            }
            Err(error) => {
                warn!(%id, %error, "read failed");
                break;
            }
        }
    }
    info!(%id, "connection ended");
}
