//! NAT port mapping hook.
//!
//! The swarm asks the installed [`PortMapper`] to forward its listening port
//! once bound and to remove the mapping on teardown. Failures never stop the
//! swarm; they are reported as [`SwarmEvent::Error`](crate::SwarmEvent::Error).

use std::io;

use async_trait::async_trait;

#[async_trait]
pub trait PortMapper: Send + Sync + 'static {
    /// Forward `public_port` on the gateway to `private_port` on this host.
    async fn map_port(&self, public_port: u16, private_port: u16) -> io::Result<()>;

    /// Remove a mapping created by [`PortMapper::map_port`].
    async fn unmap_port(&self, public_port: u16) -> io::Result<()>;
}
