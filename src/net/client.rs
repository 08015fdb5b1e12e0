//! Worker-side TCP connector.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use super::codec::write_frame;
use super::spawn_pump;
use crate::cluster::{Connector, Link, WorkerId, WorkerMessage};
use crate::error::{LimiterError, Result};

/// Dials the coordinator's TCP listener.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Coordinator address
    addr: SocketAddr,
    /// Capacity of the per-session queues
    channel_capacity: usize,
    /// Limit on establishing a connection
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Create a new connector for the coordinator at `addr`.
    pub fn new(addr: SocketAddr, channel_capacity: usize) -> Self {
        Self {
            addr,
            channel_capacity: channel_capacity.max(1),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, worker_id: &WorkerId) -> Result<Link> {
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| LimiterError::Channel(format!("connect to {} timed out", self.addr)))?
            .map_err(|e| LimiterError::Channel(format!("connect to {}: {}", self.addr, e)))?;
        let _ = stream.set_nodelay(true);

        write_frame(
            &mut stream,
            &WorkerMessage::Hello {
                worker_id: worker_id.clone(),
            },
        )
        .await?;

        debug!(addr = %self.addr, worker_id = %worker_id, "Connected to coordinator");

        let (outbound, outgoing) = mpsc::channel(self.channel_capacity);
        let (incoming, inbound) = mpsc::channel(self.channel_capacity);
        spawn_pump(stream, incoming, outgoing);

        Ok(Link { outbound, inbound })
    }
}
