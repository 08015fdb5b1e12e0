//! Worker-side connection abstraction.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::coordinator::Coordinator;
use super::protocol::{CoordinatorMessage, WorkerId, WorkerMessage};
use crate::error::Result;

/// One session's ordered, reliable channel pair to the coordinator.
///
/// Dropping `outbound` ends the session on the coordinator side; `inbound`
/// yields `None` once the coordinator side has gone away.
#[derive(Debug)]
pub struct Link {
    /// Worker to coordinator
    pub outbound: mpsc::Sender<WorkerMessage>,
    /// Coordinator to worker
    pub inbound: mpsc::Receiver<CoordinatorMessage>,
}

/// Establishes sessions with the coordinator.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new session for `worker_id`.
    async fn connect(&self, worker_id: &WorkerId) -> Result<Link>;
}

/// Connects to a coordinator living in the same process.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    coordinator: Arc<Coordinator>,
}

impl LocalConnector {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, worker_id: &WorkerId) -> Result<Link> {
        Ok(self.coordinator.attach(worker_id.clone()))
    }
}
