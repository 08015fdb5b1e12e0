//! Role selection by deployment topology.

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::cluster::{Coordinator, CoordinatorHandle, CoordinatorOptions, Worker, WorkerHandle};
use crate::config::ClusterLimitConfig;
use crate::error::Result;
use crate::net::TcpConnector;
use crate::ratelimit::{RateLimit, Standalone};

/// Which part a process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Single process, no coordination
    Standalone,
    /// Owns authoritative counters and listens for workers
    Coordinator,
    /// Checks locally and reports to the coordinator
    Worker,
}

/// A ready limiter for any role.
#[derive(Debug)]
pub enum Limiter {
    Standalone(Standalone),
    Coordinator(CoordinatorHandle),
    Worker(WorkerHandle),
}

impl Limiter {
    /// Build the limiter for `role`.
    ///
    /// The coordinator binds `config.coordinator.addr`; a worker dials it.
    pub async fn setup(config: &ClusterLimitConfig, role: Role) -> Result<Self> {
        config.validate()?;
        info!(role = ?role, "Setting up limiter");

        match role {
            Role::Standalone => Ok(Limiter::Standalone(Standalone::setup(config).await?)),
            Role::Coordinator => {
                let coordinator = Coordinator::setup(CoordinatorOptions::from(config)).await?;
                let listener = TcpListener::bind(config.coordinator.addr).await?;
                let mut handle = coordinator.spawn();
                handle.serve_tcp(listener);
                Ok(Limiter::Coordinator(handle))
            }
            Role::Worker => {
                let connector = TcpConnector::new(config.coordinator.addr, config.channel_capacity);
                info!(coordinator = %connector.addr(), "Worker dialing coordinator");
                let handle = Worker::setup(config, Arc::new(connector)).await?;
                Ok(Limiter::Worker(handle))
            }
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Limiter::Standalone(_) => Role::Standalone,
            Limiter::Coordinator(_) => Role::Coordinator,
            Limiter::Worker(_) => Role::Worker,
        }
    }

    /// Stop background tasks.
    pub async fn shutdown(self) {
        match self {
            Limiter::Standalone(_) => {}
            Limiter::Coordinator(handle) => handle.shutdown().await,
            Limiter::Worker(handle) => handle.shutdown().await,
        }
    }
}

impl RateLimit for Limiter {
    fn is_above_limit(&self, key: &str, limit: u64, increment: u64) -> bool {
        match self {
            Limiter::Standalone(limiter) => limiter.is_above_limit(key, limit, increment),
            Limiter::Coordinator(handle) => handle.is_above_limit(key, limit, increment),
            Limiter::Worker(handle) => handle.is_above_limit(key, limit, increment),
        }
    }
}
