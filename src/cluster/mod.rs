//! Coordinated rate limiting across a process group.
//!
//! Workers answer checks from a cached block set and periodically flush
//! their local hit counts to a single coordinator. The coordinator owns the
//! authoritative counters, decides which keys are over their limit, and
//! pushes those decisions back to every worker on a timer. A worker's view
//! lags the coordinator by at most one flush interval plus one broadcast
//! interval.

mod coordinator;
mod link;
mod protocol;
mod worker;

pub use coordinator::{Coordinator, CoordinatorHandle, CoordinatorOptions};
pub use link::{Connector, Link, LocalConnector};
pub use protocol::{BlockUpdate, CoordinatorMessage, Flush, WorkerId, WorkerMessage};
pub use worker::{Worker, WorkerHandle, WorkerOptions};
