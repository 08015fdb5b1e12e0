//! Clusterlimit - Coordinated Rate Limiting for Process Groups
//!
//! This crate shares one rate-limit budget per key across many worker
//! processes. Workers answer checks synchronously from a cached block set,
//! a single coordinator owns the authoritative counters, and the two sides
//! exchange increments and block decisions on timers. Single-process
//! deployments use the standalone limiter with the same check contract.

pub mod cluster;
pub mod config;
pub mod error;
pub mod net;
pub mod ratelimit;
pub mod topology;

pub use error::{LimiterError, Result};
pub use ratelimit::RateLimit;
pub use topology::{Limiter, Role};
