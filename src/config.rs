//! Configuration management for clusterlimit.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{LimiterError, Result};

/// Environment variable prefix used by [`ClusterLimitConfig::load`].
pub const ENV_PREFIX: &str = "CLUSTERLIMIT";

/// Main configuration shared by every limiter role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterLimitConfig {
    /// Duration of the counting window in milliseconds
    #[serde(default = "default_window_size_ms")]
    pub window_size_ms: u64,

    /// How often a worker flushes its shadow counters
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// How often the coordinator recomputes and pushes block decisions
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,

    /// Answer for unknown keys while a worker's block cache is untrusted
    #[serde(default)]
    pub cold_start: ColdStart,

    /// Backing-store options for the local limiter
    #[serde(default)]
    pub limiter: LimiterOptions,

    /// Where the coordinator listens and workers connect
    #[serde(default)]
    pub coordinator: CoordinatorEndpoint,

    /// Capacity of each per-worker message queue
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Base delay between worker reconnect attempts
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

impl Default for ClusterLimitConfig {
    fn default() -> Self {
        Self {
            window_size_ms: default_window_size_ms(),
            flush_interval_ms: default_flush_interval_ms(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
            cold_start: ColdStart::default(),
            limiter: LimiterOptions::default(),
            coordinator: CoordinatorEndpoint::default(),
            channel_capacity: default_channel_capacity(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

fn default_window_size_ms() -> u64 {
    1000
}

fn default_flush_interval_ms() -> u64 {
    100
}

fn default_broadcast_interval_ms() -> u64 {
    250
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_reconnect_backoff_ms() -> u64 {
    500
}

/// Policy for keys a worker cannot vouch for because it has no trusted
/// block state yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColdStart {
    /// Allow traffic (`is_above_limit` returns `false`)
    #[default]
    Open,
    /// Reject traffic (`is_above_limit` returns `true`)
    Closed,
}

impl ColdStart {
    /// The `is_above_limit` answer this policy gives for an unknown key.
    pub fn is_above_limit(&self) -> bool {
        matches!(self, ColdStart::Closed)
    }
}

/// Local limiter backing-store options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterOptions {
    /// Maximum number of keys tracked at once
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,
}

impl Default for LimiterOptions {
    fn default() -> Self {
        Self {
            max_keys: default_max_keys(),
        }
    }
}

fn default_max_keys() -> usize {
    100_000
}

/// Coordinator network endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorEndpoint {
    /// TCP address of the coordinator
    #[serde(default = "default_coordinator_addr")]
    pub addr: SocketAddr,
}

impl Default for CoordinatorEndpoint {
    fn default() -> Self {
        Self {
            addr: default_coordinator_addr(),
        }
    }
}

fn default_coordinator_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7400))
}

impl ClusterLimitConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ClusterLimitConfig =
            serde_yaml::from_str(yaml).map_err(|e| LimiterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load layered configuration: defaults, then the optional file, then
    /// `CLUSTERLIMIT__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let config: ClusterLimitConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall timers or queues.
    pub fn validate(&self) -> Result<()> {
        if self.window_size_ms == 0 {
            return Err(LimiterError::Config("window_size_ms must be positive".into()));
        }
        if self.flush_interval_ms == 0 {
            return Err(LimiterError::Config("flush_interval_ms must be positive".into()));
        }
        if self.broadcast_interval_ms == 0 {
            return Err(LimiterError::Config(
                "broadcast_interval_ms must be positive".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(LimiterError::Config("channel_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn window_size(&self) -> Duration {
        Duration::from_millis(self.window_size_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    /// Maximum time a worker's cached block decision may lag the
    /// coordinator.
    pub fn staleness_bound(&self) -> Duration {
        self.flush_interval() + self.broadcast_interval()
    }
}
