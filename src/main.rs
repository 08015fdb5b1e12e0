use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use clusterlimit::config::ClusterLimitConfig;
use clusterlimit::{Limiter, RateLimit, Role};

/// Coordinated rate limiting for multi-process deployments.
#[derive(Debug, Parser)]
#[command(name = "clusterlimit", version, about)]
struct Cli {
    /// YAML configuration file, overridden by CLUSTERLIMIT__* variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the coordinator and accept worker connections
    Coordinator {
        /// Override the listen address
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Run a worker that checks `key limit [increment]` lines from stdin
    Worker {
        /// Override the coordinator address
        #[arg(long)]
        coordinator: Option<SocketAddr>,
    },
    /// Check `key limit [increment]` lines from stdin without coordination
    Standalone,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    info!("Starting clusterlimit");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ClusterLimitConfig::load(cli.config.as_deref())?;

    let role = match cli.command {
        Command::Coordinator { listen } => {
            if let Some(addr) = listen {
                config.coordinator.addr = addr;
            }
            Role::Coordinator
        }
        Command::Worker { coordinator } => {
            if let Some(addr) = coordinator {
                config.coordinator.addr = addr;
            }
            Role::Worker
        }
        Command::Standalone => Role::Standalone,
    };

    info!(
        role = ?role,
        coordinator = %config.coordinator.addr,
        window_ms = config.window_size_ms,
        "Configuration loaded"
    );

    let limiter = Limiter::setup(&config, role).await?;

    match role {
        Role::Coordinator => shutdown_signal().await,
        Role::Worker | Role::Standalone => {
            tokio::select! {
                result = check_stdin(&limiter) => result?,
                _ = shutdown_signal() => {}
            }
        }
    }

    limiter.shutdown().await;
    info!("clusterlimit stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Answer one `key limit [increment]` line per check until stdin closes.
async fn check_stdin(limiter: &Limiter) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let parsed: Option<(&str, u64, u64)> = match fields.as_slice() {
            [key, limit] => limit.parse().ok().map(|limit| (*key, limit, 1)),
            [key, limit, increment] => match (limit.parse(), increment.parse()) {
                (Ok(limit), Ok(increment)) => Some((*key, limit, increment)),
                _ => None,
            },
            [] => continue,
            _ => None,
        };

        match parsed {
            Some((key, limit, increment)) => {
                let verdict = if limiter.is_above_limit(key, limit, increment) {
                    "blocked"
                } else {
                    "allowed"
                };
                println!("{key} {verdict}");
            }
            None => warn!(line = %line, "Expected `key limit [increment]`"),
        }
    }

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
