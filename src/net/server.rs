//! Coordinator TCP server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::codec::read_frame;
use super::spawn_pump;
use crate::cluster::{Coordinator, WorkerMessage};
use crate::error::Result;

/// How long a new connection has to introduce itself.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts worker connections and attaches them to a coordinator.
#[derive(Debug)]
pub struct CoordinatorServer {
    /// Bound listening socket
    listener: TcpListener,
    /// The coordinator workers attach to
    coordinator: Arc<Coordinator>,
}

impl CoordinatorServer {
    /// Create a server accepting on an already bound `listener`.
    pub fn new(listener: TcpListener, coordinator: Arc<Coordinator>) -> Self {
        Self {
            listener,
            coordinator,
        }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server stops accepting when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Self {
            listener,
            coordinator,
        } = self;
        info!(addr = ?listener.local_addr().ok(), "Coordinator accepting workers");
        tokio::pin!(signal);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_connection(Arc::clone(&coordinator), stream, peer));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                    }
                },
                _ = &mut signal => {
                    info!("Coordinator listener stopping");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    coordinator: Arc<Coordinator>,
    mut stream: TcpStream,
    peer: SocketAddr,
) {
    let _ = stream.set_nodelay(true);

    let hello =
        tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame::<_, WorkerMessage>(&mut stream))
            .await;
    let worker_id = match hello {
        Ok(Ok(Some(WorkerMessage::Hello { worker_id }))) => worker_id,
        Ok(Ok(Some(other))) => {
            warn!(peer = %peer, message = ?other, "Expected hello as first frame");
            return;
        }
        Ok(Ok(None)) => {
            debug!(peer = %peer, "Connection closed before hello");
            return;
        }
        Ok(Err(e)) => {
            warn!(peer = %peer, error = %e, "Failed to read hello");
            return;
        }
        Err(_) => {
            warn!(peer = %peer, "Handshake timed out");
            return;
        }
    };

    debug!(peer = %peer, worker_id = %worker_id, "Worker connected");
    let link = coordinator.attach(worker_id);
    spawn_pump(stream, link.outbound, link.inbound);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{CoordinatorMessage, CoordinatorOptions, WorkerId};
    use crate::config::LimiterOptions;
    use crate::net::write_frame;

    async fn coordinator() -> Arc<Coordinator> {
        Coordinator::setup(CoordinatorOptions {
            window_size: Duration::from_secs(60),
            broadcast_interval: Duration::from_millis(20),
            limiter: LimiterOptions::default(),
            channel_capacity: 16,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_hello_attaches_and_snapshot_arrives() {
        let coordinator = coordinator().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = CoordinatorServer::new(listener, Arc::clone(&coordinator));
        let server = tokio::spawn(server.serve_with_shutdown(async move {
            let _ = stop_rx.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(
            &mut stream,
            &WorkerMessage::Hello {
                worker_id: WorkerId::new("tcp-1"),
            },
        )
        .await
        .unwrap();

        let first: Option<CoordinatorMessage> = read_frame(&mut stream).await.unwrap();
        assert!(matches!(first, Some(CoordinatorMessage::BlockUpdate(u)) if u.full));
        assert!(coordinator.is_registered(&WorkerId::new("tcp-1")));

        drop(stream);
        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_missing_hello_rejected() {
        let coordinator = coordinator().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = CoordinatorServer::new(listener, Arc::clone(&coordinator));
        tokio::spawn(server.serve_with_shutdown(std::future::pending()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, &WorkerMessage::Resync).await.unwrap();

        // The server hangs up without attaching anyone
        let reply: Option<CoordinatorMessage> = read_frame(&mut stream).await.unwrap();
        assert!(reply.is_none());
        assert_eq!(coordinator.worker_count(), 0);
    }
}
