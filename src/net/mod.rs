//! TCP transport between workers and the coordinator.

mod client;
mod codec;
mod server;

pub use client::TcpConnector;
pub use codec::{encode_frame, read_frame, write_frame, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
pub use server::CoordinatorServer;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Shuttle frames between a socket and a local channel pair.
///
/// Decoded frames go to `incoming`; messages from `outgoing` are written to
/// the socket. A message that cannot be encoded is dropped with a warning.
/// The socket is closed as soon as either direction ends.
pub(crate) fn spawn_pump<In, Out>(
    stream: TcpStream,
    incoming: mpsc::Sender<In>,
    mut outgoing: mpsc::Receiver<Out>,
) where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
{
    tokio::spawn(async move {
        let peer = stream.peer_addr().ok();
        let (mut reader, mut writer) = stream.into_split();

        let read_loop = async {
            loop {
                match read_frame::<_, In>(&mut reader).await {
                    Ok(Some(message)) => {
                        if incoming.send(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(peer = ?peer, error = %e, "Failed to read frame");
                        break;
                    }
                }
            }
        };

        let write_loop = async {
            while let Some(message) = outgoing.recv().await {
                let frame = match encode_frame(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(peer = ?peer, error = %e, "Dropping unencodable message");
                        continue;
                    }
                };
                if let Err(e) = writer.write_all(&frame).await {
                    warn!(peer = ?peer, error = %e, "Failed to write frame");
                    break;
                }
            }
        };

        tokio::select! {
            _ = read_loop => {}
            _ = write_loop => {}
        }

        debug!(peer = ?peer, "Connection closed");
    });
}
