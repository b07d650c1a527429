//! TCP accept loop for POS connections.
//!
//! Each connection runs in its own task and keeps its socket open across
//! requests — the POS reuses one connection for a whole shift. Within a
//! connection, frames are handled strictly in arrival order; responses for a
//! frame are sent before the next frame is read, which is what keeps the
//! audit-before-response ordering observable on the wire.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::protocol::{Dispatcher, PosFrameCodec, ProtocolError};

/// Runs the accept loop until the listener fails or the task is aborted.
pub async fn run(listener: TcpListener, dispatcher: Dispatcher) {
    info!(
        addr = %listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string()),
        "POS listener accepting connections"
    );

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, peer, dispatcher).await {
                        warn!(peer = %peer, error = %err, "connection ended with error");
                    }
                });
            }
            Err(err) => {
                error!(error = %err, "accept failed");
                // Transient accept errors (EMFILE and friends) should not
                // kill the listener.
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
) -> Result<(), ProtocolError> {
    info!(peer = %peer, "POS connected");
    let mut framed = Framed::new(stream, PosFrameCodec::new());

    while let Some(frame) = framed.next().await {
        let payload = match frame {
            Ok(payload) => payload,
            Err(ProtocolError::Io(err)) => return Err(ProtocolError::Io(err)),
            Err(err) => {
                // Corrupt frame: drop the connection; the POS reconnects and
                // replays.
                warn!(peer = %peer, error = %err, "dropping connection on bad frame");
                return Err(err);
            }
        };

        debug!(peer = %peer, bytes = payload.len(), "frame received");
        for response in dispatcher.handle_payload(&payload) {
            framed.send(response.into_bytes()).await?;
        }
    }

    info!(peer = %peer, "POS disconnected");
    Ok(())
}
