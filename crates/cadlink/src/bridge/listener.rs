//! Loopback TCP listener that receives payloads from producers.
//!
//! One connection carries one payload, read in a single bounded read. After a
//! successful handoff the listener replies with the two byte acknowledgment;
//! on any failure it closes the connection without replying.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use cadlink_protocol::{ACK, Payload};
use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::error::HandoffError;

/// Destination for payloads accepted by the listener.
pub trait PayloadSink: Send + Sync {
    /// Hand a payload off. Returning an error makes the listener close the
    /// producer's connection without acknowledgment.
    fn submit(&self, payload: Payload) -> Result<(), HandoffError>;
}

/// What happened to one connection.
#[derive(Debug)]
enum ConnectionOutcome {
    Accepted { kind: &'static str, bytes: usize },
    Empty,
    Refused(String),
}

/// Accepts producer connections and forwards their payloads to a sink.
pub struct Listener {
    addr: SocketAddr,
    sink: Arc<dyn PayloadSink>,
    max_payload_bytes: usize,
}

impl Listener {
    pub fn new(addr: SocketAddr, sink: Arc<dyn PayloadSink>, max_payload_bytes: usize) -> Self {
        Self {
            addr,
            sink,
            max_payload_bytes,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind the configured address.
    ///
    /// Returns `Ok(None)` when the port is already taken; another bridge
    /// instance is assumed to own it.
    pub async fn bind(&self) -> io::Result<Option<TcpListener>> {
        match TcpListener::bind(self.addr).await {
            Ok(listener) => Ok(Some(listener)),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                warn!(
                    "Port {} is already in use; bridge listener may already be running",
                    self.addr.port()
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Bind and serve until `shutdown` fires. Returns immediately if the
    /// port is owned by someone else.
    pub async fn run(self, shutdown: CancellationToken) -> io::Result<()> {
        match self.bind().await? {
            Some(listener) => self.serve(listener, shutdown).await,
            None => Ok(()),
        }
    }

    /// Serve connections from an already bound socket.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> io::Result<()> {
        let local = listener.local_addr()?;
        info!("Bridge listener started on {}", local);

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let sink = Arc::clone(&self.sink);
                    let limit = self.max_payload_bytes;
                    tokio::spawn(async move {
                        match handle_connection(stream, sink.as_ref(), limit).await {
                            Ok(ConnectionOutcome::Accepted { kind, bytes }) => {
                                info!("Received {} ({} bytes) from {}. Queued.", kind, bytes, peer)
                            }
                            Ok(ConnectionOutcome::Empty) => {
                                debug!("Connection from {} closed without payload", peer)
                            }
                            Ok(ConnectionOutcome::Refused(reason)) => {
                                warn!("Refused payload from {}: {}", peer, reason)
                            }
                            Err(e) => warn!("Connection from {} failed: {}", peer, e),
                        }
                    });
                }
                // Transient accept failures (resets, fd pressure) must not end the loop.
                Err(e) => error!("Failed to accept bridge connection: {}", e),
            }
        }

        info!("Bridge listener on {} stopped", local);
        Ok(())
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    sink: &dyn PayloadSink,
    max_payload_bytes: usize,
) -> io::Result<ConnectionOutcome> {
    // One spare byte tells an exactly-full payload apart from an oversized one.
    let mut buf = vec![0u8; max_payload_bytes + 1];
    let read = stream.read(&mut buf).await?;
    if read == 0 {
        return Ok(ConnectionOutcome::Empty);
    }
    if read > max_payload_bytes {
        return Ok(ConnectionOutcome::Refused(format!(
            "payload exceeds {max_payload_bytes} bytes"
        )));
    }
    buf.truncate(read);

    let payload = match Payload::decode(&buf) {
        Ok(payload) => payload,
        Err(e) => return Ok(ConnectionOutcome::Refused(e.to_string())),
    };
    let kind = payload.kind();

    if let Err(e) = sink.submit(payload) {
        return Ok(ConnectionOutcome::Refused(e.to_string()));
    }

    stream.write_all(ACK).await?;
    stream.shutdown().await?;
    Ok(ConnectionOutcome::Accepted { kind, bytes: read })
}
