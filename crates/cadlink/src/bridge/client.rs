//! Producer side of the bridge protocol.

use std::net::SocketAddr;
use std::time::Duration;

use cadlink_protocol::{ACK, ControlCommand, MAX_PAYLOAD_BYTES, Payload};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::error::BridgeClientError;

/// Sends payloads to a running bridge.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    addr: SocketAddr,
    timeout: Duration,
    max_payload_bytes: usize,
}

impl BridgeClient {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            addr,
            timeout,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
        }
    }

    /// Match the read size the target bridge was configured with.
    pub fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Forward script text for execution in the host.
    pub async fn send_script(&self, code: &str) -> Result<(), BridgeClientError> {
        self.send(&Payload::Script(code.to_string())).await
    }

    /// Ask the host to switch documents from `previous_id` to `current_id`.
    pub async fn request_sync(
        &self,
        previous_id: Option<&str>,
        current_id: &str,
    ) -> Result<(), BridgeClientError> {
        self.send(&Payload::Control(ControlCommand::sync_session(
            previous_id,
            current_id,
        )))
        .await
    }

    /// Send one payload and wait for the acknowledgment.
    ///
    /// Success only means the payload was queued; execution happens later
    /// on the host's thread.
    pub async fn send(&self, payload: &Payload) -> Result<(), BridgeClientError> {
        let body = payload.encode();
        if body.len() > self.max_payload_bytes {
            return Err(BridgeClientError::PayloadTooLarge {
                size: body.len(),
                limit: self.max_payload_bytes,
            });
        }

        let addr = self.addr;
        let mut stream = timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| BridgeClientError::Timeout { addr })?
            .map_err(|source| BridgeClientError::Unreachable { addr, source })?;

        timeout(self.timeout, async {
            stream.write_all(&body).await?;
            stream.shutdown().await
        })
        .await
        .map_err(|_| BridgeClientError::Timeout { addr })??;

        let mut reply = Vec::with_capacity(ACK.len());
        let read = timeout(self.timeout, stream.read_to_end(&mut reply))
            .await
            .map_err(|_| BridgeClientError::Timeout { addr })?;

        match read {
            Ok(_) if reply.as_slice() == ACK => Ok(()),
            // A reset or an empty close both mean the bridge refused the payload.
            _ => Err(BridgeClientError::Rejected { addr }),
        }
    }
}
