//! Bridge error types.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by a [`Host`](super::host::Host) implementation.
#[derive(Debug, Error)]
pub enum HostError {
    /// No open document has this identity.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// The script raised, failed to parse, or exited unsuccessfully.
    #[error("script failed: {0}")]
    Script(String),

    /// File access failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A document file exists but could not be loaded.
    #[error("invalid document file {path}: {message}")]
    InvalidDocument { path: PathBuf, message: String },

    /// The scripting entry point is missing or could not be started.
    #[error("host unavailable: {0}")]
    Unavailable(String),
}

impl HostError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from session synchronization that prevent binding a document.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The id cannot be used as an export file name.
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// The document for the current session could not be created, opened or activated.
    #[error("failed to bind document for session {session}: {source}")]
    Resolve {
        session: String,
        #[source]
        source: HostError,
    },
}

/// Errors from processing a single payload.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Script execution failed.
    #[error("execution of {bytes} byte script failed: {source}")]
    Script {
        bytes: usize,
        #[source]
        source: HostError,
    },

    /// No document could be prepared for the script.
    #[error("no active document available: {0}")]
    NoDocument(#[source] HostError),

    /// Session synchronization failed.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Errors returned by a payload sink when a received payload cannot be handed off.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// Executing the payload on the receiving thread failed.
    #[error("direct execution failed: {0}")]
    Direct(#[from] DispatchError),
}

/// Errors seen by a producer talking to the bridge.
#[derive(Debug, Error)]
pub enum BridgeClientError {
    /// Nothing accepted the connection.
    #[error("bridge at {addr} is unreachable: {source}")]
    Unreachable {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Connecting, sending or waiting for the acknowledgment took too long.
    #[error("bridge at {addr} timed out")]
    Timeout { addr: SocketAddr },

    /// The bridge closed the connection without acknowledging.
    #[error("bridge at {addr} rejected the payload")]
    Rejected { addr: SocketAddr },

    /// The payload does not fit in a single bridge read.
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Writing the payload failed after connecting.
    #[error("I/O error talking to bridge: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeClientError {
    /// Whether the failure means the bridge is not reachable at all, as
    /// opposed to reachable but refusing the payload.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::Timeout { .. })
    }
}
