//! Payload envelope and control commands.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::CONTROL_PREFIX;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while decoding a payload received from a producer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload bytes are not valid UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The control command body could not be parsed.
    #[error("malformed control command: {0}")]
    MalformedControl(#[from] serde_json::Error),

    /// Nothing was received.
    #[error("empty payload")]
    Empty,
}

// ============================================================================
// Control commands
// ============================================================================

/// Structured instruction for the bridge itself, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Persist the active document under `previous_id`, then bind the
    /// document for `current_id`.
    SyncSession {
        #[serde(default)]
        previous_id: Option<String>,
        current_id: String,
    },
}

impl ControlCommand {
    /// Build a `sync_session` command.
    pub fn sync_session(previous_id: Option<&str>, current_id: &str) -> Self {
        Self::SyncSession {
            previous_id: previous_id.map(str::to_string),
            current_id: current_id.to_string(),
        }
    }

    /// Wire name of the action.
    pub fn action(&self) -> &'static str {
        match self {
            Self::SyncSession { .. } => "sync_session",
        }
    }
}

// ============================================================================
// Payload
// ============================================================================

/// One unit of work received over the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Host script source, possibly still wrapped in a code fence.
    Script(String),
    /// Bridge control command.
    Control(ControlCommand),
}

impl Payload {
    /// Decode raw bytes read from a connection.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let text = std::str::from_utf8(bytes)?;
        Self::decode_str(text)
    }

    /// Decode payload text. Anything without the control prefix is a script.
    pub fn decode_str(text: &str) -> Result<Self, ProtocolError> {
        match text.strip_prefix(CONTROL_PREFIX) {
            Some(body) => Ok(Self::Control(serde_json::from_str(body.trim())?)),
            None => Ok(Self::Script(text.to_string())),
        }
    }

    /// Encode the payload into its wire form.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Script(code) => code.as_bytes().to_vec(),
            Self::Control(command) => {
                // Serializing a derived enum of plain strings cannot fail.
                let body = serde_json::to_string(command).unwrap_or_default();
                format!("{CONTROL_PREFIX}{body}").into_bytes()
            }
        }
    }

    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Script(_) => "script",
            Self::Control(_) => "control",
        }
    }
}
