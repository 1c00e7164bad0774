//! Wire protocol for the cadlink command bridge.
//!
//! One payload travels per loopback TCP connection, with no framing: the whole
//! received buffer is the payload. A payload is either raw script text or a
//! control command, which is the [`CONTROL_PREFIX`] followed by a JSON object
//! tagged by `action`. The bridge answers with [`ACK`] or closes silently.

mod payload;
mod session;

pub use payload::{ControlCommand, Payload, ProtocolError};
pub use session::SessionRef;

/// Loopback port the bridge listens on.
pub const DEFAULT_BRIDGE_PORT: u16 = 6666;

/// Largest payload accepted in a single read.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Marker that distinguishes control commands from scripts on the wire.
pub const CONTROL_PREFIX: &str = "__INTERNAL_CMD__";

/// Acknowledgment written back after a payload has been handed off.
pub const ACK: &[u8; 2] = b"OK";

/// Session id sentinel meaning "start a fresh session".
pub const NEW_SESSION: &str = "new";

/// Document label reserved for the fresh session.
pub const NEW_SESSION_LABEL: &str = "New Chat";

/// Prefix used when a stale fresh-session document is archived.
pub const ARCHIVED_LABEL_PREFIX: &str = "Old Chat";

/// Prefix of the document label bound to a persisted session.
pub const SESSION_LABEL_PREFIX: &str = "Chat: ";

/// Number of session id characters kept in a document label.
///
/// Labels are the only key from a session to its open document, so two ids
/// sharing this prefix resolve to the same document. Random UUIDs make that
/// unlikely; ids chosen by producers must differ within the first 8 chars.
pub const SESSION_LABEL_ID_CHARS: usize = 8;
