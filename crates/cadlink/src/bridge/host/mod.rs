//! The seam between the bridge and the host application.
//!
//! Everything the dispatcher and the session synchronizer do to documents goes
//! through [`Host`]. Implementations are driven from exactly one thread, so the
//! trait takes `&mut self` and does not require `Send`.

mod headless;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use headless::{HeadlessHost, Interpreter};

use super::error::HostError;

/// File extension used for exported documents.
pub const DEFAULT_DOCUMENT_EXTENSION: &str = "FCStd";

/// Host-assigned document identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of one open document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub id: DocumentId,
    /// Human label; the join key to a chat session.
    pub label: String,
    /// Where the document was last saved or opened from.
    pub path: Option<PathBuf>,
}

/// Operations the bridge needs from the host application.
pub trait Host {
    /// All open documents, in host order.
    fn documents(&self) -> Vec<DocumentInfo>;

    /// The currently active document, if any.
    fn active_document(&self) -> Option<DocumentId>;

    /// Create an empty document and make it active.
    fn new_document(&mut self, name: Option<&str>) -> Result<DocumentId, HostError>;

    /// Change a document's label.
    fn set_label(&mut self, id: &DocumentId, label: &str) -> Result<(), HostError>;

    /// Make a document the active one.
    fn activate(&mut self, id: &DocumentId) -> Result<(), HostError>;

    /// Save a document to `path`.
    fn save_as(&mut self, id: &DocumentId, path: &Path) -> Result<(), HostError>;

    /// Open a document from `path` and make it active.
    fn open(&mut self, path: &Path) -> Result<DocumentId, HostError>;

    /// Execute script source through the host's scripting entry point.
    fn run_script(&mut self, code: &str) -> Result<(), HostError>;

    /// Let the host repaint after document changes.
    fn refresh(&mut self) {}

    /// Extension for exported documents, without the dot.
    fn document_extension(&self) -> &str {
        DEFAULT_DOCUMENT_EXTENSION
    }

    /// Whether the host can be driven from a scheduled tick on its own thread.
    ///
    /// When this returns `false` the bridge falls back to executing payloads
    /// directly on the accepting thread, which is not safe for hosts with
    /// thread-affine state.
    fn supports_scheduled_dispatch(&self) -> bool {
        true
    }

    /// Find the first open document carrying `label`.
    fn find_by_label(&self, label: &str) -> Option<DocumentInfo> {
        self.documents().into_iter().find(|doc| doc.label == label)
    }
}
