//! Session synchronization.
//!
//! Maps an external chat session onto exactly one host document. A sync
//! request carries the session being left and the session being entered:
//!
//! 1. The active document is saved to `<export_dir>/<previous_id>.<ext>`.
//!    Failures are logged and do not stop the switch.
//! 2. The document for the current session is bound:
//!    - `"new"`: any document already labeled `New Chat` is relabeled to an
//!      archival label, then a fresh document takes the `New Chat` label.
//!    - an open document with the session's label is activated,
//!    - else an export file for the session is reopened and relabeled,
//!    - else a new empty document is created and labeled.
//!
//! Documents are never closed or deleted here; collisions are resolved by
//! relabeling.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use cadlink_protocol::{ARCHIVED_LABEL_PREFIX, NEW_SESSION_LABEL, SessionRef};
use chrono::Utc;
use log::{debug, info, warn};

use super::error::{HostError, SyncError};
use super::host::{DocumentId, Host};

/// How the current session's document was bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A fresh `New Chat` document was created; stale ones were relabeled.
    Fresh { archived: Vec<DocumentId> },
    /// The session's document was already open and is now active.
    Activated,
    /// The session's export file was opened.
    Reopened { path: PathBuf },
    /// No trace of the session existed; an empty document was created.
    Created,
}

/// Result of a successful synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Where the previous session's document was saved, if it was.
    pub saved: Option<PathBuf>,
    pub resolution: Resolution,
    /// The now active document.
    pub document: DocumentId,
    /// Its label.
    pub label: String,
}

/// Reconciles session ids with host documents.
#[derive(Debug, Clone)]
pub struct SessionSynchronizer {
    export_dir: PathBuf,
}

impl SessionSynchronizer {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Export file for a persisted session.
    pub fn export_path(&self, session_id: &str, extension: &str) -> PathBuf {
        self.export_dir.join(format!("{session_id}.{extension}"))
    }

    /// Leave `previous_id` and enter `current_id`.
    pub fn sync<H: Host + ?Sized>(
        &self,
        host: &mut H,
        previous_id: Option<&str>,
        current_id: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let current = SessionRef::parse(current_id);
        if let Some(id) = current.id() {
            validate_session_id(id)?;
        }
        let previous = SessionRef::previous(previous_id);

        info!(
            "Syncing session: {} -> {}",
            previous.as_ref().map(ToString::to_string).unwrap_or_else(|| "none".to_string()),
            current
        );

        self.ensure_export_dir();

        let saved = previous
            .as_ref()
            .and_then(|previous| self.persist_previous(host, previous));

        let label = current.display_label();
        let (resolution, document) =
            self.bind_current(host, &current, &label)
                .map_err(|source| SyncError::Resolve {
                    session: current.to_string(),
                    source,
                })?;

        host.refresh();

        Ok(SyncOutcome {
            saved,
            resolution,
            document,
            label,
        })
    }

    fn ensure_export_dir(&self) {
        if self.export_dir.is_dir() {
            return;
        }
        match std::fs::create_dir_all(&self.export_dir) {
            Ok(()) => debug!("Created export directory {}", self.export_dir.display()),
            Err(e) => warn!(
                "Failed to create export directory {}: {}",
                self.export_dir.display(),
                e
            ),
        }
    }

    fn persist_previous<H: Host + ?Sized>(
        &self,
        host: &mut H,
        previous: &SessionRef,
    ) -> Option<PathBuf> {
        let id = previous.id()?;
        if let Err(e) = validate_session_id(id) {
            warn!("Not saving previous session: {}", e);
            return None;
        }
        let Some(active) = host.active_document() else {
            debug!("No active document to save for session {}", id);
            return None;
        };

        let path = self.export_path(id, host.document_extension());
        match host.save_as(&active, &path) {
            Ok(()) => {
                info!("Saved session {} to {}", id, path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Error saving previous session {}: {}", id, e);
                None
            }
        }
    }

    fn bind_current<H: Host + ?Sized>(
        &self,
        host: &mut H,
        current: &SessionRef,
        label: &str,
    ) -> Result<(Resolution, DocumentId), HostError> {
        let Some(session_id) = current.id() else {
            let archived = archive_fresh_documents(host)?;
            let id = host.new_document(None)?;
            host.set_label(&id, NEW_SESSION_LABEL)?;
            info!("Created fresh document {} for new session", id);
            return Ok((Resolution::Fresh { archived }, id));
        };

        if let Some(open) = host.find_by_label(label) {
            host.activate(&open.id)?;
            info!("Switched to existing session document: {}", label);
            return Ok((Resolution::Activated, open.id));
        }

        let path = self.export_path(session_id, host.document_extension());
        if path.is_file() {
            let id = host.open(&path)?;
            host.set_label(&id, label)?;
            info!("Opened session file: {}", path.display());
            return Ok((Resolution::Reopened { path }, id));
        }

        let id = host.new_document(None)?;
        host.set_label(&id, label)?;
        info!("Created new document for session: {}", label);
        Ok((Resolution::Created, id))
    }
}

/// Relabel every document holding the `New Chat` label so that the fresh
/// document about to be created is the only one.
fn archive_fresh_documents<H: Host + ?Sized>(host: &mut H) -> Result<Vec<DocumentId>, HostError> {
    let stale: Vec<DocumentId> = host
        .documents()
        .into_iter()
        .filter(|doc| doc.label == NEW_SESSION_LABEL)
        .map(|doc| doc.id)
        .collect();

    let mut taken: HashSet<String> = host.documents().into_iter().map(|doc| doc.label).collect();
    let base = format!("{ARCHIVED_LABEL_PREFIX} {}", Utc::now().timestamp());
    for id in &stale {
        let mut label = base.clone();
        let mut suffix = 1;
        while taken.contains(&label) {
            label = format!("{base}-{suffix}");
            suffix += 1;
        }
        host.set_label(id, &label)?;
        info!("Relabeled stale document {} to {}", id, label);
        taken.insert(label);
    }
    Ok(stale)
}

/// Session ids become file names, so they must stay a single path component.
fn validate_session_id(id: &str) -> Result<(), SyncError> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || id.contains("..");
    if invalid {
        return Err(SyncError::InvalidSessionId(id.to_string()));
    }
    Ok(())
}
