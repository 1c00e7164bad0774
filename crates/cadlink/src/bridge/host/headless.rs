//! In-process host used when no CAD application is attached.
//!
//! Documents live in memory and are saved as JSON snapshots holding their
//! label and the scripts executed against them. Scripts can optionally be
//! piped to an external interpreter (for example `freecadcmd`).

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{DocumentId, DocumentInfo, Host};
use crate::bridge::error::HostError;

const DEFAULT_DOCUMENT_NAME: &str = "Unnamed";

/// External program that receives each script on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub program: String,
    pub args: Vec<String>,
}

impl Interpreter {
    /// Parse a whitespace separated command line such as `"freecadcmd -c"`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    fn run(&self, code: &str) -> Result<(), HostError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| HostError::Unavailable(format!("spawning {}: {}", self.program, e)))?;

        // Stdin is fed from its own thread so output drains concurrently.
        let stdin = child.stdin.take();
        let (written, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(code.as_bytes()),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stdin writer panicked")));
            (written, output)
        });

        let output = output
            .map_err(|e| HostError::Script(format!("waiting for {}: {}", self.program, e)))?;

        if output.status.success() {
            written.map_err(|e| {
                HostError::Script(format!("writing script to {}: {}", self.program, e))
            })?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            if !stdout.trim().is_empty() {
                debug!("{} output: {}", self.program, stdout.trim());
            }
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(HostError::Script(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )))
        }
    }
}

/// On-disk form of a headless document.
#[derive(Debug, Serialize, Deserialize)]
struct DocumentSnapshot {
    label: String,
    scripts: Vec<String>,
    saved_at: String,
}

#[derive(Debug, Clone)]
struct HeadlessDocument {
    id: DocumentId,
    label: String,
    path: Option<PathBuf>,
    scripts: Vec<String>,
}

/// Host that keeps documents in memory.
#[derive(Debug, Default)]
pub struct HeadlessHost {
    documents: Vec<HeadlessDocument>,
    active: Option<DocumentId>,
    interpreter: Option<Interpreter>,
    file_operations: usize,
    refreshes: usize,
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward every executed script to `interpreter`.
    pub fn with_interpreter(mut self, interpreter: Interpreter) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    /// Scripts executed against a document, oldest first.
    pub fn scripts(&self, id: &DocumentId) -> Option<&[String]> {
        self.document(id).map(|doc| doc.scripts.as_slice())
    }

    /// Number of document saves and opens performed so far.
    pub fn file_operations(&self) -> usize {
        self.file_operations
    }

    /// Number of times the bridge asked for a repaint.
    pub fn refreshes(&self) -> usize {
        self.refreshes
    }

    /// Label of the active document.
    pub fn active_label(&self) -> Option<&str> {
        let active = self.active.as_ref()?;
        self.document(active).map(|doc| doc.label.as_str())
    }

    fn document(&self, id: &DocumentId) -> Option<&HeadlessDocument> {
        self.documents.iter().find(|doc| &doc.id == id)
    }

    fn document_mut(&mut self, id: &DocumentId) -> Result<&mut HeadlessDocument, HostError> {
        self.documents
            .iter_mut()
            .find(|doc| &doc.id == id)
            .ok_or_else(|| HostError::DocumentNotFound(id.to_string()))
    }

    /// Pick an unused identity based on `name`, the way CAD hosts number
    /// `Unnamed`, `Unnamed1`, `Unnamed2`.
    fn unique_id(&self, name: &str) -> DocumentId {
        let base: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        let base = if base.is_empty() {
            DEFAULT_DOCUMENT_NAME.to_string()
        } else {
            base
        };

        let taken = |candidate: &str| self.documents.iter().any(|doc| doc.id.as_str() == candidate);
        if !taken(&base) {
            return DocumentId::new(base);
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}{n}");
            if !taken(&candidate) {
                return DocumentId::new(candidate);
            }
            n += 1;
        }
    }

    fn insert(&mut self, doc: HeadlessDocument) -> DocumentId {
        let id = doc.id.clone();
        self.documents.push(doc);
        self.active = Some(id.clone());
        id
    }
}

impl Host for HeadlessHost {
    fn documents(&self) -> Vec<DocumentInfo> {
        self.documents
            .iter()
            .map(|doc| DocumentInfo {
                id: doc.id.clone(),
                label: doc.label.clone(),
                path: doc.path.clone(),
            })
            .collect()
    }

    fn active_document(&self) -> Option<DocumentId> {
        self.active.clone()
    }

    fn new_document(&mut self, name: Option<&str>) -> Result<DocumentId, HostError> {
        let name = name.unwrap_or(DEFAULT_DOCUMENT_NAME);
        let id = self.unique_id(name);
        debug!("Creating document {}", id);
        Ok(self.insert(HeadlessDocument {
            id: id.clone(),
            label: id.to_string(),
            path: None,
            scripts: Vec::new(),
        }))
    }

    fn set_label(&mut self, id: &DocumentId, label: &str) -> Result<(), HostError> {
        self.document_mut(id)?.label = label.to_string();
        Ok(())
    }

    fn activate(&mut self, id: &DocumentId) -> Result<(), HostError> {
        self.document_mut(id)?;
        self.active = Some(id.clone());
        Ok(())
    }

    fn save_as(&mut self, id: &DocumentId, path: &Path) -> Result<(), HostError> {
        let doc = self
            .document(id)
            .ok_or_else(|| HostError::DocumentNotFound(id.to_string()))?;
        let snapshot = DocumentSnapshot {
            label: doc.label.clone(),
            scripts: doc.scripts.clone(),
            saved_at: Utc::now().to_rfc3339(),
        };
        let body = serde_json::to_vec_pretty(&snapshot).map_err(|e| {
            HostError::InvalidDocument {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;

        self.file_operations += 1;
        std::fs::write(path, body).map_err(|e| HostError::io(path, e))?;
        self.document_mut(id)?.path = Some(path.to_path_buf());
        info!("Saved document {} to {}", id, path.display());
        Ok(())
    }

    fn open(&mut self, path: &Path) -> Result<DocumentId, HostError> {
        if let Some(existing) = self
            .documents
            .iter()
            .find(|doc| doc.path.as_deref() == Some(path))
        {
            let id = existing.id.clone();
            self.active = Some(id.clone());
            return Ok(id);
        }

        self.file_operations += 1;
        let body = std::fs::read(path).map_err(|e| HostError::io(path, e))?;
        let snapshot: DocumentSnapshot =
            serde_json::from_slice(&body).map_err(|e| HostError::InvalidDocument {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(DEFAULT_DOCUMENT_NAME);
        let id = self.unique_id(stem);
        info!("Opened document {} from {}", id, path.display());
        Ok(self.insert(HeadlessDocument {
            id,
            label: snapshot.label,
            path: Some(path.to_path_buf()),
            scripts: snapshot.scripts,
        }))
    }

    fn run_script(&mut self, code: &str) -> Result<(), HostError> {
        if let Some(interpreter) = &self.interpreter {
            interpreter.run(code)?;
        }
        if let Some(active) = self.active.clone() {
            self.document_mut(&active)?.scripts.push(code.to_string());
        }
        Ok(())
    }

    fn refresh(&mut self) {
        self.refreshes += 1;
    }
}
