//! Application state shared across handlers.

use std::sync::Arc;

use crate::bridge::BridgeClient;
use crate::generate::CodeGenerator;
use crate::session::SessionRepository;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRepository,
    /// `None` when no API key is configured.
    pub generator: Option<Arc<dyn CodeGenerator>>,
    pub bridge: BridgeClient,
    /// Allowed CORS origins; empty allows any origin.
    pub allowed_origins: Vec<String>,
}

impl AppState {
    pub fn new(
        sessions: SessionRepository,
        generator: Option<Arc<dyn CodeGenerator>>,
        bridge: BridgeClient,
    ) -> Self {
        Self {
            sessions,
            generator,
            bridge,
            allowed_origins: Vec::new(),
        }
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }
}
