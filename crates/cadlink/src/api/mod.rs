//! HTTP API module.
//!
//! REST endpoints for code generation, chat sessions, and forwarding scripts
//! and session switches to the CAD host bridge.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
