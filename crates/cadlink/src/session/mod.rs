//! Chat session persistence.
//!
//! Sessions are the external identifiers the bridge maps onto host documents.
//! Each session keeps an ordered history of prompts and generated code.

mod models;
mod repository;

pub use models::{
    AddMessageRequest, ChatMessage, ChatSession, CreateSessionRequest, MessageRole,
    RenameSessionRequest,
};
pub use repository::SessionRepository;
