//! Prompt to FreeCAD script generation.
//!
//! [`CodeGenerator`] is the seam the HTTP API talks to; [`GeminiClient`]
//! implements it against the Generative Language REST API.

mod client;
mod error;
mod types;

use async_trait::async_trait;

pub use client::{DEFAULT_BASE_URL, DEFAULT_MODEL, GeminiClient, GeminiConfig};
pub use error::{GenerateError, GenerateResult};

/// Instruction sent with every prompt.
pub const SYSTEM_INSTRUCTION: &str = "You are a FreeCAD Python script generator. \
Generate ONLY the Python code to create the requested object in FreeCAD. \
Do not include markdown or explanations.";

/// Turns a natural-language prompt into script text.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> GenerateResult<String>;

    /// Model identifier, for logs and diagnostics.
    fn model(&self) -> &str;
}
