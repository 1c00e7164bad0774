//! Code generation error types.

use thiserror::Error;

/// Result type for generation operations.
pub type GenerateResult<T> = Result<T, GenerateError>;

/// Errors that can occur while generating code.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The model API returned an error response.
    #[error("model API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The response carried no text.
    #[error("model returned no code")]
    EmptyResponse,

    /// Failed to parse response.
    #[error("failed to parse response: {0}")]
    ParseError(String),
}
