//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::bridge::BridgeClientError;
use crate::generate::GenerateError;

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Gateway error: {0}")]
    BadGateway(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::BadGateway(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::BadGateway(_) => "BAD_GATEWAY",
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) | ApiError::BadGateway(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            ApiError::ServiceUnavailable(msg) => {
                warn!(error_code = code, message = %msg, "Service unavailable");
            }
            _ => {
                tracing::debug!(error_code = code, message = %message, "Client error");
            }
        }

        let body = ErrorResponse {
            error: message,
            code,
        };

        (status, Json(body)).into_response()
    }
}

/// Repository failures are internal; lookups report absence as `Option`.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", err))
    }
}

impl From<BridgeClientError> for ApiError {
    fn from(err: BridgeClientError) -> Self {
        match err {
            BridgeClientError::Unreachable { .. } | BridgeClientError::Timeout { .. } => {
                ApiError::ServiceUnavailable(format!("CAD host bridge: {}", err))
            }
            BridgeClientError::Rejected { .. } => ApiError::BadGateway(err.to_string()),
            BridgeClientError::PayloadTooLarge { .. } => ApiError::BadRequest(err.to_string()),
            BridgeClientError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<GenerateError> for ApiError {
    fn from(err: GenerateError) -> Self {
        match err {
            GenerateError::RequestFailed(ref e) if e.is_timeout() || e.is_connect() => {
                ApiError::ServiceUnavailable(err.to_string())
            }
            _ => ApiError::BadGateway(err.to_string()),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 6666))
    }

    #[test]
    fn test_error_response_status_codes() {
        assert_eq!(ApiError::not_found("").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::bad_request("").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::service_unavailable("").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError::internal("").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::bad_gateway("").status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_bridge_errors_map_to_gateway_statuses() {
        let timeout: ApiError = BridgeClientError::Timeout { addr: addr() }.into();
        assert!(matches!(timeout, ApiError::ServiceUnavailable(_)));

        let unreachable: ApiError = BridgeClientError::Unreachable {
            addr: addr(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        }
        .into();
        assert!(matches!(unreachable, ApiError::ServiceUnavailable(_)));

        let rejected: ApiError = BridgeClientError::Rejected { addr: addr() }.into();
        assert!(matches!(rejected, ApiError::BadGateway(_)));

        let too_large: ApiError = BridgeClientError::PayloadTooLarge {
            size: 70000,
            limit: 65536,
        }
        .into();
        assert!(matches!(too_large, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_generate_errors_are_upstream_failures() {
        let api: ApiError = GenerateError::EmptyResponse.into();
        assert!(matches!(api, ApiError::BadGateway(_)));

        let api: ApiError = GenerateError::ApiError {
            status: 429,
            message: "quota".to_string(),
        }
        .into();
        assert_eq!(api.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_anyhow_is_internal() {
        let api: ApiError = anyhow::anyhow!("disk full").context("creating chat session").into();
        assert!(matches!(api, ApiError::Internal(ref m) if m.contains("disk full")));
    }
}
