//! HTTP request handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::session::{
    AddMessageRequest, ChatMessage, ChatSession, CreateSessionRequest, MessageRole,
    RenameSessionRequest,
};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Generation and execution
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Record the exchange in this session's history.
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub code: String,
}

/// Turn a prompt into FreeCAD script text.
#[instrument(skip(state, request), fields(session_id = ?request.session_id))]
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<Json<GenerateResponse>> {
    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }
    let generator = state
        .generator
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Gemini API key not configured"))?;

    if let Some(session_id) = &request.session_id {
        ensure_session(&state, session_id).await?;
    }

    let code = generator.generate(prompt).await?;
    info!(model = generator.model(), bytes = code.len(), "Generated code");

    if let Some(session_id) = &request.session_id {
        state
            .sessions
            .add_message(session_id, MessageRole::User, prompt)
            .await?;
        state
            .sessions
            .add_message(session_id, MessageRole::Assistant, &code)
            .await?;
    }

    Ok(Json(GenerateResponse { code }))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub status: &'static str,
}

impl QueuedResponse {
    fn queued() -> Json<Self> {
        Json(Self { status: "queued" })
    }
}

/// Forward script text to the CAD host bridge.
#[instrument(skip(state, request), fields(bytes = request.code.len()))]
pub async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> ApiResult<Json<QueuedResponse>> {
    if request.code.trim().is_empty() {
        return Err(ApiError::bad_request("code must not be empty"));
    }
    state.bridge.send_script(&request.code).await?;
    info!("Queued script for execution");
    Ok(QueuedResponse::queued())
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub previous_id: Option<String>,
    pub current_id: String,
}

/// Ask the CAD host to switch to the document for `current_id`.
#[instrument(skip(state))]
pub async fn sync_session(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> ApiResult<Json<QueuedResponse>> {
    if request.current_id.trim().is_empty() {
        return Err(ApiError::bad_request("current_id must not be empty"));
    }
    state
        .bridge
        .request_sync(request.previous_id.as_deref(), &request.current_id)
        .await?;
    info!(current_id = %request.current_id, "Queued session sync");
    Ok(QueuedResponse::queued())
}

// ============================================================================
// Sessions
// ============================================================================

async fn ensure_session(state: &AppState, session_id: &str) -> ApiResult<ChatSession> {
    state
        .sessions
        .get(session_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Session {} not found", session_id)))
}

/// List sessions, newest first.
#[instrument(skip(state))]
pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Json<Vec<ChatSession>>> {
    Ok(Json(state.sessions.list().await?))
}

/// Create a new session.
#[instrument(skip(state, request))]
pub async fn create_session(
    State(state): State<AppState>,
    request: Option<Json<CreateSessionRequest>>,
) -> ApiResult<(StatusCode, Json<ChatSession>)> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let session = state.sessions.create(request.title.as_deref()).await?;
    info!(session_id = %session.id, "Created chat session");
    Ok((StatusCode::CREATED, Json(session)))
}

#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<ChatSession>> {
    Ok(Json(ensure_session(&state, &session_id).await?))
}

/// Rename a session.
#[instrument(skip(state, request))]
pub async fn rename_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<RenameSessionRequest>,
) -> ApiResult<Json<ChatSession>> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(ApiError::bad_request("title must not be empty"));
    }
    let session = state
        .sessions
        .rename(&session_id, title)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Session {} not found", session_id)))?;
    info!(session_id = %session_id, "Renamed chat session");
    Ok(Json(session))
}

/// Delete a session and its history.
#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    if !state.sessions.delete(&session_id).await? {
        return Err(ApiError::not_found(format!("Session {} not found", session_id)));
    }
    info!(session_id = %session_id, "Deleted chat session");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn list_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    ensure_session(&state, &session_id).await?;
    Ok(Json(state.sessions.list_messages(&session_id).await?))
}

#[instrument(skip(state, request))]
pub async fn add_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<AddMessageRequest>,
) -> ApiResult<(StatusCode, Json<ChatMessage>)> {
    ensure_session(&state, &session_id).await?;
    let message = state
        .sessions
        .add_message(&session_id, request.role, &request.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}
