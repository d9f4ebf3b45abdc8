use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use journey_common::{DecisionRequest, JourneyBrief, Mode, SessionId, UserInput};
use serde::{Deserialize, Serialize};

use crate::agents::AgentSummary;
use crate::errors::{EngineError, PersistenceError, ReplayError, StoreError};
use crate::orchestrator::{AdvanceOutcome, Engine, SessionHandle, SessionSnapshot, SessionSummary};

pub struct AppState {
    pub engine: Arc<Engine>,
}

pub type SharedState = Arc<AppState>;

// ── Request / response bodies ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub mode: Mode,
    pub brief: JourneyBrief,
}

#[derive(Debug, Deserialize)]
pub struct LoadSessionRequest {
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedSession {
    pub session_id: SessionId,
}

#[derive(Debug, Serialize)]
pub struct SavedSession {
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct CancelResult {
    pub cancelled: bool,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Gone(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Gone(msg) => (StatusCode::GONE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let msg = err.to_string();
        match err {
            EngineError::SessionNotFound(_) | EngineError::UnknownAgent(_) => ApiError::NotFound(msg),
            EngineError::Validation(_) | EngineError::Gate(_) => ApiError::BadRequest(msg),
            EngineError::SessionTerminated { .. }
            | EngineError::Store(StoreError::VersionConflict { .. })
            | EngineError::Persistence(PersistenceError::AlreadyLoaded(_)) => ApiError::Conflict(msg),
            EngineError::Replay(ReplayError::CursorExpired { .. }) => ApiError::Gone(msg),
            EngineError::Replay(ReplayError::CursorAhead { .. }) => ApiError::BadRequest(msg),
            EngineError::Persistence(PersistenceError::Io { ref source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                ApiError::NotFound(msg)
            }
            EngineError::Persistence(PersistenceError::UnsupportedFormat { .. })
            | EngineError::Persistence(PersistenceError::Corrupt { .. })
            | EngineError::Persistence(PersistenceError::Snapshot { .. })
            | EngineError::Configuration(_) => ApiError::BadRequest(msg),
            _ => {
                tracing::error!(error = %msg, "request failed");
                ApiError::Internal(msg)
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/agents", get(list_agents))
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/load", post(load_session))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/messages", post(send_message))
        .route("/api/sessions/{id}/checkpoint", post(resolve_checkpoint))
        .route("/api/sessions/{id}/cancel", post(cancel_session))
        .route("/api/sessions/{id}/abandon", post(abandon_session))
        .route("/api/sessions/{id}/save", post(save_session))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_agents(State(state): State<SharedState>) -> Json<Vec<AgentSummary>> {
    Json(state.engine.registry().summaries())
}

async fn list_sessions(State(state): State<SharedState>) -> Json<Vec<SessionSummary>> {
    Json(state.engine.sessions())
}

async fn create_session(
    State(state): State<SharedState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionHandle>), ApiError> {
    if req.brief.question.trim().is_empty() {
        return Err(ApiError::BadRequest("Brief must carry a question".into()));
    }
    let handle = state.engine.create_session(req.mode, req.brief).await?;
    Ok((StatusCode::CREATED, Json(handle)))
}

async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.engine.snapshot(id)?))
}

async fn send_message(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
    Json(input): Json<UserInput>,
) -> Result<Json<AdvanceOutcome>, ApiError> {
    Ok(Json(state.engine.advance(id, input).await?))
}

async fn resolve_checkpoint(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<AdvanceOutcome>, ApiError> {
    Ok(Json(state.engine.resolve_checkpoint(id, req).await?))
}

async fn cancel_session(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
) -> Result<Json<CancelResult>, ApiError> {
    let cancelled = state.engine.cancel(id)?;
    Ok(Json(CancelResult { cancelled }))
}

async fn abandon_session(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
) -> Result<StatusCode, ApiError> {
    state.engine.abandon(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn save_session(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
) -> Result<Json<SavedSession>, ApiError> {
    let path = state.engine.save(id)?;
    Ok(Json(SavedSession { path }))
}

async fn load_session(
    State(state): State<SharedState>,
    Json(req): Json<LoadSessionRequest>,
) -> Result<(StatusCode, Json<LoadedSession>), ApiError> {
    let session_id = state.engine.load(&req.path)?;
    Ok((StatusCode::CREATED, Json(LoadedSession { session_id })))
}
