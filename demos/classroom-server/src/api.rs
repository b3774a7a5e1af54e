//! HTTP endpoints for session management and instructor tooling.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use classroom_core::{DirectoryError, SyncError};
use classroom_session::{
    PresenceSnapshot, SessionHub,
    storage::{MemoryDirectory, SessionRecord},
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SessionHub>,
    pub directory: Arc<MemoryDirectory>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Sync(
                SyncError::UnknownSession(_) | SyncError::Directory(DirectoryError::NotFound(_)),
            )
            | Self::Directory(DirectoryError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Sync(SyncError::MalformedMessage(_)) => StatusCode::BAD_REQUEST,
            _ => {
                tracing::error!("Request failed: {self}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
struct LiveCode {
    student_id: String,
    code: String,
}

#[derive(Serialize)]
struct Assigned {
    delivered: bool,
}

/// Build the REST router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{session_id}", delete(delete_session))
        .route("/api/sessions/{session_id}/students", get(roster))
        .route(
            "/api/sessions/{session_id}/students/{student_id}/code",
            get(live_code),
        )
        .route(
            "/api/sessions/{session_id}/students/{student_id}/task",
            post(assign_task),
        )
        .with_state(state)
}

async fn create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionRecord>), ApiError> {
    let record = state.directory.create_session()?;
    tracing::info!(session_id = %record.id, "Session created");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.directory.delete_session(&session_id)?;
    let had_channels = state.hub.close_session(&session_id).await;
    tracing::info!(%session_id, had_channels, "Session deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn roster(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<PresenceSnapshot>>, ApiError> {
    Ok(Json(state.hub.roster(&session_id).await?))
}

async fn live_code(
    State(state): State<AppState>,
    Path((session_id, student_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let code = state.hub.live_code(&session_id, &student_id).await?;
    Ok(Json(LiveCode { student_id, code }))
}

async fn assign_task(
    State(state): State<AppState>,
    Path((session_id, student_id)): Path<(String, String)>,
    Json(task): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let delivered = state
        .hub
        .notify_task_assigned(&session_id, &student_id, task)
        .await?;
    Ok(Json(Assigned { delivered }))
}
