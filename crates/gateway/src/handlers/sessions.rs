//! Session management handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use groundline_common::{
    errors::{AppError, Result},
    models::Turn,
};

/// Create session request
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CreateSessionRequest {
    #[validate(length(max = 64))]
    #[serde(default)]
    pub user_hint: Option<String>,
}

/// Create session response
#[derive(Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// Session history response
#[derive(Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub turn_count: usize,
    pub turns: Vec<Turn>,
}

/// Allocate a new session id.
///
/// Nothing is persisted until the first turn is saved.
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("user_hint".to_string()),
    })?;

    let session_id = state.sessions.create_session(request.user_hint.as_deref());

    tracing::info!(session_id = %session_id, "Session created");

    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id })))
}

/// Get session history
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>> {
    let session = state
        .sessions
        .fetch(&session_id)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource_type: "session".to_string(),
            id: session_id.clone(),
        })?;

    Ok(Json(SessionResponse {
        session_id,
        turn_count: session.len(),
        turns: session.turns().to_vec(),
    }))
}
