//! Chat turn handler

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use tracing::instrument;
use validator::Validate;

use crate::AppState;
use groundline_common::{
    errors::{AppError, Result},
    metrics::RequestMetrics,
};
use groundline_context::{TurnRequest, TurnResponse};

/// Chat request
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 4000))]
    pub user_input: String,

    #[validate(length(min = 1, max = 128))]
    #[serde(default)]
    pub session_id: Option<String>,

    #[validate(length(max = 64))]
    #[serde(default)]
    pub user_hint: Option<String>,
}

impl ChatRequest {
    fn check(&self) -> Result<()> {
        self.validate().map_err(|e| AppError::Validation {
            message: e.to_string(),
            field: None,
        })?;

        if self.user_input.trim().is_empty() {
            return Err(AppError::validation("user_input", "must not be blank"));
        }
        Ok(())
    }
}

/// Run one conversational turn.
///
/// A failed save still returns the turn body, with status 500.
#[instrument(skip(state, request))]
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<(StatusCode, Json<TurnResponse>)> {
    let metrics = RequestMetrics::start("POST", "/v1/chat");

    if let Err(e) = request.check() {
        metrics.finish(e.status_code().as_u16());
        return Err(e);
    }

    let response = state
        .pipeline
        .handle(TurnRequest {
            user_input: request.user_input,
            session_id: request.session_id,
            user_hint: request.user_hint,
        })
        .await;

    let status = if response.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    metrics.finish(status.as_u16());

    tracing::info!(
        session_id = %response.session_id,
        used_retrieval = response.used_retrieval,
        citations = response.citations.len(),
        status = status.as_u16(),
        "Chat turn handled"
    );

    Ok((status, Json(response)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundline_common::errors::ErrorCode;

    fn request(user_input: &str) -> ChatRequest {
        ChatRequest {
            user_input: user_input.to_string(),
            session_id: None,
            user_hint: None,
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request("Who was the thesis author?").check().is_ok());
    }

    #[test]
    fn test_blank_input_rejected() {
        let err = request(" \n ").check().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_oversized_input_is_validation_error() {
        let err = request(&"a".repeat(4001)).check().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_empty_session_id_rejected() {
        let mut req = request("hello");
        req.session_id = Some(String::new());
        assert!(req.check().is_err());
    }
}
