use axum::{
    extract::rejection::JsonRejection,
    http::{ header, HeaderValue, StatusCode },
    response::{ IntoResponse, Response },
    Json,
};
use log::error;
use serde_json::json;
use thiserror::Error;
use crate::agent::AgentError;
use crate::auth::AuthError;
use crate::config::prompt::PromptError;
use crate::history::StorageError;
use crate::llm::LlmError;

/// Request-boundary error; the body is always `{"detail": "<message>"}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Model(#[from] LlmError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Validation(msg) => ApiError::Validation(msg),
            AgentError::Storage(e) => ApiError::Storage(e),
            AgentError::Model(e) => ApiError::Model(e),
        }
    }
}

/// Malformed or mistyped request bodies are reported like any other validation failure.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(StorageError::InvalidSessionId(_)) => StatusCode::BAD_REQUEST,
            ApiError::Auth(AuthError::KeySetUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Storage(_) | ApiError::Model(_) | ApiError::Prompt(_) =>
                StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let mut response = (status, Json(json!({ "detail": self.to_string() }))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
