//! Error types for the ensemble server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ensemble_core::NetworkError;

/// Errors surfaced over HTTP.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid request from the client.
    #[error("{0}")]
    InvalidRequest(String),

    /// Unknown network or agent id.
    #[error("{0}")]
    NotFound(String),

    /// Internal failure, including invariant violations.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::InvalidRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::Internal(m) => {
                tracing::error!("internal server error: {m}");
                (StatusCode::INTERNAL_SERVER_ERROR, m.clone())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<NetworkError> for ServerError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::NetworkNotFound(id) => {
                ServerError::NotFound(format!("network not found: {id}"))
            }
            NetworkError::AgentNotFound(id) => {
                ServerError::NotFound(format!("agent not found: {id}"))
            }
            other => ServerError::Internal(other.to_string()),
        }
    }
}

/// Result type alias for handler code.
pub type ServerResult<T> = Result<T, ServerError>;
