//! Maps core and server-local failures onto the RPC surface's status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

/// Server-local error type. Wraps [`notebook_core::Error`] plus failures
/// that only make sense at the RPC boundary (malformed request bodies).
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failure from the runtime itself.
    #[error("{0}")]
    Core(#[from] notebook_core::Error),

    /// The request body could not be deserialized.
    #[error("invalid request body: {0}")]
    BadRequest(String),
}

/// Result type for server handlers.
pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Core(notebook_core::Error::SessionNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Core(notebook_core::Error::NotebookNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Core(notebook_core::Error::SessionExists(_)) => StatusCode::CONFLICT,
            Self::Core(notebook_core::Error::SessionCapReached(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Core(notebook_core::Error::SecurityRejection(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Core(notebook_core::Error::Widget(_)) => StatusCode::BAD_REQUEST,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_maps_to_404() {
        let err = ServerError::Core(notebook_core::Error::SessionNotFound("s1".into()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_security_rejection_maps_to_422() {
        let err = ServerError::Core(notebook_core::Error::SecurityRejection("import os".into()));
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_cap_reached_maps_to_503() {
        let err = ServerError::Core(notebook_core::Error::SessionCapReached(100));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
