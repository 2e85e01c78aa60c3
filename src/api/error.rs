//! Mapping of [`KrofiError`] onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::error::KrofiError;

impl KrofiError {
    /// Status code reported to the client for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            KrofiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            KrofiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            KrofiError::Codec(_) => StatusCode::UNPROCESSABLE_ENTITY,
            KrofiError::Config(_) | KrofiError::Cache(_) | KrofiError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for KrofiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "Request failed");
        }
        // Internal details stay in the log.
        let message = match self {
            KrofiError::Config(_) | KrofiError::Cache(_) | KrofiError::Io(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            KrofiError::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            KrofiError::Upstream("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            KrofiError::Codec("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            KrofiError::Cache("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_internal_errors_are_not_leaked() {
        let resp = KrofiError::Io(std::io::Error::other("/secret/path")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "internal error");
    }

    #[tokio::test]
    async fn test_client_error_body_has_message() {
        let resp = KrofiError::InvalidRequest("missing url".into()).into_response();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Invalid request: missing url");
    }
}
