//! Application error type mapping to HTTP status codes and envelope format.
//!
//! Only errors raised before a stream opens pass through here; once the
//! SSE response has started, failures travel as `error` frames.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use flowcast_types::error::{ChatStreamError, LockError};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Rejected by the stream controller.
    Stream(ChatStreamError),
    /// Malformed request.
    Validation(String),
}

impl From<ChatStreamError> for AppError {
    fn from(e: ChatStreamError) -> Self {
        AppError::Stream(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Stream(e @ ChatStreamError::NoPendingInteraction { .. }) => {
                (StatusCode::CONFLICT, e.code(), e.to_string())
            }
            AppError::Stream(e @ ChatStreamError::BotNotFound(_)) => {
                (StatusCode::NOT_FOUND, e.code(), e.to_string())
            }
            AppError::Stream(e @ ChatStreamError::Lock(LockError::AcquireTimeout { .. })) => {
                (StatusCode::SERVICE_UNAVAILABLE, e.code(), e.to_string())
            }
            AppError::Stream(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.code(), e.to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, %message, "Request failed");
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": uuid::Uuid::now_v7().to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
