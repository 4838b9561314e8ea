use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::{LibraryError, LookupError};

/// Error answered as `{"error": "<message>"}` with a mapped status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::from(LibraryError::Unauthorized)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<LibraryError> for ApiError {
    fn from(err: LibraryError) -> Self {
        let status = match &err {
            LibraryError::NotFound { .. } => StatusCode::NOT_FOUND,
            LibraryError::Unauthorized => StatusCode::UNAUTHORIZED,
            LibraryError::InvalidInput(_) | LibraryError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            LibraryError::RootMissing(_)
            | LibraryError::StoreLocked
            | LibraryError::Store(_)
            | LibraryError::Io(_)
            | LibraryError::Pdf(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        let status = match &err {
            LookupError::NotFound => StatusCode::NOT_FOUND,
            LookupError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            LookupError::Network(_) => StatusCode::BAD_GATEWAY,
            LookupError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.to_string())
    }
}

/// Malformed or mistyped request bodies keep axum's status with our body shape.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("worker task failed: {}", err),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            log::error!("request failed status={} error={}", self.status, self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
