use crate::services::file_service::FileError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Message shown instead of internal errors in production.
const GENERIC_MESSAGE: &str = "Something went wrong";

/// An HTTP-facing error: status, short kind, and message.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Map a service error onto a response.
    ///
    /// `NotFound` is 404, `InvalidInput` is 400, everything else is 500.
    /// The message of a 500 is replaced unless `expose_internal` is set.
    pub fn from_file_error(err: FileError, expose_internal: bool) -> Self {
        match err {
            FileError::NotFound(_) => Self::not_found("File not found"),
            FileError::InvalidInput(msg) => Self::bad_request(msg),
            other if expose_internal => Self::internal(other.to_string()),
            _ => Self::internal(GENERIC_MESSAGE),
        }
    }

    fn kind(&self) -> &'static str {
        match self.status {
            StatusCode::BAD_REQUEST => "Bad request",
            StatusCode::NOT_FOUND => "Not found",
            StatusCode::PAYLOAD_TOO_LARGE => "File too large",
            StatusCode::SERVICE_UNAVAILABLE => "Service unavailable",
            status if status.is_client_error() => "Bad request",
            _ => "Internal server error",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.kind(),
            "message": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let not_found = AppError::from_file_error(FileError::NotFound("x".into()), false);
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);

        let invalid = AppError::from_file_error(FileError::InvalidInput("bad".into()), false);
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
        assert_eq!(invalid.message, "bad");

        let failed = || FileError::DeleteFailed {
            name: "x".into(),
            source: StoreError::Backend("disk on fire".into()),
        };
        let hidden = AppError::from_file_error(failed(), false);
        assert_eq!(hidden.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(hidden.message, GENERIC_MESSAGE);

        let shown = AppError::from_file_error(failed(), true);
        assert!(shown.message.contains("disk on fire"));
    }
}
