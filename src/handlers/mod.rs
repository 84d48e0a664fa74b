//! HTTP handlers. Each one maps a request onto a `FileService` call and the
//! result onto JSON or a streamed body.

pub mod file_handlers;
pub mod health_handlers;

use crate::{errors::AppError, services::file_service::{FileError, FileService}};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub files: FileService,
    /// Show real messages of internal errors (off in production).
    pub expose_internal_errors: bool,
}

impl AppState {
    pub fn new(files: FileService, expose_internal_errors: bool) -> Self {
        Self {
            files,
            expose_internal_errors,
        }
    }

    pub fn reject(&self, err: FileError) -> AppError {
        AppError::from_file_error(err, self.expose_internal_errors)
    }
}
