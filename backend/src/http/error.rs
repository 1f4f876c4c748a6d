//! HTTP error handling and response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::RepositoryError;
use crate::solver::SolveError;

/// API error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
    Repository(RepositoryError),
    Solve(SolveError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ApiError::new("NOT_FOUND", msg)),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ApiError::new("BAD_REQUEST", msg))
            }
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("INTERNAL_ERROR", msg),
            ),
            AppError::Repository(e) => match e {
                RepositoryError::NotFound(msg) => {
                    (StatusCode::NOT_FOUND, ApiError::new("NOT_FOUND", msg))
                }
                RepositoryError::Validation(msg) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ApiError::new("INVALID_STATE", msg),
                ),
                RepositoryError::Storage(msg) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("STORAGE_ERROR", msg),
                ),
            },
            AppError::Solve(e) => match e {
                SolveError::InvalidRange(msg) => {
                    (StatusCode::BAD_REQUEST, ApiError::new("INVALID_RANGE", msg))
                }
                SolveError::InvalidState(msg) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ApiError::new("INVALID_STATE", msg),
                ),
                SolveError::WorkerLost => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("WORKER_LOST", SolveError::WorkerLost.to_string()),
                ),
                SolveError::Internal(msg) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("INTERNAL_ERROR", msg),
                ),
            },
        };
        (status, Json(error)).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        AppError::Repository(err)
    }
}

impl From<SolveError> for AppError {
    fn from(err: SolveError) -> Self {
        AppError::Solve(err)
    }
}
