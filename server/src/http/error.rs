use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use store::StoreError;
use tracing::error;

use super::dto::ErrorResponse;
use crate::service::ServiceError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    AlreadyExists(String),
    RevisionConflict { expected: i64, actual: i64 },
    Unavailable(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not Found", Some(msg)),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad Request", Some(msg)),
            ApiError::AlreadyExists(msg) => (StatusCode::CONFLICT, "Already Exists", Some(msg)),
            ApiError::RevisionConflict { expected, actual } => (
                StatusCode::CONFLICT,
                "Revision Conflict",
                Some(format!(
                    "Expected revision {expected}, but store is at {actual}"
                )),
            ),
            ApiError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service Unavailable",
                Some(msg),
            ),
            ApiError::InternalError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
                Some(msg),
            ),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            ServiceError::AlreadyExists { .. } => ApiError::AlreadyExists(err.to_string()),
            ServiceError::Store(err) => err.into(),
            ServiceError::Encoding { .. } => {
                error!(error = %err, "stored file is unreadable");
                ApiError::InternalError(err.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            StoreError::RevisionMismatch {
                expected, actual, ..
            } => ApiError::RevisionConflict { expected, actual },
            StoreError::Cancelled | StoreError::Closed => ApiError::Unavailable(err.to_string()),
            _ => {
                error!(error = %err, "store request failed");
                ApiError::InternalError(err.to_string())
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
