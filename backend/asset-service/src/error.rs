/// Error types for Asset Service
///
/// Store- and codec-level errors are folded into [`AppError`], which renders
/// as `{ "error", "kind", "details" }` with a status code per kind.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::Serialize;

use crate::db::IndexError;
use crate::services::blob::BlobStoreError;
use crate::services::transform::TransformError;

/// Result type for asset-service operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing or malformed request parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// Project or image does not exist, or is not owned by the caller
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing caller identity
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Concurrent modification or id-set mismatch
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Image bytes could not be decoded or encoded
    #[error("Transform error: {0}")]
    Transform(String),

    /// Blob store or index store failure, including timeouts
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub kind: &'static str,
    pub details: String,
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::NotFound(_) => "NotFoundError",
            AppError::Unauthorized(_) => "UnauthorizedError",
            AppError::Conflict(_) => "ConflictError",
            AppError::Transform(_) => "TransformError",
            AppError::Upstream(_) => "UpstreamError",
            AppError::Internal(_) => "InternalError",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "Invalid request",
            AppError::NotFound(_) => "Resource not found",
            AppError::Unauthorized(_) => "Missing caller identity",
            AppError::Conflict(_) => "Conflicting update",
            AppError::Transform(_) => "Image could not be processed",
            AppError::Upstream(_) => "Storage backend failure",
            AppError::Internal(_) => "Internal server error",
        }
    }

    fn details(&self) -> &str {
        match self {
            AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::Unauthorized(msg)
            | AppError::Conflict(msg)
            | AppError::Transform(msg)
            | AppError::Upstream(msg)
            | AppError::Internal(msg) => msg,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.title(),
            kind: self.kind(),
            details: self.details().to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Transform(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.body())
    }
}

impl From<IndexError> for AppError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::NotFound(msg) => AppError::NotFound(msg),
            IndexError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl From<BlobStoreError> for AppError {
    fn from(err: BlobStoreError) -> Self {
        match err {
            BlobStoreError::InvalidUrl(msg) => AppError::Validation(msg),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl From<TransformError> for AppError {
    fn from(err: TransformError) -> Self {
        AppError::Transform(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Worker task failed: {err}"))
    }
}
