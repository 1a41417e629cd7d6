//! API error types and their mapping onto the response envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

use crate::envelope::ApiResponse;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("Notification not found")]
    NotFound,

    #[error("Illegal status transition: {message}")]
    Conflict { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl From<herald_orchestrator::AdmissionError> for ApiError {
    fn from(err: herald_orchestrator::AdmissionError) -> Self {
        ApiError::internal(err.to_string())
    }
}

impl From<herald_store::StoreError> for ApiError {
    fn from(err: herald_store::StoreError) -> Self {
        match err {
            herald_store::StoreError::NotFound(_) => ApiError::NotFound,
            herald_store::StoreError::InvalidTransition { from, to } => {
                ApiError::conflict(format!("{from} -> {to}"))
            }
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<herald_cache::CacheError> for ApiError {
    fn from(err: herald_cache::CacheError) -> Self {
        ApiError::internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::Validation { .. } => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::MissingHeader(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Conflict { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            ApiError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ApiResponse::failure(error_type, self.to_string());
        (status, Json(body)).into_response()
    }
}
