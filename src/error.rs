//! Error handling module
//!
//! Provides unified error types and handling for the entire application.

use crate::external::ExternalError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("External service error: {0}")]
    ExternalService(#[from] ExternalError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            AppError::Database(e) => {
                error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Pool(e) => {
                error!("Pool error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "POOL_EXHAUSTED",
                    "Database connection pool exhausted".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Unauthenticated(msg) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                msg.clone(),
                None,
            ),
            AppError::NotAuthorized(msg) => (
                StatusCode::FORBIDDEN,
                "NOT_AUTHORIZED",
                msg.clone(),
                None,
            ),
            AppError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                msg.clone(),
                None,
            ),
            AppError::InvalidOperation(msg) => (
                StatusCode::CONFLICT,
                "INVALID_OPERATION",
                msg.clone(),
                None,
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg.clone(),
                None,
            ),
            AppError::ExternalService(e) => {
                error!("External service error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "EXTERNAL_SERVICE_ERROR",
                    "An external service call failed".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(error_code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create an input validation error
pub fn invalid_input(msg: impl Into<String>) -> AppError {
    AppError::InvalidInput(msg.into())
}

/// Helper function to create an invalid state transition error
pub fn invalid_operation(msg: impl Into<String>) -> AppError {
    AppError::InvalidOperation(msg.into())
}

/// Helper function to create a not authorized error
pub fn not_authorized(msg: impl Into<String>) -> AppError {
    AppError::NotAuthorized(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> AppError {
    AppError::NotFound(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::Unauthenticated("x".into()), StatusCode::UNAUTHORIZED),
            (not_authorized("x"), StatusCode::FORBIDDEN),
            (invalid_input("x"), StatusCode::BAD_REQUEST),
            (invalid_operation("x"), StatusCode::CONFLICT),
            (not_found_error("x"), StatusCode::NOT_FOUND),
            (
                AppError::ExternalService(ExternalError::Unavailable("down".into())),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
