#![allow(dead_code)]

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::engine::EngineError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for SuccessResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    is_operational: bool,
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::operational(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            message,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
            is_operational: false,
        }
    }

    fn operational(
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            is_operational: true,
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Invalid(message) => Self::validation(message),
            EngineError::Conflict(message) => Self::conflict(message),
            EngineError::Source(message) => Self::unavailable(message),
            EngineError::Storage(message) => Self::internal(message),
            EngineError::Generation(message) => Self::internal(message),
            EngineError::GenerationTimeout(ms) => {
                Self::internal(format!("generation timed out after {ms}ms"))
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = if self.is_operational {
            self.message
        } else {
            "Internal server error".to_string()
        };

        let body = ErrorResponse {
            success: false,
            error: message,
            code: self.code,
        };

        (self.status, Json(body)).into_response()
    }
}

pub fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> AppError {
    AppError {
        status,
        code: code.into(),
        message: message.into(),
        is_operational: true,
    }
}
