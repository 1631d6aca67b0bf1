use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::models::ErrorResponse;
use crate::error::{GenerationError, ValidationError};

pub const INTERNAL_ERROR_DETAIL: &str = "Internal server error";
const GENERATION_ERROR_DETAIL: &str = "Paraphrase generation failed";

/// Request-level failure, converted to a status code and `{"detail": ...}` body.
#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    Unavailable(String),
    /// Message already redacted according to `verbose_errors`.
    Generation(String),
    Internal(String),
}

impl ApiError {
    pub fn generation(err: &GenerationError, verbose: bool) -> Self {
        tracing::error!("Paraphrase generation failed: {}", err);
        if verbose {
            ApiError::Generation(format!("{}: {}", GENERATION_ERROR_DETAIL, err))
        } else {
            ApiError::Generation(GENERATION_ERROR_DETAIL.to_string())
        }
    }

    pub fn internal(message: impl std::fmt::Display, verbose: bool) -> Self {
        tracing::error!("Unhandled error: {}", message);
        if verbose {
            ApiError::Internal(message.to_string())
        } else {
            ApiError::Internal(INTERNAL_ERROR_DETAIL.to_string())
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Generation(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn detail(&self) -> String {
        match self {
            ApiError::Validation(e) => e.to_string(),
            ApiError::Unavailable(message)
            | ApiError::Generation(message)
            | ApiError::Internal(message) => message.clone(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(ValidationError::MalformedBody(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_client_error() {
            tracing::warn!("Rejected request ({}): {}", status, self.detail());
        }
        (status, Json(ErrorResponse { detail: self.detail() })).into_response()
    }
}
