//! Call service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl and are
//! rendered as the shared `{"error": {"code", "message"}}` envelope. The
//! message is safe to show to end users; internal details are only logged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::api::{error_codes, ErrorDetail, ErrorResponse};
use common::types::CallId;
use thiserror::Error;

/// Call service error type.
///
/// Maps to HTTP status codes:
/// - NotFound: 404 Not Found
/// - SlotTaken: 409 Conflict
/// - Forbidden: 403 Forbidden
/// - InvalidParticipant: 422 Unprocessable Entity
/// - BadRequest: 400 Bad Request
/// - Unauthorized: 401 Unauthorized
/// - AlreadyExists, Internal: 500 Internal Server Error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Call {0} not found")]
    NotFound(CallId),

    #[error("Call {0} is full")]
    SlotTaken(CallId),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid participant: {0}")]
    InvalidParticipant(String),

    /// Store invariant breach: an allocated id was already present.
    #[error("Call {0} already exists")]
    AlreadyExists(CallId),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error")]
    Internal,
}

impl CallError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            CallError::NotFound(_) => 404,
            CallError::SlotTaken(_) => 409,
            CallError::Forbidden(_) => 403,
            CallError::InvalidParticipant(_) => 422,
            CallError::BadRequest(_) => 400,
            CallError::Unauthorized(_) => 401,
            CallError::AlreadyExists(_) | CallError::Internal => 500,
        }
    }

    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            CallError::NotFound(_) => error_codes::NOT_FOUND,
            CallError::SlotTaken(_) => error_codes::SLOT_TAKEN,
            CallError::Forbidden(_) => error_codes::FORBIDDEN,
            CallError::InvalidParticipant(_) => error_codes::INVALID_PARTICIPANT,
            CallError::BadRequest(_) => error_codes::BAD_REQUEST,
            CallError::Unauthorized(_) => error_codes::UNAUTHORIZED,
            CallError::AlreadyExists(_) | CallError::Internal => error_codes::INTERNAL_ERROR,
        }
    }
}

impl IntoResponse for CallError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match &self {
            CallError::AlreadyExists(call_id) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "cs.errors", call_id = %call_id, "Allocated call id collided with an existing session");
                "An internal error occurred".to_string()
            }
            CallError::Internal => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}
