//! HTTP request/response bodies shared by the call service and its clients.
//!
//! Every failing operation returns the same envelope:
//!
//! ```json
//! { "error": { "code": "NOT_FOUND", "message": "Call 7 not found" } }
//! ```

use crate::types::CallId;
use serde::{Deserialize, Serialize};

/// Header carrying the caller's opaque participant identity.
pub const PARTICIPANT_HEADER: &str = "x-participant-id";

/// Stable error codes carried in [`ErrorDetail::code`].
pub mod error_codes {
    /// Unknown or already-ended call.
    pub const NOT_FOUND: &str = "NOT_FOUND";
    /// Join race lost; slot 1 already taken.
    pub const SLOT_TAKEN: &str = "SLOT_TAKEN";
    /// Wrong slot for a slot-scoped write, or non-participant ending a call.
    pub const FORBIDDEN: &str = "FORBIDDEN";
    /// Initiator tried to join its own call.
    pub const INVALID_PARTICIPANT: &str = "INVALID_PARTICIPANT";
    /// Malformed request body or payload.
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    /// Missing or malformed participant identity.
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    /// Anything else.
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Response for `POST /v1/calls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeCallResponse {
    /// Identifier of the newly created call.
    pub call_id: CallId,
}

/// Body for offer, answer and candidate writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayloadRequest {
    /// Opaque negotiation payload or candidate.
    pub payload: String,
}

/// Error envelope returned by every failing operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
}

/// Error code and user-loggable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// One of [`error_codes`].
    pub code: String,

    /// Human-readable message.
    pub message: String,
}

/// Health check response.
///
/// Returned by the `/v1/health` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service health status ("healthy").
    pub status: String,

    /// Number of call sessions currently in the store.
    pub active_calls: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_request_rejects_unknown_fields() {
        let ok: Result<PayloadRequest, _> = serde_json::from_str(r#"{"payload":"x"}"#);
        assert_eq!(ok.unwrap().payload, "x");

        let bad: Result<PayloadRequest, _> =
            serde_json::from_str(r#"{"payload":"x","slot":1}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_initialize_response_shape() {
        let json = serde_json::to_string(&InitializeCallResponse { call_id: CallId(1) }).unwrap();
        assert_eq!(json, r#"{"call_id":1}"#);
    }
}
