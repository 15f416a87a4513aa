//! Client error types.
//!
//! Call service failures arrive as a `{"error": {"code", "message"}}`
//! envelope. The codes the engine must branch on (`NOT_FOUND` as the remote
//! termination signal, `SLOT_TAKEN` as "call full") get their own variants;
//! every other rejection is carried opaquely.

use common::api::error_codes;
use thiserror::Error;

/// Client error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The call does not exist (never created, or already ended).
    #[error("Call not found: {0}")]
    NotFound(String),

    /// The call already has two participants.
    #[error("Call is full: {0}")]
    CallFull(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid participant: {0}")]
    InvalidParticipant(String),

    /// Any other rejection from the call service.
    #[error("Request rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The call service could not be reached or answered unintelligibly.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Local media capture failed.
    #[error("Media error: {0}")]
    Media(String),

    /// The local peer connection engine failed.
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// The call service returned a state the engine cannot act on.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl ClientError {
    /// Map an error envelope from the call service to a client error.
    pub fn from_wire(code: &str, message: String) -> Self {
        match code {
            error_codes::NOT_FOUND => ClientError::NotFound(message),
            error_codes::SLOT_TAKEN => ClientError::CallFull(message),
            error_codes::FORBIDDEN => ClientError::Forbidden(message),
            error_codes::INVALID_PARTICIPANT => ClientError::InvalidParticipant(message),
            other => ClientError::Rejected {
                code: other.to_string(),
                message,
            },
        }
    }

    /// Whether this error means the call no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}
