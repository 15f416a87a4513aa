//! Common error types for Tether components.

use thiserror::Error;

/// Reasons a raw string is not a valid participant identity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParticipantIdError {
    /// Identity is empty
    #[error("participant id must not be empty")]
    Empty,

    /// Identity exceeds the maximum length
    #[error("participant id must be at most {max} bytes, got {len}")]
    TooLong {
        /// Actual length in bytes.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// Identity contains whitespace, control or non-ASCII characters
    #[error("participant id must contain only visible ASCII characters")]
    InvalidCharacter,
}
