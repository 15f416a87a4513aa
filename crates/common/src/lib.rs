//! Common utilities and types shared across Tether components.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for call session data types
pub mod types;

/// Module for HTTP request/response bodies and the error envelope
pub mod api;
