//! Storage layer for the call service.

pub mod call_sessions;

pub use call_sessions::SessionStore;
