//! Observability module for the call service.
//!
//! Provides metrics definitions used by services and middleware.

pub mod metrics;
