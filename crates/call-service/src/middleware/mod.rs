//! HTTP middleware for the call service.
//!
//! # Components
//!
//! - `participant` - Caller identification for call routes
//! - `http_metrics` - Request/response metrics for every route

pub mod http_metrics;
pub mod participant;

pub use http_metrics::http_metrics_middleware;
pub use participant::require_participant;
