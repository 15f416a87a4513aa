//! Tether Call Service Library
//!
//! The call service is a rendezvous point for two-party calls. It stores
//! one session record per call and relays opaque negotiation messages
//! (offer, answer, reachability candidates) between the two participants.
//! It never touches media.
//!
//! # Architecture
//!
//! Handler -> Service -> Repository:
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Participant identification and HTTP metrics
//! - `observability` - Prometheus metrics
//! - `repositories` - In-memory session store
//! - `routes` - Axum router setup
//! - `services` - Call lifecycle and negotiation relay

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
