//! Tether Call Client Library
//!
//! Drives one side of a two-party call against the call service: creating
//! or joining a call, exchanging negotiation messages and tearing down when
//! either side ends.
//!
//! Media capture and the peer connection engine are platform concerns and
//! sit behind the [`MediaCapture`] and [`PeerConnectionFactory`] traits.
//!
//! # Modules
//!
//! - `config` - Client configuration from environment
//! - `engine` - Call setup, polling and termination
//! - `errors` - Client error types
//! - `peer` - Media capture and peer connection seams
//! - `reconciler` - Applying polled session snapshots exactly once
//! - `rpc` - Call service API client

pub mod config;
pub mod engine;
pub mod errors;
pub mod peer;
pub mod reconciler;
pub mod rpc;

pub use config::ClientConfig;
pub use engine::{ActiveCall, CallEngine, CallState, EndReason};
pub use errors::ClientError;
pub use peer::{MediaCapture, MediaHandle, PeerConnection, PeerConnectionFactory, PeerEvent};
pub use rpc::{CallApi, HttpCallClient};
