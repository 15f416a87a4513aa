//! # Call Test Utilities
//!
//! Shared test utilities for the Tether call service.
//!
//! This crate provides:
//! - Server test harness (`TestCallServer` for E2E tests)
//! - A thin participant-scoped HTTP helper (`ParticipantHttp`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use call_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let server = TestCallServer::spawn().await?;
//!     let alice = ParticipantHttp::new(&server, "alice");
//!
//!     let response = alice.post("/v1/calls").send().await?;
//!
//!     assert_eq!(response.status(), 201);
//!     Ok(())
//! }
//! ```

pub mod server_harness;

// Re-export commonly used items
pub use server_harness::*;
