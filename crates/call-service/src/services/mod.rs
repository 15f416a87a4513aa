//! Service layer for the call service.
//!
//! # Components
//!
//! - `call_lifecycle` - initialize, join, end and read call sessions
//! - `negotiation_relay` - slot-scoped offer, answer and candidate writes

pub mod call_lifecycle;
pub mod negotiation_relay;

pub use call_lifecycle::CallLifecycle;
pub use negotiation_relay::{NegotiationRelay, NegotiationWrite};
