//! HTTP request handlers for the call service.

pub mod calls;
pub mod health;
pub mod metrics;

pub use calls::{
    add_candidate, end_call, get_call_session, initialize_call, join_call, send_answer,
    send_offer,
};
pub use health::health_check;
pub use metrics::metrics_handler;
