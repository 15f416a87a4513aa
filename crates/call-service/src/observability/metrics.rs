//! Metrics definitions for the call service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `cs_` prefix for the call service
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: HTTP methods
//! - `endpoint`: parameterized paths (call ids replaced by `{id}`)
//! - `status`: 3 values (success, error, timeout)
//! - `reason`: bounded by join rejection variants
//! - `kind`: offer, answer, candidate

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder and return the handle used by
/// the `/metrics` endpoint.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Polling traffic dominates; most requests should finish well under 50ms
        .set_buckets_for_metric(
            Matcher::Prefix("cs_http_request".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `cs_http_requests_total`, `cs_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("cs_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("cs_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion
///
/// Replaces call ids with `{id}`; unknown paths collapse to `/other`.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/v1/health" | "/metrics" | "/v1/calls" => return path.to_string(),
        _ => {}
    }

    let parts: Vec<&str> = path.split('/').collect();
    match parts.as_slice() {
        ["", "v1", "calls", _id] => "/v1/calls/{id}".to_string(),
        ["", "v1", "calls", _id, action @ ("join" | "offer" | "answer" | "candidates")] => {
            format!("/v1/calls/{{id}}/{}", action)
        }
        _ => "/other".to_string(),
    }
}

// ============================================================================
// Call Lifecycle Metrics
// ============================================================================

/// Record a successful `initializeCall`.
///
/// Metrics: `cs_calls_initialized_total`, `cs_active_calls` (+1)
pub fn record_call_initialized() {
    counter!("cs_calls_initialized_total").increment(1);
    gauge!("cs_active_calls").increment(1.0);
}

/// Record a successful `joinCall`.
///
/// Metric: `cs_calls_joined_total`
pub fn record_call_joined() {
    counter!("cs_calls_joined_total").increment(1);
}

/// Record a rejected `joinCall`.
///
/// Metric: `cs_call_join_rejections_total`
/// Labels: `reason` (not_found, slot_taken, invalid_participant)
pub fn record_join_rejected(reason: &str) {
    counter!("cs_call_join_rejections_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a call removed by `endCall`.
///
/// Metrics: `cs_calls_ended_total`, `cs_active_calls` (-1)
pub fn record_call_ended() {
    counter!("cs_calls_ended_total").increment(1);
    gauge!("cs_active_calls").decrement(1.0);
}

// ============================================================================
// Negotiation Relay Metrics
// ============================================================================

/// Record a negotiation write attempt.
///
/// Metric: `cs_negotiation_writes_total`
/// Labels: `kind` (offer, answer, candidate), `status` (success, error)
pub fn record_negotiation_write(kind: &str, status: &str) {
    counter!("cs_negotiation_writes_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_record_http_request() {
        // Executes without a recorder installed; must not panic.
        record_http_request("POST", "/v1/calls", 201, Duration::from_millis(5));
        record_http_request("GET", "/v1/calls/12", 200, Duration::from_millis(2));
        record_http_request("PUT", "/v1/calls/12/offer", 404, Duration::from_millis(2));
        record_http_request("GET", "/v1/health", 504, Duration::from_secs(30));
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(201), "success");
        assert_eq!(categorize_status_code(204), "success");
        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(504), "timeout");
        assert_eq!(categorize_status_code(403), "error");
        assert_eq!(categorize_status_code(409), "error");
        assert_eq!(categorize_status_code(500), "error");
    }

    #[test]
    fn test_normalize_endpoint_known_paths() {
        assert_eq!(normalize_endpoint("/v1/health"), "/v1/health");
        assert_eq!(normalize_endpoint("/metrics"), "/metrics");
        assert_eq!(normalize_endpoint("/v1/calls"), "/v1/calls");
    }

    #[test]
    fn test_normalize_endpoint_call_paths() {
        assert_eq!(normalize_endpoint("/v1/calls/1"), "/v1/calls/{id}");
        assert_eq!(normalize_endpoint("/v1/calls/99/join"), "/v1/calls/{id}/join");
        assert_eq!(normalize_endpoint("/v1/calls/99/offer"), "/v1/calls/{id}/offer");
        assert_eq!(normalize_endpoint("/v1/calls/99/answer"), "/v1/calls/{id}/answer");
        assert_eq!(
            normalize_endpoint("/v1/calls/99/candidates"),
            "/v1/calls/{id}/candidates"
        );
    }

    #[test]
    fn test_normalize_endpoint_unknown_paths() {
        assert_eq!(normalize_endpoint("/v1/calls/1/unknown"), "/other");
        assert_eq!(normalize_endpoint("/v2/calls/1"), "/other");
        assert_eq!(normalize_endpoint("/"), "/other");
    }

    #[test]
    fn test_lifecycle_counters_are_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_call_initialized();
            record_call_initialized();
            record_call_joined();
            record_join_rejected("slot_taken");
            record_call_ended();
            record_negotiation_write("offer", "success");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let initialized = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "cs_calls_initialized_total")
            .map(|(_, _, _, value)| value.clone());
        assert_eq!(initialized, Some(&DebugValue::Counter(2)));

        let names: Vec<&str> = snapshot
            .iter()
            .map(|(key, _, _, _)| key.key().name())
            .collect();
        for expected in [
            "cs_calls_joined_total",
            "cs_call_join_rejections_total",
            "cs_calls_ended_total",
            "cs_active_calls",
            "cs_negotiation_writes_total",
        ] {
            assert!(names.contains(&expected), "missing metric {expected}");
        }
    }

    #[test]
    fn test_active_calls_gauge_tracks_initialize_and_end() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_call_initialized();
            record_call_initialized();
            record_call_initialized();
            record_call_ended();
        });

        let gauge = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find(|(key, _, _, _)| key.key().name() == "cs_active_calls")
            .map(|(_, _, _, value)| value);
        assert!(
            matches!(&gauge, Some(DebugValue::Gauge(value)) if value.into_inner() == 2.0),
            "unexpected gauge {gauge:?}"
        );
    }
}
