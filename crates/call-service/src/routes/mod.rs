//! HTTP routes for the call service.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_participant};
use crate::repositories::SessionStore;
use crate::services::{CallLifecycle, NegotiationRelay};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Call lifecycle controller.
    pub lifecycle: CallLifecycle,

    /// Negotiation relay.
    pub relay: NegotiationRelay,

    /// Service configuration.
    pub config: Config,
}

impl AppState {
    /// Wire the lifecycle controller and relay over one fresh store.
    pub fn new(config: Config) -> Self {
        let store = Arc::new(SessionStore::new());
        Self {
            lifecycle: CallLifecycle::new(Arc::clone(&store)),
            relay: NegotiationRelay::new(store, config.max_payload_bytes),
            config,
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/v1/health` - Health check with live call count - public
/// - `/metrics` - Prometheus metrics endpoint - public
/// - `/v1/calls...` - Call lifecycle and negotiation - requires `X-Participant-Id`
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - Request timeout from configuration
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let request_timeout = Duration::from_secs(state.config.request_timeout_seconds);

    // Public routes (no participant header required)
    let public_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .with_state(state.clone());

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Call routes (participant header required). route_layer keeps unknown
    // paths at 404 instead of 401.
    let call_routes = Router::new()
        .route("/v1/calls", post(handlers::initialize_call))
        .route(
            "/v1/calls/:call_id",
            get(handlers::get_call_session).delete(handlers::end_call),
        )
        .route("/v1/calls/:call_id/join", post(handlers::join_call))
        .route("/v1/calls/:call_id/offer", put(handlers::send_offer))
        .route("/v1/calls/:call_id/answer", put(handlers::send_answer))
        .route("/v1/calls/:call_id/candidates", post(handlers::add_candidate))
        .route_layer(middleware::from_fn(require_participant))
        .with_state(state);

    with_service_layers(
        public_routes.merge(metrics_routes).merge(call_routes),
        request_timeout,
    )
}

/// Wrap `router` in the shared middleware stack.
///
/// Each `.layer` wraps everything added before it:
/// 1. TimeoutLayer - Timeout the request (innermost)
/// 2. TraceLayer - Log request details, including timeouts
/// 3. http_metrics_middleware - Record ALL responses (outermost)
fn with_service_layers(router: Router, request_timeout: Duration) -> Router {
    router
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use common::api::PARTICIPANT_HEADER;
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        let handle = PrometheusBuilder::new().build_recorder().handle();
        build_routes(Arc::new(AppState::new(config)), handle)
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        participant: Option<&str>,
        body: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(p) = participant {
            builder = builder.header(PARTICIPANT_HEADER, p);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let router = test_router();
        let (status, body) = send(&router, "GET", "/v1/health", None, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["active_calls"], 0);
    }

    #[tokio::test]
    async fn test_call_routes_require_participant() {
        let router = test_router();
        let (status, body) = send(&router, "POST", "/v1/calls", None, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_initialize_and_read() {
        let router = test_router();
        let (status, body) = send(&router, "POST", "/v1/calls", Some("alice"), None).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["call_id"].as_u64().unwrap();

        let (status, body) =
            send(&router, "GET", &format!("/v1/calls/{id}"), Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["participants"][0], "alice");
        assert_eq!(body["participants"][1], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_bad_call_id_is_bad_request() {
        let router = test_router();
        let (status, body) = send(&router, "GET", "/v1/calls/abc", Some("alice"), None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_bad_request() {
        let router = test_router();
        let (_, body) = send(&router, "POST", "/v1/calls", Some("alice"), None).await;
        let id = body["call_id"].as_u64().unwrap();

        let (status, body) = send(
            &router,
            "PUT",
            &format!("/v1/calls/{id}/offer"),
            Some("alice"),
            Some("{\"sdp\":\"x\"}"),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let router = test_router();
        let (status, _) = send(&router, "GET", "/v1/nothing", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_slow_request_times_out_inside_outer_layers() {
        let slow = Router::new().route(
            "/v1/health",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let router = with_service_layers(slow, Duration::from_millis(50));

        let (status, _) = send(&router, "GET", "/v1/health", None, None).await;

        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    }
}
