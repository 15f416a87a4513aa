//! HTTP metrics middleware.
//!
//! Records every response, including framework-level rejections that never
//! reach a handler (404 for unknown routes, 405, body extraction failures).

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Middleware that records method, normalized path, status and duration.
///
/// Applied as the outermost layer.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());

    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::{get, put},
        Router,
    };
    use metrics_util::debugging::DebuggingRecorder;
    use tower::ServiceExt;

    async fn no_content() -> StatusCode {
        StatusCode::NO_CONTENT
    }

    fn test_app() -> Router {
        Router::new()
            .route("/v1/calls/:call_id/offer", put(no_content))
            .route("/v1/health", get(|| async { "OK" }))
            .layer(middleware::from_fn(http_metrics_middleware))
    }

    #[tokio::test]
    async fn test_middleware_passes_responses_through() {
        let response = test_app()
            .oneshot(
                HttpRequest::builder()
                    .method("PUT")
                    .uri("/v1/calls/3/offer")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = test_app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_middleware_records_normalized_endpoint() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                test_app()
                    .oneshot(
                        HttpRequest::builder()
                            .method("PUT")
                            .uri("/v1/calls/42/offer")
                            .body(Body::empty())
                            .unwrap(),
                    )
                    .await
                    .unwrap();
            });
        });

        let endpoints: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, _, _, _)| key.key().name() == "cs_http_requests_total")
            .flat_map(|(key, _, _, _)| {
                key.key()
                    .labels()
                    .filter(|label| label.key() == "endpoint")
                    .map(|label| label.value().to_string())
                    .collect::<Vec<_>>()
            })
            .collect();

        assert_eq!(endpoints, vec!["/v1/calls/{id}/offer".to_string()]);
    }
}
