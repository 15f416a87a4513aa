//! Participant identification middleware for call routes.
//!
//! Reads the caller's identity from the `X-Participant-Id` header, validates
//! it, and injects the parsed [`ParticipantId`] into request extensions.
//!
//! Identity is asserted by the client, not verified. The header exists so
//! the service can resolve slot ownership; it is not an authentication scheme.

use crate::errors::CallError;
use axum::{extract::Request, middleware::Next, response::IntoResponse};
use common::api::PARTICIPANT_HEADER;
use common::types::ParticipantId;
use tracing::instrument;

/// Middleware that requires a valid participant identity.
///
/// # Header Format
///
/// ```text
/// X-Participant-Id: <1..=128 visible ASCII characters>
/// ```
///
/// # Response
///
/// - Returns 401 Unauthorized if the header is missing or malformed
/// - Continues to the next handler with `ParticipantId` in extensions otherwise
#[instrument(skip_all, name = "cs.middleware.participant")]
pub async fn require_participant(
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, CallError> {
    let raw = req
        .headers()
        .get(PARTICIPANT_HEADER)
        .ok_or_else(|| {
            tracing::debug!(target: "cs.middleware.participant", "Missing participant header");
            CallError::Unauthorized("Missing X-Participant-Id header".to_string())
        })?
        .to_str()
        .map_err(|_| {
            tracing::debug!(target: "cs.middleware.participant", "Non-ASCII participant header");
            CallError::Unauthorized("Invalid X-Participant-Id header".to_string())
        })?;

    let participant = ParticipantId::parse(raw).map_err(|e| {
        tracing::debug!(target: "cs.middleware.participant", error = %e, "Invalid participant id");
        CallError::Unauthorized(format!("Invalid X-Participant-Id header: {}", e))
    })?;

    req.extensions_mut().insert(participant);

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;

    async fn echo(Extension(participant): Extension<ParticipantId>) -> String {
        participant.to_string()
    }

    fn test_app() -> Router {
        Router::new()
            .route("/whoami", get(echo))
            .route_layer(middleware::from_fn(require_participant))
    }

    async fn call(header: Option<&str>) -> (StatusCode, String) {
        let mut builder = HttpRequest::builder().method("GET").uri("/whoami");
        if let Some(value) = header {
            builder = builder.header(PARTICIPANT_HEADER, value);
        }
        let response = test_app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_valid_header_reaches_handler() {
        let (status, body) = call(Some("alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "alice");
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let (status, body) = call(None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("UNAUTHORIZED"));
    }

    #[tokio::test]
    async fn test_malformed_header_is_unauthorized() {
        let (status, _) = call(Some("has space")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let too_long = "x".repeat(129);
        let (status, _) = call(Some(&too_long)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found_without_header() {
        let response = test_app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/nowhere")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
