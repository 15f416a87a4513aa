//! Call handlers.
//!
//! Implements the call endpoints:
//!
//! - `POST /v1/calls` - Initialize a call (caller becomes the initiator)
//! - `POST /v1/calls/{id}/join` - Join as the second participant
//! - `DELETE /v1/calls/{id}` - End a call
//! - `GET /v1/calls/{id}` - Read a session snapshot
//! - `PUT /v1/calls/{id}/offer` - Publish the initiator's offer
//! - `PUT /v1/calls/{id}/answer` - Publish the joiner's answer
//! - `POST /v1/calls/{id}/candidates` - Append a reachability candidate
//!
//! Every route runs behind `require_participant`, so handlers receive the
//! caller's [`ParticipantId`] as an extension. Negotiation payloads are opaque
//! and never logged.

use crate::errors::CallError;
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::api::{InitializeCallResponse, PayloadRequest};
use common::types::{CallId, CallSession, ParticipantId};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /v1/calls
///
/// # Response
///
/// - 201 Created: `{"call_id": n}`
#[instrument(skip_all, name = "cs.calls.initialize")]
pub async fn initialize_call(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<ParticipantId>,
) -> Result<(StatusCode, Json<InitializeCallResponse>), CallError> {
    let call_id = state.lifecycle.initialize_call(&caller).await?;
    Ok((StatusCode::CREATED, Json(InitializeCallResponse { call_id })))
}

/// Handler for POST /v1/calls/{id}/join
///
/// # Response
///
/// - 200 OK: the session snapshot after the join
/// - 404 Not Found: no such call
/// - 409 Conflict: the call already has two participants
/// - 422 Unprocessable Entity: the initiator tried to join its own call
#[instrument(skip_all, name = "cs.calls.join", fields(call_id = %raw_id))]
pub async fn join_call(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<ParticipantId>,
    Path(raw_id): Path<String>,
) -> Result<Json<CallSession>, CallError> {
    let call_id = parse_call_id(&raw_id)?;
    let session = state.lifecycle.join_call(call_id, &caller).await?;
    Ok(Json(session))
}

/// Handler for DELETE /v1/calls/{id}
///
/// # Response
///
/// - 204 No Content: the call was removed
/// - 403 Forbidden: the caller is not a participant
/// - 404 Not Found: no such call
#[instrument(skip_all, name = "cs.calls.end", fields(call_id = %raw_id))]
pub async fn end_call(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<ParticipantId>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, CallError> {
    let call_id = parse_call_id(&raw_id)?;
    state.lifecycle.end_call(call_id, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for GET /v1/calls/{id}
///
/// Side-effect free; clients poll this.
#[instrument(skip_all, name = "cs.calls.get", fields(call_id = %raw_id))]
pub async fn get_call_session(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Json<CallSession>, CallError> {
    let call_id = parse_call_id(&raw_id)?;
    let session = state.lifecycle.get_session(call_id).await?;
    Ok(Json(session))
}

/// Handler for PUT /v1/calls/{id}/offer
#[instrument(skip_all, name = "cs.calls.offer", fields(call_id = %raw_id))]
pub async fn send_offer(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<ParticipantId>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, CallError> {
    let call_id = parse_call_id(&raw_id)?;
    let payload = parse_payload(&body)?;
    state.relay.send_offer(call_id, &caller, payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for PUT /v1/calls/{id}/answer
#[instrument(skip_all, name = "cs.calls.answer", fields(call_id = %raw_id))]
pub async fn send_answer(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<ParticipantId>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, CallError> {
    let call_id = parse_call_id(&raw_id)?;
    let payload = parse_payload(&body)?;
    state.relay.send_answer(call_id, &caller, payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /v1/calls/{id}/candidates
#[instrument(skip_all, name = "cs.calls.candidate", fields(call_id = %raw_id))]
pub async fn add_candidate(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<ParticipantId>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, CallError> {
    let call_id = parse_call_id(&raw_id)?;
    let payload = parse_payload(&body)?;
    state.relay.add_candidate(call_id, &caller, payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Parse a path segment into a call id.
fn parse_call_id(raw: &str) -> Result<CallId, CallError> {
    raw.parse::<u64>().map(CallId).map_err(|_| {
        tracing::debug!(target: "cs.handlers.calls", raw_id = %raw, "Invalid call id in path");
        CallError::BadRequest("Call id must be a non-negative integer".to_string())
    })
}

/// Deserialize a `{"payload": "..."}` body manually so malformed JSON is a
/// 400 in the shared error envelope rather than Axum's default rejection.
fn parse_payload(body: &[u8]) -> Result<String, CallError> {
    serde_json::from_slice::<PayloadRequest>(body)
        .map(|request| request.payload)
        .map_err(|e| {
            tracing::debug!(target: "cs.handlers.calls", error = %e, "Invalid request body");
            CallError::BadRequest("Invalid request body".to_string())
        })
}
