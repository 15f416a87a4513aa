//! Call service client.
//!
//! [`CallApi`] is the seam between the negotiation engine and the call
//! service. [`HttpCallClient`] speaks the JSON/HTTP binding; the `mock`
//! module provides an in-memory implementation for engine tests.
//!
//! Negotiation payloads are opaque and never logged.

use crate::config::ClientConfig;
use crate::errors::ClientError;
use common::api::{ErrorResponse, InitializeCallResponse, PayloadRequest, PARTICIPANT_HEADER};
use common::types::{CallId, CallSession, ParticipantId};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Connect timeout for the call service.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Operations of the call service, as seen by one participant.
///
/// Every call carries the participant identity implicitly.
#[async_trait::async_trait]
pub trait CallApi: Send + Sync {
    /// Create a call with this participant in slot 0.
    async fn initialize_call(&self) -> Result<CallId, ClientError>;

    /// Take slot 1 of `call_id`, returning the session snapshot.
    async fn join_call(&self, call_id: CallId) -> Result<CallSession, ClientError>;

    /// End `call_id`.
    async fn end_call(&self, call_id: CallId) -> Result<(), ClientError>;

    /// Read a snapshot of `call_id`.
    async fn get_call_session(&self, call_id: CallId) -> Result<CallSession, ClientError>;

    /// Publish the offer (slot 0 only).
    async fn send_offer(&self, call_id: CallId, payload: &str) -> Result<(), ClientError>;

    /// Publish the answer (slot 1 only).
    async fn send_answer(&self, call_id: CallId, payload: &str) -> Result<(), ClientError>;

    /// Append a reachability candidate to this participant's sequence.
    async fn add_ice_candidate(&self, call_id: CallId, payload: &str) -> Result<(), ClientError>;
}

/// HTTP client for the call service.
#[derive(Clone)]
pub struct HttpCallClient {
    /// HTTP client with configured timeouts.
    client: Client,

    /// Base URL, without trailing slash.
    base_url: String,

    /// Identity sent as `X-Participant-Id`.
    participant: ParticipantId,
}

impl HttpCallClient {
    /// Create a new call service client.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Transport` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        participant: ParticipantId,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "cc.rpc", error = %e, "Failed to build HTTP client");
                ClientError::Transport("Failed to build HTTP client".to_string())
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            participant,
        })
    }

    /// Create a client from a loaded [`ClientConfig`].
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Transport` if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::new(
            &config.service_url,
            config.participant_id.clone(),
            config.rpc_timeout,
        )
    }

    /// The identity this client presents.
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        payload: Option<&str>,
    ) -> Result<Response, ClientError> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self
            .client
            .request(method, &url)
            .header(PARTICIPANT_HEADER, self.participant.as_str());
        if let Some(payload) = payload {
            request = request.json(&PayloadRequest {
                payload: payload.to_string(),
            });
        }

        let response = request.send().await.map_err(|e| {
            warn!(target: "cc.rpc", error = %e, path = %path, "Call service request failed");
            ClientError::Transport(format!("Call service unreachable: {}", e))
        })?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
    ) -> Result<T, ClientError> {
        self.send(method, path, None)
            .await?
            .json()
            .await
            .map_err(|e| {
                error!(target: "cc.rpc", error = %e, path = %path, "Failed to parse call service response");
                ClientError::Transport("Malformed call service response".to_string())
            })
    }

    /// Map a non-success response to a client error.
    async fn error_from_response(response: Response) -> ClientError {
        let status = response.status();
        match response.json::<ErrorResponse>().await {
            Ok(body) => {
                debug!(
                    target: "cc.rpc",
                    status = %status,
                    code = %body.error.code,
                    "Call service rejected request"
                );
                ClientError::from_wire(&body.error.code, body.error.message)
            }
            Err(_) => {
                warn!(target: "cc.rpc", status = %status, "Call service error without envelope");
                ClientError::Rejected {
                    code: status.as_u16().to_string(),
                    message: status
                        .canonical_reason()
                        .unwrap_or("Unexpected response")
                        .to_string(),
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl CallApi for HttpCallClient {
    #[instrument(skip_all, name = "cc.rpc.initialize_call")]
    async fn initialize_call(&self) -> Result<CallId, ClientError> {
        let body: InitializeCallResponse = self.send_json(Method::POST, "/v1/calls").await?;
        Ok(body.call_id)
    }

    #[instrument(skip_all, name = "cc.rpc.join_call", fields(call_id = %call_id))]
    async fn join_call(&self, call_id: CallId) -> Result<CallSession, ClientError> {
        self.send_json(Method::POST, &format!("/v1/calls/{}/join", call_id))
            .await
    }

    #[instrument(skip_all, name = "cc.rpc.end_call", fields(call_id = %call_id))]
    async fn end_call(&self, call_id: CallId) -> Result<(), ClientError> {
        self.send(Method::DELETE, &format!("/v1/calls/{}", call_id), None)
            .await
            .map(|_| ())
    }

    async fn get_call_session(&self, call_id: CallId) -> Result<CallSession, ClientError> {
        self.send_json(Method::GET, &format!("/v1/calls/{}", call_id))
            .await
    }

    #[instrument(skip_all, name = "cc.rpc.send_offer", fields(call_id = %call_id, payload_len = payload.len()))]
    async fn send_offer(&self, call_id: CallId, payload: &str) -> Result<(), ClientError> {
        self.send(
            Method::PUT,
            &format!("/v1/calls/{}/offer", call_id),
            Some(payload),
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip_all, name = "cc.rpc.send_answer", fields(call_id = %call_id, payload_len = payload.len()))]
    async fn send_answer(&self, call_id: CallId, payload: &str) -> Result<(), ClientError> {
        self.send(
            Method::PUT,
            &format!("/v1/calls/{}/answer", call_id),
            Some(payload),
        )
        .await
        .map(|_| ())
    }

    async fn add_ice_candidate(&self, call_id: CallId, payload: &str) -> Result<(), ClientError> {
        self.send(
            Method::POST,
            &format!("/v1/calls/{}/candidates", call_id),
            Some(payload),
        )
        .await
        .map(|_| ())
    }
}

/// Mock call service module for testing.
///
/// `MockCallApi` keeps a single session in memory and applies the same slot
/// rules as the real service, from the point of view of one participant.
/// Tests play the remote side by editing the session directly.
pub mod mock {
    use super::*;
    use common::types::Slot;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// In-memory call service for one participant.
    pub struct MockCallApi {
        participant: ParticipantId,
        call_id: CallId,
        session: Mutex<Option<CallSession>>,
        get_calls: AtomicUsize,
        answer_calls: AtomicUsize,
        candidate_calls: AtomicUsize,
        end_calls: AtomicUsize,
        /// Remaining calls to fail with a transport error, per operation.
        failing_gets: AtomicUsize,
        failing_answers: AtomicUsize,
        failing_candidates: AtomicUsize,
    }

    impl MockCallApi {
        /// A service with no session yet; `initialize_call` creates one with id 1.
        pub fn empty(participant: ParticipantId) -> Self {
            Self::build(participant, CallId(1), None)
        }

        /// A service already holding `session` under `call_id`.
        pub fn with_session(
            participant: ParticipantId,
            call_id: CallId,
            session: CallSession,
        ) -> Self {
            Self::build(participant, call_id, Some(session))
        }

        fn build(participant: ParticipantId, call_id: CallId, session: Option<CallSession>) -> Self {
            Self {
                participant,
                call_id,
                session: Mutex::new(session),
                get_calls: AtomicUsize::new(0),
                answer_calls: AtomicUsize::new(0),
                candidate_calls: AtomicUsize::new(0),
                end_calls: AtomicUsize::new(0),
                failing_gets: AtomicUsize::new(0),
                failing_answers: AtomicUsize::new(0),
                failing_candidates: AtomicUsize::new(0),
            }
        }

        /// Fail the next `count` `get_call_session` calls with a transport error.
        pub fn fail_next_gets(&self, count: usize) {
            self.failing_gets.store(count, Ordering::SeqCst);
        }

        /// Fail the next `count` `send_answer` calls with a transport error.
        pub fn fail_next_answers(&self, count: usize) {
            self.failing_answers.store(count, Ordering::SeqCst);
        }

        /// Fail the next `count` `add_ice_candidate` calls with a transport error.
        pub fn fail_next_candidates(&self, count: usize) {
            self.failing_candidates.store(count, Ordering::SeqCst);
        }

        /// Current session state.
        pub async fn session(&self) -> Option<CallSession> {
            self.session.lock().await.clone()
        }

        /// Edit the session as the remote participant would.
        pub async fn edit_session<F: FnOnce(&mut CallSession)>(&self, f: F) {
            if let Some(session) = self.session.lock().await.as_mut() {
                f(session);
            }
        }

        /// Remove the session as if the remote participant ended the call.
        pub async fn remove_session(&self) {
            self.session.lock().await.take();
        }

        /// Number of `get_call_session` calls.
        pub fn get_calls(&self) -> usize {
            self.get_calls.load(Ordering::SeqCst)
        }

        /// Number of `send_answer` calls, including failed ones.
        pub fn answer_calls(&self) -> usize {
            self.answer_calls.load(Ordering::SeqCst)
        }

        /// Number of `add_ice_candidate` calls, including failed ones.
        pub fn candidate_calls(&self) -> usize {
            self.candidate_calls.load(Ordering::SeqCst)
        }

        /// Number of `end_call` calls.
        pub fn end_calls(&self) -> usize {
            self.end_calls.load(Ordering::SeqCst)
        }

        /// Consume one injected failure from `remaining`, if any are left.
        fn injected_failure(remaining: &AtomicUsize) -> Result<(), ClientError> {
            let fail = remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(ClientError::Transport("injected failure".to_string()));
            }
            Ok(())
        }

        fn not_found(&self) -> ClientError {
            ClientError::NotFound(format!("Call {} not found", self.call_id))
        }

        async fn write_as<F>(&self, call_id: CallId, f: F) -> Result<(), ClientError>
        where
            F: FnOnce(&mut CallSession, Slot) -> Result<(), ClientError>,
        {
            if call_id != self.call_id {
                return Err(self.not_found());
            }
            let mut guard = self.session.lock().await;
            let session = guard.as_mut().ok_or_else(|| self.not_found())?;
            let slot = session
                .slot_of(&self.participant)
                .ok_or_else(|| ClientError::Forbidden("Not a participant".to_string()))?;
            f(session, slot)
        }
    }

    #[async_trait::async_trait]
    impl CallApi for MockCallApi {
        async fn initialize_call(&self) -> Result<CallId, ClientError> {
            *self.session.lock().await = Some(CallSession::new(self.participant.clone()));
            Ok(self.call_id)
        }

        async fn join_call(&self, call_id: CallId) -> Result<CallSession, ClientError> {
            if call_id != self.call_id {
                return Err(self.not_found());
            }
            let mut guard = self.session.lock().await;
            let session = guard.as_mut().ok_or_else(|| self.not_found())?;
            if session.is_full() {
                return Err(ClientError::CallFull(format!("Call {} is full", call_id)));
            }
            *session.participant_mut(Slot::Joiner) = Some(self.participant.clone());
            Ok(session.clone())
        }

        async fn end_call(&self, call_id: CallId) -> Result<(), ClientError> {
            self.end_calls.fetch_add(1, Ordering::SeqCst);
            if call_id != self.call_id {
                return Err(self.not_found());
            }
            self.session
                .lock()
                .await
                .take()
                .map(|_| ())
                .ok_or_else(|| self.not_found())
        }

        async fn get_call_session(&self, call_id: CallId) -> Result<CallSession, ClientError> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            Self::injected_failure(&self.failing_gets)?;
            if call_id != self.call_id {
                return Err(self.not_found());
            }
            self.session
                .lock()
                .await
                .clone()
                .ok_or_else(|| self.not_found())
        }

        async fn send_offer(&self, call_id: CallId, payload: &str) -> Result<(), ClientError> {
            self.write_as(call_id, |session, slot| {
                if slot != Slot::Initiator {
                    return Err(ClientError::Forbidden("Only the initiator may send the offer".to_string()));
                }
                session.offer = Some(payload.to_string());
                Ok(())
            })
            .await
        }

        async fn send_answer(&self, call_id: CallId, payload: &str) -> Result<(), ClientError> {
            self.answer_calls.fetch_add(1, Ordering::SeqCst);
            Self::injected_failure(&self.failing_answers)?;
            self.write_as(call_id, |session, slot| {
                if slot != Slot::Joiner {
                    return Err(ClientError::Forbidden("Only the joiner may send the answer".to_string()));
                }
                session.answer = Some(payload.to_string());
                Ok(())
            })
            .await
        }

        async fn add_ice_candidate(&self, call_id: CallId, payload: &str) -> Result<(), ClientError> {
            self.candidate_calls.fetch_add(1, Ordering::SeqCst);
            Self::injected_failure(&self.failing_candidates)?;
            self.write_as(call_id, |session, slot| {
                session.candidates_mut(slot).push(payload.to_string());
                Ok(())
            })
            .await
        }
    }
}

pub use mock::MockCallApi;
