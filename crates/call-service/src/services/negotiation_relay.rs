//! Negotiation relay: slot-scoped writes of offers, answers and candidates.
//!
//! Write permissions follow slot ownership:
//!
//! | Write       | Allowed slot | Semantics              |
//! |-------------|--------------|------------------------|
//! | `Offer`     | initiator    | overwrite `offer`      |
//! | `Answer`    | joiner       | overwrite `answer`     |
//! | `Candidate` | either       | append to own sequence |
//!
//! The caller's slot is resolved from its identity inside the same atomic
//! store mutation that applies the write. Ordering between offers, answers
//! and candidates is not enforced here; clients wait for the values they need.

use crate::errors::CallError;
use crate::observability::metrics;
use crate::repositories::SessionStore;
use common::types::{CallId, CallSession, ParticipantId, Slot};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// A slot-scoped write to a call session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationWrite {
    /// Replace the stored offer.
    Offer(String),
    /// Replace the stored answer.
    Answer(String),
    /// Append to the writer's candidate sequence.
    Candidate(String),
}

impl NegotiationWrite {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            NegotiationWrite::Offer(_) => "offer",
            NegotiationWrite::Answer(_) => "answer",
            NegotiationWrite::Candidate(_) => "candidate",
        }
    }

    /// The opaque payload carried by this write.
    pub fn payload(&self) -> &str {
        match self {
            NegotiationWrite::Offer(p) | NegotiationWrite::Answer(p) | NegotiationWrite::Candidate(p) => p,
        }
    }

    /// The only slot allowed to perform this write, if restricted.
    fn required_slot(&self) -> Option<Slot> {
        match self {
            NegotiationWrite::Offer(_) => Some(Slot::Initiator),
            NegotiationWrite::Answer(_) => Some(Slot::Joiner),
            NegotiationWrite::Candidate(_) => None,
        }
    }

    /// Apply this write on behalf of `caller_slot`.
    ///
    /// # Errors
    ///
    /// - `CallError::Forbidden` - `caller_slot` may not perform this write
    pub fn apply(self, session: &mut CallSession, caller_slot: Slot) -> Result<(), CallError> {
        if let Some(required) = self.required_slot() {
            if required != caller_slot {
                return Err(CallError::Forbidden(format!(
                    "Only the {} may send the {}",
                    required,
                    self.kind()
                )));
            }
        }

        match self {
            NegotiationWrite::Offer(payload) => session.offer = Some(payload),
            NegotiationWrite::Answer(payload) => session.answer = Some(payload),
            NegotiationWrite::Candidate(payload) => {
                session.candidates_mut(caller_slot).push(payload);
            }
        }
        Ok(())
    }
}

/// Relay for negotiation messages over a shared session store.
#[derive(Debug, Clone)]
pub struct NegotiationRelay {
    store: Arc<SessionStore>,
    max_payload_bytes: usize,
}

impl NegotiationRelay {
    /// Create a relay accepting payloads up to `max_payload_bytes`.
    pub fn new(store: Arc<SessionStore>, max_payload_bytes: usize) -> Self {
        Self {
            store,
            max_payload_bytes,
        }
    }

    /// Publish the initiator's offer, replacing any previous one.
    ///
    /// # Errors
    ///
    /// - `CallError::NotFound` - no such call
    /// - `CallError::Forbidden` - caller is not the initiator
    /// - `CallError::BadRequest` - empty or oversized payload
    pub async fn send_offer(
        &self,
        call_id: CallId,
        caller: &ParticipantId,
        payload: String,
    ) -> Result<(), CallError> {
        self.write(call_id, caller, NegotiationWrite::Offer(payload))
            .await
    }

    /// Publish the joiner's answer, replacing any previous one.
    ///
    /// # Errors
    ///
    /// - `CallError::NotFound` - no such call
    /// - `CallError::Forbidden` - caller is not the joiner
    /// - `CallError::BadRequest` - empty or oversized payload
    pub async fn send_answer(
        &self,
        call_id: CallId,
        caller: &ParticipantId,
        payload: String,
    ) -> Result<(), CallError> {
        self.write(call_id, caller, NegotiationWrite::Answer(payload))
            .await
    }

    /// Append a reachability candidate to the caller's own sequence.
    ///
    /// # Errors
    ///
    /// - `CallError::NotFound` - no such call
    /// - `CallError::Forbidden` - caller occupies neither slot
    /// - `CallError::BadRequest` - empty or oversized payload
    pub async fn add_candidate(
        &self,
        call_id: CallId,
        caller: &ParticipantId,
        payload: String,
    ) -> Result<(), CallError> {
        self.write(call_id, caller, NegotiationWrite::Candidate(payload))
            .await
    }

    #[instrument(skip_all, fields(call_id = %call_id, participant = %caller, kind = write.kind()))]
    async fn write(
        &self,
        call_id: CallId,
        caller: &ParticipantId,
        write: NegotiationWrite,
    ) -> Result<(), CallError> {
        let kind = write.kind();
        let payload_len = write.payload().len();

        // Existence and membership are checked before the payload, so a
        // write to an ended call is always NotFound.
        let result = self
            .store
            .mutate(call_id, |session| {
                let slot = session.slot_of(caller).ok_or_else(|| {
                    CallError::Forbidden("Not a participant of this call".to_string())
                })?;
                self.validate_payload(&write)?;
                write.apply(session, slot)
            })
            .await;

        match &result {
            Ok(()) => {
                metrics::record_negotiation_write(kind, "success");
                debug!(
                    target: "cs.relay",
                    call_id = %call_id,
                    kind = kind,
                    payload_len = payload_len,
                    "Negotiation message stored"
                );
            }
            Err(e) => {
                metrics::record_negotiation_write(kind, "error");
                warn!(
                    target: "cs.relay",
                    call_id = %call_id,
                    kind = kind,
                    error = %e,
                    "Negotiation write rejected"
                );
            }
        }

        result
    }

    fn validate_payload(&self, write: &NegotiationWrite) -> Result<(), CallError> {
        let payload = write.payload();
        if payload.is_empty() {
            return Err(CallError::BadRequest(format!(
                "The {} payload must not be empty",
                write.kind()
            )));
        }
        if payload.len() > self.max_payload_bytes {
            return Err(CallError::BadRequest(format!(
                "The {} payload exceeds {} bytes",
                write.kind(),
                self.max_payload_bytes
            )));
        }
        Ok(())
    }
}
