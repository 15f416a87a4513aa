//! Call lifecycle operations: initialize, join, end, read.
//!
//! Wraps the [`SessionStore`] with the capacity and membership rules of a
//! two-party call:
//!
//! - the caller of `initialize_call` becomes slot 0
//! - `join_call` fills slot 1 exactly once; the initiator may not join its own call
//! - `end_call` may be invoked by either participant and removes the session
//!
//! None of these operations block on the other participant. There is no
//! expiry for abandoned sessions; they live until someone ends them.

use crate::errors::CallError;
use crate::observability::metrics;
use crate::repositories::SessionStore;
use common::types::{CallId, CallSession, ParticipantId, Slot};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Lifecycle controller over a shared session store.
#[derive(Debug, Clone)]
pub struct CallLifecycle {
    store: Arc<SessionStore>,
}

impl CallLifecycle {
    /// Create a lifecycle controller.
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// Create a new call with `caller` in slot 0.
    ///
    /// # Errors
    ///
    /// - `CallError::Internal` - the store handed out a duplicate id
    #[instrument(skip_all, fields(participant = %caller))]
    pub async fn initialize_call(&self, caller: &ParticipantId) -> Result<CallId, CallError> {
        let call_id = self.store.allocate();
        self.store
            .create(call_id, caller.clone())
            .await
            .map_err(|e| {
                error!(target: "cs.lifecycle", call_id = %call_id, error = %e, "Failed to create session");
                CallError::Internal
            })?;

        metrics::record_call_initialized();

        info!(
            target: "cs.lifecycle",
            call_id = %call_id,
            participant = %caller,
            "Call initialized"
        );

        Ok(call_id)
    }

    /// Fill slot 1 with `caller` and return the resulting snapshot.
    ///
    /// The snapshot already contains any offer and candidates published by
    /// the initiator, so the joiner can answer without another read.
    ///
    /// # Errors
    ///
    /// - `CallError::NotFound` - no such call
    /// - `CallError::InvalidParticipant` - caller is the initiator of this call
    /// - `CallError::SlotTaken` - slot 1 is already occupied
    #[instrument(skip_all, fields(call_id = %call_id, participant = %caller))]
    pub async fn join_call(
        &self,
        call_id: CallId,
        caller: &ParticipantId,
    ) -> Result<CallSession, CallError> {
        let result = self
            .store
            .mutate(call_id, |session| {
                if session.participant(Slot::Initiator) == Some(caller) {
                    return Err(CallError::InvalidParticipant(
                        "Cannot join a call you started".to_string(),
                    ));
                }
                if session.is_full() {
                    return Err(CallError::SlotTaken(call_id));
                }

                *session.participant_mut(Slot::Joiner) = Some(caller.clone());
                Ok(session.clone())
            })
            .await;

        match &result {
            Ok(_) => {
                metrics::record_call_joined();
                info!(
                    target: "cs.lifecycle",
                    call_id = %call_id,
                    participant = %caller,
                    "Participant joined call"
                );
            }
            Err(e) => {
                let reason = match e {
                    CallError::NotFound(_) => "not_found",
                    CallError::SlotTaken(_) => "slot_taken",
                    CallError::InvalidParticipant(_) => "invalid_participant",
                    _ => "other",
                };
                metrics::record_join_rejected(reason);
                warn!(
                    target: "cs.lifecycle",
                    call_id = %call_id,
                    participant = %caller,
                    reason = reason,
                    "Join rejected"
                );
            }
        }

        result
    }

    /// End a call on behalf of either participant.
    ///
    /// Only the caller's membership is checked; the other side learns about
    /// the end when its next read fails with `NotFound`.
    ///
    /// # Errors
    ///
    /// - `CallError::NotFound` - no such call (including a second `end_call`)
    /// - `CallError::Forbidden` - caller occupies neither slot
    #[instrument(skip_all, fields(call_id = %call_id, participant = %caller))]
    pub async fn end_call(&self, call_id: CallId, caller: &ParticipantId) -> Result<(), CallError> {
        // Membership check and removal share one write lock. A concurrent end
        // from the other participant that wins the race leaves this caller
        // with NotFound.
        let slot = self
            .store
            .remove_if(call_id, |session| {
                session.slot_of(caller).ok_or_else(|| {
                    CallError::Forbidden("Only a participant may end the call".to_string())
                })
            })
            .await?;

        metrics::record_call_ended();

        info!(
            target: "cs.lifecycle",
            call_id = %call_id,
            participant = %caller,
            slot = %slot,
            "Call ended"
        );

        Ok(())
    }

    /// Read a snapshot of a call. Side-effect free; safe to poll.
    ///
    /// # Errors
    ///
    /// - `CallError::NotFound` - no such call
    pub async fn get_session(&self, call_id: CallId) -> Result<CallSession, CallError> {
        self.store.get(call_id).await
    }

    /// Number of live calls.
    pub async fn active_calls(&self) -> usize {
        self.store.len().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn pid(raw: &str) -> ParticipantId {
        ParticipantId::parse(raw).unwrap()
    }

    fn lifecycle() -> CallLifecycle {
        CallLifecycle::new(Arc::new(SessionStore::new()))
    }

    #[tokio::test]
    async fn test_initialize_returns_increasing_ids() {
        let lifecycle = lifecycle();
        let first = lifecycle.initialize_call(&pid("alice")).await.unwrap();
        let second = lifecycle.initialize_call(&pid("alice")).await.unwrap();
        let third = lifecycle.initialize_call(&pid("bob")).await.unwrap();

        assert_eq!(first, CallId(1));
        assert!(first < second && second < third);
        assert_eq!(lifecycle.active_calls().await, 3);
    }

    #[tokio::test]
    async fn test_join_fills_slot_one() {
        let lifecycle = lifecycle();
        let id = lifecycle.initialize_call(&pid("alice")).await.unwrap();

        let snapshot = lifecycle.join_call(id, &pid("bob")).await.unwrap();

        assert_eq!(snapshot.participant(Slot::Joiner), Some(&pid("bob")));
        assert_eq!(lifecycle.get_session(id).await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_join_unknown_call_is_not_found() {
        let lifecycle = lifecycle();
        let result = lifecycle.join_call(CallId(9), &pid("bob")).await;
        assert_eq!(result, Err(CallError::NotFound(CallId(9))));
    }

    #[tokio::test]
    async fn test_second_join_is_slot_taken_and_leaves_state() {
        let lifecycle = lifecycle();
        let id = lifecycle.initialize_call(&pid("alice")).await.unwrap();
        lifecycle.join_call(id, &pid("bob")).await.unwrap();
        let before = lifecycle.get_session(id).await.unwrap();

        let result = lifecycle.join_call(id, &pid("carol")).await;

        assert_eq!(result, Err(CallError::SlotTaken(id)));
        assert_eq!(lifecycle.get_session(id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_self_join_is_invalid_participant() {
        let lifecycle = lifecycle();
        let id = lifecycle.initialize_call(&pid("alice")).await.unwrap();

        let result = lifecycle.join_call(id, &pid("alice")).await;

        assert!(matches!(result, Err(CallError::InvalidParticipant(_))));
        assert!(lifecycle
            .get_session(id)
            .await
            .unwrap()
            .participant(Slot::Joiner)
            .is_none());
    }

    #[tokio::test]
    async fn test_concurrent_joins_exactly_one_wins() {
        let lifecycle = lifecycle();
        let id = lifecycle.initialize_call(&pid("alice")).await.unwrap();

        let a = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.join_call(id, &pid("bob")).await })
        };
        let b = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.join_call(id, &pid("carol")).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        let wins = results.iter().filter(|r| r.is_ok()).count();
        let slot_taken = results
            .iter()
            .filter(|r| matches!(r, Err(CallError::SlotTaken(_))))
            .count();
        assert_eq!((wins, slot_taken), (1, 1));
    }

    #[tokio::test]
    async fn test_end_by_either_participant() {
        let lifecycle = lifecycle();
        let first = lifecycle.initialize_call(&pid("alice")).await.unwrap();
        lifecycle.join_call(first, &pid("bob")).await.unwrap();
        lifecycle.end_call(first, &pid("bob")).await.unwrap();
        assert_eq!(
            lifecycle.get_session(first).await,
            Err(CallError::NotFound(first))
        );

        let second = lifecycle.initialize_call(&pid("alice")).await.unwrap();
        lifecycle.end_call(second, &pid("alice")).await.unwrap();
        assert_eq!(lifecycle.active_calls().await, 0);
    }

    #[tokio::test]
    async fn test_end_twice_is_not_found() {
        let lifecycle = lifecycle();
        let id = lifecycle.initialize_call(&pid("alice")).await.unwrap();

        lifecycle.end_call(id, &pid("alice")).await.unwrap();
        assert_eq!(
            lifecycle.end_call(id, &pid("alice")).await,
            Err(CallError::NotFound(id))
        );
    }

    #[tokio::test]
    async fn test_end_by_stranger_is_forbidden() {
        let lifecycle = lifecycle();
        let id = lifecycle.initialize_call(&pid("alice")).await.unwrap();

        let result = lifecycle.end_call(id, &pid("mallory")).await;

        assert!(matches!(result, Err(CallError::Forbidden(_))));
        assert!(lifecycle.get_session(id).await.is_ok());
    }

    #[tokio::test]
    async fn test_id_collision_is_internal_error() {
        let store = Arc::new(SessionStore::new());
        // Occupy the id the allocator will hand out next
        store.create(CallId(1), pid("squatter")).await.unwrap();
        let lifecycle = CallLifecycle::new(Arc::clone(&store));

        let result = lifecycle.initialize_call(&pid("alice")).await;

        assert_eq!(result, Err(CallError::Internal));
        assert_eq!(
            store.get(CallId(1)).await.unwrap().participant(Slot::Initiator),
            Some(&pid("squatter"))
        );
    }

    #[tokio::test]
    async fn test_concurrent_ends_exactly_one_succeeds() {
        let lifecycle = lifecycle();
        let id = lifecycle.initialize_call(&pid("alice")).await.unwrap();
        lifecycle.join_call(id, &pid("bob")).await.unwrap();

        let a = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.end_call(id, &pid("alice")).await })
        };
        let b = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.end_call(id, &pid("bob")).await })
        };
        let mut results = vec![a.await.unwrap(), b.await.unwrap()];
        results.sort_by_key(Result::is_err);

        assert_eq!(results, vec![Ok(()), Err(CallError::NotFound(id))]);
        assert_eq!(lifecycle.active_calls().await, 0);
    }
}
