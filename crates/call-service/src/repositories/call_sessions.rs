//! In-memory session store.
//!
//! Owns the mapping `CallId -> CallSession`. The store knows nothing about
//! negotiation rules; callers express every change through [`SessionStore::mutate`],
//! which runs a closure against the record under the write lock.
//!
//! # Atomicity
//!
//! `mutate` applies the closure to a draft copy and commits it only when the
//! closure returns `Ok`. A rejected mutation therefore leaves the stored
//! record untouched, and no reader ever observes a half-applied change.

use crate::errors::CallError;
use common::types::{CallId, CallSession, ParticipantId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Concurrency-safe call session storage.
#[derive(Debug)]
pub struct SessionStore {
    /// Next id handed out by `allocate`.
    next_id: AtomicU64,
    /// Live sessions by id.
    sessions: RwLock<HashMap<CallId, CallSession>>,
}

impl SessionStore {
    /// Create an empty store. The first allocated id is 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate a fresh call id, strictly greater than every id handed out before.
    pub fn allocate(&self) -> CallId {
        CallId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Insert a new session with `initiator` in slot 0.
    ///
    /// # Errors
    ///
    /// - `CallError::AlreadyExists` - `id` is already present
    #[instrument(skip(self, initiator), fields(call_id = %id))]
    pub async fn create(
        &self,
        id: CallId,
        initiator: ParticipantId,
    ) -> Result<CallSession, CallError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return Err(CallError::AlreadyExists(id));
        }

        let session = CallSession::new(initiator);
        sessions.insert(id, session.clone());

        debug!(target: "cs.store", call_id = %id, "Session created");
        Ok(session)
    }

    /// Read a snapshot of a session.
    ///
    /// # Errors
    ///
    /// - `CallError::NotFound` - no session with this id
    pub async fn get(&self, id: CallId) -> Result<CallSession, CallError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(CallError::NotFound(id))
    }

    /// Atomically read-modify-write a session.
    ///
    /// The closure's error is returned as-is and nothing is committed.
    ///
    /// # Errors
    ///
    /// - `CallError::NotFound` - no session with this id
    /// - any error returned by `f`
    pub async fn mutate<T, F>(&self, id: CallId, f: F) -> Result<T, CallError>
    where
        F: FnOnce(&mut CallSession) -> Result<T, CallError>,
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(CallError::NotFound(id))?;

        let mut draft = session.clone();
        let output = f(&mut draft)?;
        *session = draft;

        Ok(output)
    }

    /// Delete a session, returning its final state.
    ///
    /// Not idempotent: removing an absent id fails.
    ///
    /// # Errors
    ///
    /// - `CallError::NotFound` - no session with this id
    pub async fn remove(&self, id: CallId) -> Result<CallSession, CallError> {
        self.remove_if(id, |session| Ok(session.clone())).await
    }

    /// Delete a session if `check` accepts it, under a single write lock.
    ///
    /// The session is left in place when `check` fails.
    ///
    /// # Errors
    ///
    /// - `CallError::NotFound` - no session with this id
    /// - any error returned by `check`
    #[instrument(skip(self, check), fields(call_id = %id))]
    pub async fn remove_if<T, F>(&self, id: CallId, check: F) -> Result<T, CallError>
    where
        F: FnOnce(&CallSession) -> Result<T, CallError>,
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get(&id).ok_or(CallError::NotFound(id))?;
        let output = check(session)?;
        sessions.remove(&id);

        debug!(target: "cs.store", call_id = %id, "Session removed");
        Ok(output)
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
