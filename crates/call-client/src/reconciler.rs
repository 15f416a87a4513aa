//! Snapshot reconciliation.
//!
//! Each poll returns a full [`CallSession`] snapshot. The reconciler turns
//! that snapshot into the minimal set of peer-connection calls not yet made:
//!
//! - the remote description (the answer for the initiator, the offer for the
//!   joiner), applied again only when its text changes
//! - the remote slot's candidates beyond `cursor`, an index into that slot's
//!   append-only sequence
//!
//! Applying the same snapshot twice is a no-op. Candidates are held back
//! until a remote description has been applied; they stay beyond the cursor
//! and go out on a later pass.

use crate::errors::ClientError;
use crate::peer::PeerConnection;
use common::types::{CallSession, Slot};
use tracing::{debug, warn};

/// What a single reconciliation pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// A new remote description was applied.
    pub description_applied: bool,
    /// Remote candidates handed to the peer connection (accepted or rejected).
    pub candidates_applied: usize,
}

/// Per-call reconciliation state for one side.
#[derive(Debug)]
pub struct Reconciler {
    role: Slot,
    remote_description: Option<String>,
    cursor: usize,
    pending_answer: Option<String>,
}

impl Reconciler {
    pub fn new(role: Slot) -> Self {
        Self {
            role,
            remote_description: None,
            cursor: 0,
            pending_answer: None,
        }
    }

    pub fn role(&self) -> Slot {
        self.role
    }

    /// Number of remote candidates already handled.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description.is_some()
    }

    /// Answer generated locally but not yet published (joiner only).
    pub fn pending_answer(&self) -> Option<&str> {
        self.pending_answer.as_deref()
    }

    /// Record that the pending answer reached the call service.
    pub fn answer_published(&mut self) {
        self.pending_answer = None;
    }

    /// Apply whatever in `session` has not been applied to `peer` yet.
    ///
    /// # Errors
    ///
    /// Returns the peer connection's error if applying the remote description
    /// or generating the answer fails. The description is then not recorded,
    /// so the next pass retries it. Candidate failures are logged and skipped.
    pub async fn reconcile(
        &mut self,
        session: &CallSession,
        peer: &dyn PeerConnection,
    ) -> Result<ReconcileOutcome, ClientError> {
        let mut outcome = ReconcileOutcome::default();

        let remote = match self.role {
            Slot::Initiator => session.answer.as_deref(),
            Slot::Joiner => session.offer.as_deref(),
        };

        if let Some(description) = remote {
            if self.remote_description.as_deref() != Some(description) {
                self.apply_description(description, peer).await?;
                outcome.description_applied = true;
            }
        }

        if self.remote_description.is_some() {
            let remote_slot = self.role.other();
            let fresh: Vec<&String> = session
                .candidates(remote_slot)
                .iter()
                .skip(self.cursor)
                .collect();

            for candidate in fresh {
                if let Err(e) = peer.add_remote_candidate(candidate).await {
                    warn!(
                        target: "cc.reconciler",
                        error = %e,
                        index = self.cursor,
                        "Remote candidate rejected, skipping"
                    );
                }
                self.cursor += 1;
                outcome.candidates_applied += 1;
            }
        }

        if outcome != ReconcileOutcome::default() {
            debug!(
                target: "cc.reconciler",
                role = %self.role,
                description_applied = outcome.description_applied,
                candidates_applied = outcome.candidates_applied,
                cursor = self.cursor,
                "Snapshot reconciled"
            );
        }

        Ok(outcome)
    }

    async fn apply_description(
        &mut self,
        description: &str,
        peer: &dyn PeerConnection,
    ) -> Result<(), ClientError> {
        let renegotiation = self.remote_description.is_some();
        peer.set_remote_description(description).await?;

        if self.role == Slot::Joiner {
            let answer = peer.create_answer().await?;
            peer.set_local_description(&answer).await?;
            self.pending_answer = Some(answer);
        }

        self.remote_description = Some(description.to_string());

        debug!(
            target: "cc.reconciler",
            role = %self.role,
            description_len = description.len(),
            renegotiation = renegotiation,
            "Remote description applied"
        );
        Ok(())
    }
}
