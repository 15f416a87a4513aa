//! Common data types for Tether components.
//!
//! A call session has exactly two participant slots. Slot identity decides
//! which negotiation fields a participant may write:
//!
//! ```text
//! Slot::Initiator (0)  -> offer,  candidates[0]
//! Slot::Joiner    (1)  -> answer, candidates[1]
//! ```

use crate::error::ParticipantIdError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum participant identity length in bytes.
pub const MAX_PARTICIPANT_ID_LENGTH: usize = 128;

/// Unique identifier for a call session.
///
/// Assigned monotonically by the call service; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identity of a call participant.
///
/// The service never interprets the value beyond equality. Construction
/// validates that the identity is non-empty, bounded, and visible ASCII so
/// it can travel in an HTTP header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Parse and validate a participant identity.
    ///
    /// # Errors
    ///
    /// Returns [`ParticipantIdError`] if the value is empty, longer than
    /// [`MAX_PARTICIPANT_ID_LENGTH`], or contains non-visible characters.
    pub fn parse(raw: &str) -> Result<Self, ParticipantIdError> {
        if raw.is_empty() {
            return Err(ParticipantIdError::Empty);
        }
        if raw.len() > MAX_PARTICIPANT_ID_LENGTH {
            return Err(ParticipantIdError::TooLong {
                len: raw.len(),
                max: MAX_PARTICIPANT_ID_LENGTH,
            });
        }
        if !raw.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ParticipantIdError::InvalidCharacter);
        }
        Ok(Self(raw.to_string()))
    }

    /// Borrow the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = ParticipantIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One of the two fixed participant positions in a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// Slot 0: created the call, writes the offer.
    Initiator,

    /// Slot 1: joined the call, writes the answer.
    Joiner,
}

impl Slot {
    /// Both slots in index order.
    pub const ALL: [Slot; 2] = [Slot::Initiator, Slot::Joiner];

    /// Numeric slot index (0 or 1).
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Slot::Initiator => 0,
            Slot::Joiner => 1,
        }
    }

    /// The opposite slot.
    #[must_use]
    pub fn other(self) -> Slot {
        match self {
            Slot::Initiator => Slot::Joiner,
            Slot::Joiner => Slot::Initiator,
        }
    }

    /// Returns the string representation of the slot (for logs and metrics).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Initiator => "initiator",
            Slot::Joiner => "joiner",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate record for one call.
///
/// The same shape is stored by the service and returned to callers as a
/// snapshot. Negotiation payloads and candidates are opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSession {
    /// Participant identity per slot; slot 0 is always set.
    pub participants: [Option<ParticipantId>; 2],

    /// Negotiation offer published by the initiator.
    pub offer: Option<String>,

    /// Negotiation answer published by the joiner.
    pub answer: Option<String>,

    /// Append-only reachability candidates, one sequence per slot.
    pub candidates: [Vec<String>; 2],
}

impl CallSession {
    /// Create a fresh session with `initiator` in slot 0 and nothing else set.
    #[must_use]
    pub fn new(initiator: ParticipantId) -> Self {
        Self {
            participants: [Some(initiator), None],
            offer: None,
            answer: None,
            candidates: [Vec::new(), Vec::new()],
        }
    }

    /// Participant occupying `slot`, if any.
    #[must_use]
    pub fn participant(&self, slot: Slot) -> Option<&ParticipantId> {
        let [initiator, joiner] = &self.participants;
        match slot {
            Slot::Initiator => initiator.as_ref(),
            Slot::Joiner => joiner.as_ref(),
        }
    }

    /// Mutable access to the participant entry for `slot`.
    pub fn participant_mut(&mut self, slot: Slot) -> &mut Option<ParticipantId> {
        let [initiator, joiner] = &mut self.participants;
        match slot {
            Slot::Initiator => initiator,
            Slot::Joiner => joiner,
        }
    }

    /// The slot occupied by `participant`, if it occupies one.
    #[must_use]
    pub fn slot_of(&self, participant: &ParticipantId) -> Option<Slot> {
        Slot::ALL
            .into_iter()
            .find(|slot| self.participant(*slot) == Some(participant))
    }

    /// Candidate sequence published by `slot`.
    #[must_use]
    pub fn candidates(&self, slot: Slot) -> &[String] {
        let [initiator, joiner] = &self.candidates;
        match slot {
            Slot::Initiator => initiator,
            Slot::Joiner => joiner,
        }
    }

    /// Mutable candidate sequence for `slot`.
    pub fn candidates_mut(&mut self, slot: Slot) -> &mut Vec<String> {
        let [initiator, joiner] = &mut self.candidates;
        match slot {
            Slot::Initiator => initiator,
            Slot::Joiner => joiner,
        }
    }

    /// Whether both slots are occupied.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.participant(Slot::Joiner).is_some()
    }
}
