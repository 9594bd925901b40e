//! Core error types.
//!
//! Two taxonomies live here: registry errors (share-code lookup and
//! allocation) and session errors (admission and per-operation failures).
//! Authorization failures on anchor deletes are deliberately absent: those
//! are resolved as silent no-ops inside the session, never surfaced.

use thiserror::Error;

/// Errors from the session registry (share-code namespace).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Code does not match `^[A-Z]{3}[0-9]{3}$`.
    #[error("invalid code format: {code:?}")]
    InvalidFormat {
        /// The rejected input.
        code: String,
    },

    /// Code is not allocated to any session.
    #[error("code not found: {code}")]
    NotFound {
        /// The unresolved code.
        code: String,
    },

    /// Code was allocated but the session's TTL has passed.
    #[error("code expired: {code}")]
    Expired {
        /// The expired code.
        code: String,
    },

    /// All generation attempts collided with live codes.
    ///
    /// The namespace holds ~17.6M codes, so this signals a capacity alarm
    /// rather than a per-request condition.
    #[error("share-code namespace exhausted after {attempts} attempts")]
    CodeExhaustion {
        /// How many generation attempts were made.
        attempts: usize,
    },
}

/// Errors from session state machine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Participant count reached `max_participants`.
    #[error("session is full ({max} participants)")]
    SessionFull {
        /// The participant cap that was hit.
        max: u32,
    },

    /// Session is closing or has expired; no longer accepting operations.
    #[error("session expired")]
    SessionExpired,

    /// Operation references a participant that is not in the session.
    #[error("unknown participant: {participant_id}")]
    UnknownParticipant {
        /// The missing participant id.
        participant_id: String,
    },

    /// Operation references an anchor that does not exist.
    #[error("unknown anchor: {anchor_id}")]
    UnknownAnchor {
        /// The missing anchor id.
        anchor_id: String,
    },
}

impl SessionError {
    /// True if the caller may usefully retry against a different session.
    ///
    /// `SessionFull` and `SessionExpired` are admission outcomes the client
    /// can act on; the others indicate a desynced caller.
    pub fn is_admission_failure(&self) -> bool {
        matches!(self, Self::SessionFull { .. } | Self::SessionExpired)
    }
}
