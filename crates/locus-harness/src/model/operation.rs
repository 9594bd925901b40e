//! Operations for model-based testing.
//!
//! Operations represent the externally visible actions against a session
//! server. They are generated randomly and applied to both the model and
//! the real driver, whose results and observable states must agree.

use arbitrary::Arbitrary;

/// Client identifier (0-indexed).
pub type ClientId = u8;

/// Operations that can be applied to the system.
///
/// Session and anchor references are small integers folded into the live
/// range at application time, so random sequences stay meaningful without
/// a generator that tracks state.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Client opens a new session.
    CreateSession {
        /// Client performing the operation.
        client: ClientId,
        /// Participant cap seed (folded into 1..=4 to force full sessions).
        cap: u8,
    },

    /// Client joins a previously created session by its share code.
    JoinSession {
        /// Client joining.
        client: ClientId,
        /// Index into sessions in creation order (modulo live count).
        session_ref: u8,
    },

    /// Client's connection drops.
    Disconnect {
        /// Client disconnecting.
        client: ClientId,
    },

    /// Client places an anchor in its session.
    PlaceAnchor {
        /// Client placing.
        client: ClientId,
        /// Anchor id slot (folded into a small space to force conflicts).
        slot: u8,
    },

    /// Client attempts to remove an anchor.
    RemoveAnchor {
        /// Client removing.
        client: ClientId,
        /// Anchor id slot.
        slot: u8,
    },
}

/// Number of distinct anchor id slots; small so creates collide often.
pub const ANCHOR_SLOTS: u8 = 6;

/// Anchor id for a slot.
pub fn anchor_id(slot: u8) -> String {
    format!("slot_{}", slot % ANCHOR_SLOTS)
}

/// Fold a cap seed into the 1..=4 range.
pub fn fold_cap(cap: u8) -> u32 {
    u32::from(cap % 4) + 1
}

/// Errors an operation can produce, identical on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// Client already belongs to a session.
    AlreadyInSession,
    /// Client belongs to no session.
    NotInSession,
    /// No session matches the reference.
    InvalidSession,
    /// Target session is at its participant cap.
    SessionFull,
    /// Target session already closed.
    SessionClosed,
}

/// Result of applying one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation accepted (including deliberate silent no-ops).
    Ok,
    /// Operation rejected.
    Error(OperationError),
}

impl OperationResult {
    /// True for the accepted case.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}
