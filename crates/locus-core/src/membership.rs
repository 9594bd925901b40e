//! Membership: participants, host selection, and inactivity policy.
//!
//! Host selection is centralized in [`select_host`] so the tie-break rule
//! lives in exactly one place; every transition that can change host
//! membership (leave, eviction, teardown) goes through it.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use locus_proto::{ParticipantInfo, Pose};

use crate::ident::ParticipantId;

/// A participant admitted to a session.
#[derive(Debug, Clone)]
pub struct Participant {
    /// Session-scoped id.
    pub id: ParticipantId,
    /// Display name.
    pub display_name: String,
    /// Whether the participant joined without an account.
    pub is_anonymous: bool,
    /// Monotonic join time; drives host-selection ordering.
    pub joined_at: Instant,
    /// Wall-clock join time for wire messages.
    pub joined_unix: f64,
    /// Whether this participant currently holds host authority.
    pub is_host: bool,
    /// Whether the participant has aligned to the shared frame.
    pub colocalized: bool,
    /// Last received pose (last-writer-wins slot owned by this participant).
    pub pose: Option<Pose>,
    /// Last time any message arrived from this participant.
    pub last_activity: Instant,
}

impl Participant {
    /// Roster entry for snapshots and join responses.
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            user_id: self.id.clone(),
            display_name: self.display_name.clone(),
            is_anonymous: self.is_anonymous,
            is_host: self.is_host,
            colocalized: self.colocalized,
            join_time: self.joined_unix,
        }
    }
}

/// Select the host from a participant set.
///
/// Deterministic: earliest join time wins, ties broken by ascending
/// participant id. Returns `None` only for an empty set; a non-empty
/// session is never hostless.
pub fn select_host(participants: &HashMap<ParticipantId, Participant>) -> Option<ParticipantId> {
    participants
        .values()
        .min_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)))
        .map(|p| p.id.clone())
}

/// Inactivity eviction policy.
///
/// A participant with no received message (keep-alives included) for the
/// window is force-removed as if it had left. The check runs on a periodic
/// sweep, far below the pose rate, so it costs nothing per message.
#[derive(Debug, Clone, Copy)]
pub struct InactivityPolicy {
    /// How long a participant may stay silent.
    pub window: Duration,
}

impl Default for InactivityPolicy {
    fn default() -> Self {
        Self { window: Duration::from_secs(60) }
    }
}

impl InactivityPolicy {
    /// True if the participant has been silent past the window.
    pub fn is_stale(&self, participant: &Participant, now: Instant) -> bool {
        now.saturating_duration_since(participant.last_activity) > self.window
    }

    /// Ids of all stale participants, for the sweep to evict.
    pub fn stale_participants(
        &self,
        participants: &HashMap<ParticipantId, Participant>,
        now: Instant,
    ) -> Vec<ParticipantId> {
        participants
            .values()
            .filter(|p| self.is_stale(p, now))
            .map(|p| p.id.clone())
            .collect()
    }
}
