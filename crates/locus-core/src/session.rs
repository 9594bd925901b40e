//! Session state machine.
//!
//! The single source of truth for one session: participants, host
//! assignment, coordinate system, and the anchor set. Pure and
//! action-based: every operation returns [`SessionAction`]s for the driver
//! to execute; the state machine itself performs no I/O.
//!
//! ## Phases
//!
//! ```text
//! Open ──first join──▶ Colocalizing ──host frame──▶ Colocalized
//!   │                        │                          │
//!   └────── terminate / last leave / TTL expiry ────────┘
//!                            │
//!                         Closing ──grace elapsed──▶ Closed
//! ```
//!
//! ## Invariants
//!
//! - Exactly one participant holds `is_host` whenever the set is non-empty.
//! - Participant count never exceeds `max_participants`.
//! - Anchor deletes succeed only for the creator or the current host.
//! - The coordinate system is set at most once, by the host.

use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, Instant},
};

use locus_proto::{
    Anchor, ColocalizationMethod, CoordinateSystem, Message, Pose, Quat, Vec3,
};

use crate::{
    env::Environment,
    error::SessionError,
    ident::{self, ParticipantId, SessionId},
    membership::{self, InactivityPolicy, Participant},
};

/// Hard cap on `max_participants`, whatever a create request asks for.
pub const MAX_PARTICIPANT_CAP: u32 = 50;

/// Per-session configuration fixed at creation.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Participant cap (clamped to [`MAX_PARTICIPANT_CAP`]).
    pub max_participants: u32,
    /// How the session intends to colocalize.
    pub colocalization_method: ColocalizationMethod,
    /// Inactivity eviction policy.
    pub inactivity: InactivityPolicy,
    /// Drain grace between Closing and Closed.
    pub closing_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_participants: 10,
            colocalization_method: ColocalizationMethod::QrCode,
            inactivity: InactivityPolicy::default(),
            closing_grace: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    /// Clamp a requested cap into the allowed range.
    pub fn clamp_max_participants(requested: u32) -> u32 {
        requested.clamp(1, MAX_PARTICIPANT_CAP)
    }
}

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Accepting joins; nobody present yet.
    Open,
    /// Participants present, shared frame not yet established.
    Colocalizing,
    /// Shared frame fixed; steady state.
    Colocalized,
    /// Teardown in progress; in-flight messages drain.
    Closing,
    /// Terminal.
    Closed,
}

/// Admission ticket for a joining participant.
#[derive(Debug, Clone)]
pub struct NewParticipant {
    /// Pre-minted participant id.
    pub id: ParticipantId,
    /// Display name.
    pub display_name: String,
    /// Whether the participant joined without an account.
    pub is_anonymous: bool,
}

/// Actions returned by session operations for the driver to execute.
#[derive(Debug, Clone)]
pub enum SessionAction {
    /// Deliver a message to every current participant.
    Broadcast {
        /// The message to deliver.
        message: Message,
        /// Participant to skip (usually the original sender).
        exclude: Option<ParticipantId>,
        /// Restrict delivery to participants aligned to the shared frame.
        colocalized_only: bool,
    },

    /// Deliver a message to one participant.
    SendTo {
        /// The recipient.
        participant_id: ParticipantId,
        /// The message to deliver.
        message: Message,
    },

    /// The session entered Closing; the driver should drop it once Closed.
    Terminated {
        /// Why the session ended.
        reason: String,
    },
}

/// Per-session authoritative state machine.
///
/// # Type Parameters
///
/// - `E`: Environment implementation for time/randomness
pub struct Session<E: Environment> {
    id: SessionId,
    share_code: String,
    config: SessionConfig,
    phase: SessionPhase,
    created_unix: f64,
    coordinate_system: Option<CoordinateSystem>,
    colocalized: bool,
    host_id: Option<ParticipantId>,
    participants: HashMap<ParticipantId, Participant>,
    anchors: BTreeMap<String, Anchor>,
    closing_since: Option<Instant>,
    env: E,
}

impl<E: Environment> Session<E> {
    /// Create a new session in the `Open` phase.
    pub fn new(env: E, id: SessionId, share_code: String, config: SessionConfig) -> Self {
        let created_unix = env.unix_time();
        Self {
            id,
            share_code,
            config,
            phase: SessionPhase::Open,
            created_unix,
            coordinate_system: None,
            colocalized: false,
            host_id: None,
            participants: HashMap::new(),
            anchors: BTreeMap::new(),
            closing_since: None,
            env,
        }
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Share code the session was allocated under.
    pub fn share_code(&self) -> &str {
        &self.share_code
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Wall-clock creation time (unix seconds).
    pub fn created_at(&self) -> f64 {
        self.created_unix
    }

    /// Current host, if any participant is present.
    pub fn host_id(&self) -> Option<&str> {
        self.host_id.as_deref()
    }

    /// Number of admitted participants.
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Configured participant cap.
    pub fn max_participants(&self) -> u32 {
        self.config.max_participants
    }

    /// Look up a participant.
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// Iterate over all admitted participants.
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Look up an anchor.
    pub fn anchor(&self, id: &str) -> Option<&Anchor> {
        self.anchors.get(id)
    }

    /// Iterate over live anchors in id order.
    pub fn anchors(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.values()
    }

    /// Number of live anchors.
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    /// Whether the shared frame is established.
    pub fn is_colocalized(&self) -> bool {
        self.colocalized
    }

    /// True once the session reached its terminal phase.
    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    /// Admit a participant.
    ///
    /// The first join makes the joiner host and moves the session from
    /// `Open` to `Colocalizing`. The joiner receives one full
    /// `session_state` snapshot before any incremental deltas; everyone
    /// else receives a `user_joined` event.
    ///
    /// # Errors
    ///
    /// - [`SessionError::SessionExpired`] once teardown has begun.
    /// - [`SessionError::SessionFull`] at the participant cap.
    pub fn join(&mut self, new: NewParticipant) -> Result<Vec<SessionAction>, SessionError> {
        if matches!(self.phase, SessionPhase::Closing | SessionPhase::Closed) {
            return Err(SessionError::SessionExpired);
        }
        if self.participants.len() >= self.config.max_participants as usize {
            return Err(SessionError::SessionFull { max: self.config.max_participants });
        }

        let now = self.env.now();
        let unix = self.env.unix_time();
        let is_host = self.participants.is_empty();

        let participant = Participant {
            id: new.id.clone(),
            display_name: new.display_name.clone(),
            is_anonymous: new.is_anonymous,
            joined_at: now,
            joined_unix: unix,
            is_host,
            colocalized: false,
            pose: None,
            last_activity: now,
        };
        self.participants.insert(new.id.clone(), participant);

        if is_host {
            self.host_id = Some(new.id.clone());
            tracing::info!(session_id = %self.id, participant_id = %new.id, "first joiner is host");
        }
        if self.phase == SessionPhase::Open {
            self.phase = SessionPhase::Colocalizing;
        }

        let mut actions = vec![SessionAction::Broadcast {
            message: Message::UserJoined {
                user_id: new.id.clone(),
                display_name: new.display_name,
                is_host,
                is_anonymous: new.is_anonymous,
                timestamp: unix,
            },
            exclude: Some(new.id.clone()),
            colocalized_only: false,
        }];
        actions.push(SessionAction::SendTo {
            participant_id: new.id,
            message: self.snapshot(),
        });

        Ok(actions)
    }

    /// Remove a participant, migrating host authority if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownParticipant`] if the id is not in the
    /// session.
    pub fn leave(&mut self, participant_id: &str) -> Result<Vec<SessionAction>, SessionError> {
        if !self.participants.contains_key(participant_id) {
            return Err(SessionError::UnknownParticipant {
                participant_id: participant_id.to_string(),
            });
        }
        Ok(self.remove_participant(participant_id, "left"))
    }

    /// Apply a pose sample. Last-writer-wins per participant.
    ///
    /// Only colocalized senders are rebroadcast, and only to colocalized
    /// receivers: a pose outside the shared frame means nothing to peers.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownParticipant`] for unadmitted senders.
    pub fn apply_pose_update(
        &mut self,
        sender_id: &str,
        pose: Pose,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let now = self.env.now();
        let unix = self.env.unix_time();
        let participant = self.participants.get_mut(sender_id).ok_or_else(|| {
            SessionError::UnknownParticipant { participant_id: sender_id.to_string() }
        })?;

        participant.pose = Some(pose);
        participant.last_activity = now;

        if !participant.colocalized {
            return Ok(vec![]);
        }

        Ok(vec![SessionAction::Broadcast {
            message: Message::PoseUpdate {
                user_id: Some(sender_id.to_string()),
                pose: Pose { timestamp: unix, ..pose },
            },
            exclude: Some(sender_id.to_string()),
            colocalized_only: true,
        }])
    }

    /// Create an anchor, or resolve an id collision deterministically.
    ///
    /// A duplicate `anchor_id` from the same creator is treated as an
    /// update. A duplicate from a different creator is a conflict: the
    /// first writer keeps ownership and the request becomes a logged no-op,
    /// keeping the channel available instead of erroring.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownParticipant`] for unadmitted senders.
    pub fn create_anchor(
        &mut self,
        sender_id: &str,
        anchor_id: Option<String>,
        position: Vec3,
        rotation: Quat,
        metadata: BTreeMap<String, String>,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.require_participant(sender_id)?;
        let unix = self.env.unix_time();
        let id = anchor_id.unwrap_or_else(|| ident::anchor_id(&self.env));

        if let Some(existing) = self.anchors.get(&id) {
            if existing.creator_id != sender_id {
                tracing::warn!(
                    session_id = %self.id,
                    anchor_id = %id,
                    owner = %existing.creator_id,
                    requester = %sender_id,
                    "anchor id conflict, first writer keeps ownership"
                );
                return Ok(vec![]);
            }
            // Same creator re-creating: treat as an update.
            return self.update_anchor(sender_id, &id, Some(position), Some(rotation), Some(metadata));
        }

        let anchor = Anchor {
            id: id.clone(),
            creator_id: sender_id.to_string(),
            position,
            rotation,
            metadata: metadata.clone(),
            created_at: unix,
            updated_at: unix,
        };
        self.anchors.insert(id.clone(), anchor);
        self.touch(sender_id);

        tracing::info!(session_id = %self.id, anchor_id = %id, creator = %sender_id, "anchor created");

        Ok(vec![SessionAction::Broadcast {
            message: Message::AnchorCreate {
                anchor_id: Some(id),
                position,
                rotation,
                metadata,
                creator_id: Some(sender_id.to_string()),
                created_at: Some(unix),
            },
            exclude: None,
            colocalized_only: false,
        }])
    }

    /// Partially update an anchor. No authorization check by design: any
    /// participant may move shared content. Unset fields are preserved.
    ///
    /// # Errors
    ///
    /// - [`SessionError::UnknownParticipant`] for unadmitted senders.
    /// - [`SessionError::UnknownAnchor`] if the anchor does not exist.
    pub fn update_anchor(
        &mut self,
        sender_id: &str,
        anchor_id: &str,
        position: Option<Vec3>,
        rotation: Option<Quat>,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.require_participant(sender_id)?;
        let unix = self.env.unix_time();

        let anchor = self
            .anchors
            .get_mut(anchor_id)
            .ok_or_else(|| SessionError::UnknownAnchor { anchor_id: anchor_id.to_string() })?;

        if let Some(position) = position {
            anchor.position = position;
        }
        if let Some(rotation) = rotation {
            anchor.rotation = rotation;
        }
        if let Some(metadata) = metadata {
            anchor.metadata = metadata;
        }
        anchor.updated_at = unix;

        let message = Message::AnchorUpdate {
            anchor_id: anchor_id.to_string(),
            position: Some(anchor.position),
            rotation: Some(anchor.rotation),
            metadata: Some(anchor.metadata.clone()),
            timestamp: Some(unix),
        };
        self.touch(sender_id);

        Ok(vec![SessionAction::Broadcast { message, exclude: None, colocalized_only: false }])
    }

    /// Delete an anchor if the requester is its creator or the host.
    ///
    /// Unauthorized attempts are silent no-ops: logged, no state change,
    /// no broadcast, and nothing surfaced to the requester (the original
    /// contract; existence details never leak). A delete of an unknown
    /// anchor is likewise silent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownParticipant`] for unadmitted senders.
    pub fn delete_anchor(
        &mut self,
        sender_id: &str,
        anchor_id: &str,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.require_participant(sender_id)?;
        let unix = self.env.unix_time();

        let Some(anchor) = self.anchors.get(anchor_id) else {
            tracing::debug!(session_id = %self.id, anchor_id, "delete of unknown anchor ignored");
            return Ok(vec![]);
        };

        let is_creator = anchor.creator_id == sender_id;
        let is_host = self.host_id.as_deref() == Some(sender_id);
        if !is_creator && !is_host {
            tracing::warn!(
                session_id = %self.id,
                anchor_id,
                requester = %sender_id,
                "unauthorized anchor delete dropped"
            );
            return Ok(vec![]);
        }

        self.anchors.remove(anchor_id);
        self.touch(sender_id);
        tracing::info!(session_id = %self.id, anchor_id, requester = %sender_id, "anchor deleted");

        Ok(vec![SessionAction::Broadcast {
            message: Message::AnchorDelete {
                anchor_id: anchor_id.to_string(),
                timestamp: Some(unix),
            },
            exclude: None,
            colocalized_only: false,
        }])
    }

    /// Establish the shared coordinate frame. Host only.
    ///
    /// Non-host calls are ignored (logged, no state change, no broadcast).
    /// A successful call fixes the frame, moves the session to
    /// `Colocalized`, and broadcasts the frame to everyone.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownParticipant`] for unadmitted senders.
    pub fn set_colocalization(
        &mut self,
        sender_id: &str,
        coordinate_system: CoordinateSystem,
        method: Option<ColocalizationMethod>,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.require_participant(sender_id)?;
        let unix = self.env.unix_time();

        if self.host_id.as_deref() != Some(sender_id) {
            tracing::debug!(
                session_id = %self.id,
                sender = %sender_id,
                "coordinate system from non-host ignored"
            );
            return Ok(vec![]);
        }

        self.coordinate_system = Some(coordinate_system);
        if let Some(method) = method {
            self.config.colocalization_method = method;
        }
        self.colocalized = true;
        if self.phase == SessionPhase::Colocalizing {
            self.phase = SessionPhase::Colocalized;
        }
        self.touch(sender_id);

        tracing::info!(session_id = %self.id, host = %sender_id, "coordinate system established");

        Ok(vec![SessionAction::Broadcast {
            message: Message::CoordinateSystem {
                coordinate_system,
                colocalization_method: self.config.colocalization_method,
                is_colocalized: true,
                timestamp: unix,
            },
            exclude: None,
            colocalized_only: false,
        }])
    }

    /// A participant announcing it has (or has lost) local alignment to
    /// the shared frame. Broadcast to peers as a status delta.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownParticipant`] for unadmitted senders.
    pub fn set_participant_colocalized(
        &mut self,
        sender_id: &str,
        colocalized: bool,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let now = self.env.now();
        let participant = self.participants.get_mut(sender_id).ok_or_else(|| {
            SessionError::UnknownParticipant { participant_id: sender_id.to_string() }
        })?;
        participant.colocalized = colocalized;
        participant.last_activity = now;

        Ok(vec![SessionAction::Broadcast {
            message: Message::ColocalizationData {
                user_id: Some(sender_id.to_string()),
                colocalized: Some(colocalized),
                coordinate_system: None,
                method: None,
            },
            exclude: Some(sender_id.to_string()),
            colocalized_only: false,
        }])
    }

    /// Relay a chat message to the whole session, sender included.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownParticipant`] for unadmitted senders.
    pub fn chat(
        &mut self,
        sender_id: &str,
        message: String,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.require_participant(sender_id)?;
        let unix = self.env.unix_time();
        self.touch(sender_id);

        Ok(vec![SessionAction::Broadcast {
            message: Message::ChatMessage {
                user_id: Some(sender_id.to_string()),
                message,
                timestamp: Some(unix),
            },
            exclude: None,
            colocalized_only: false,
        }])
    }

    /// Answer a keep-alive ping with a pong carrying both clocks.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownParticipant`] for unadmitted senders.
    pub fn ping(
        &mut self,
        sender_id: &str,
        client_timestamp: f64,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.require_participant(sender_id)?;
        let unix = self.env.unix_time();
        self.touch(sender_id);

        Ok(vec![SessionAction::SendTo {
            participant_id: sender_id.to_string(),
            message: Message::Pong { timestamp: unix, client_timestamp },
        }])
    }

    /// Record activity from a participant without any other effect.
    pub fn touch(&mut self, participant_id: &str) {
        let now = self.env.now();
        if let Some(p) = self.participants.get_mut(participant_id) {
            p.last_activity = now;
        }
    }

    /// Point-in-time snapshot of the full session state.
    ///
    /// Copy-on-read: the returned message owns its data, so the caller may
    /// release the session lock before serializing.
    pub fn snapshot(&self) -> Message {
        let participants = self
            .participants
            .values()
            .map(|p| (p.id.clone(), p.info()))
            .collect::<BTreeMap<_, _>>();

        Message::SessionState {
            session_id: self.id.clone(),
            coordinate_system: self.coordinate_system,
            colocalization_method: self.config.colocalization_method,
            is_colocalized: self.colocalized,
            host_id: self.host_id.clone(),
            anchors: self.anchors.clone(),
            participants,
            timestamp: self.env.unix_time(),
        }
    }

    /// Begin teardown: broadcast a terminal event and enter `Closing`.
    ///
    /// Used for explicit terminate and TTL expiry. Participants receive a
    /// terminal `error` event rather than a hard disconnect, so clients can
    /// distinguish expiry from network loss.
    pub fn terminate(&mut self, reason: &str) -> Vec<SessionAction> {
        if matches!(self.phase, SessionPhase::Closing | SessionPhase::Closed) {
            return vec![];
        }
        let now = self.env.now();
        self.phase = SessionPhase::Closing;
        self.closing_since = Some(now);

        tracing::info!(session_id = %self.id, reason, "session closing");

        let mut actions = Vec::new();
        if !self.participants.is_empty() {
            actions.push(SessionAction::Broadcast {
                message: Message::Error {
                    code: "session_expired".to_string(),
                    message: reason.to_string(),
                },
                exclude: None,
                colocalized_only: false,
            });
        }
        actions.push(SessionAction::Terminated { reason: reason.to_string() });
        actions
    }

    /// Periodic maintenance: inactivity evictions and the Closing→Closed
    /// transition. Runs at sweep cadence, far below the pose rate.
    pub fn tick(&mut self) -> Vec<SessionAction> {
        let now = self.env.now();
        let mut actions = Vec::new();

        if self.phase == SessionPhase::Closing {
            let elapsed = self
                .closing_since
                .map_or(Duration::ZERO, |since| now.saturating_duration_since(since));
            if elapsed >= self.config.closing_grace {
                self.phase = SessionPhase::Closed;
                self.participants.clear();
                self.host_id = None;
                tracing::info!(session_id = %self.id, "session closed");
            }
            return actions;
        }
        if self.phase == SessionPhase::Closed {
            return actions;
        }

        for participant_id in self.config.inactivity.stale_participants(&self.participants, now) {
            tracing::info!(
                session_id = %self.id,
                participant_id = %participant_id,
                "evicting inactive participant"
            );
            actions.extend(self.remove_participant(&participant_id, "inactivity timeout"));
        }

        actions
    }

    fn require_participant(&self, participant_id: &str) -> Result<(), SessionError> {
        if self.participants.contains_key(participant_id) {
            Ok(())
        } else {
            Err(SessionError::UnknownParticipant { participant_id: participant_id.to_string() })
        }
    }

    /// Shared removal path for leave and eviction. Handles host migration
    /// and last-participant teardown.
    fn remove_participant(&mut self, participant_id: &str, reason: &str) -> Vec<SessionAction> {
        let unix = self.env.unix_time();
        let Some(removed) = self.participants.remove(participant_id) else {
            return vec![];
        };

        tracing::info!(
            session_id = %self.id,
            participant_id = %participant_id,
            reason,
            "participant removed"
        );

        let mut actions = vec![SessionAction::Broadcast {
            message: Message::UserLeft { user_id: participant_id.to_string(), timestamp: unix },
            exclude: None,
            colocalized_only: false,
        }];

        if self.participants.is_empty() {
            self.host_id = None;
            actions.extend(self.terminate("last participant left"));
            return actions;
        }

        if removed.is_host {
            actions.extend(self.migrate_host(unix));
        }

        actions
    }

    /// Hand host authority to the earliest-joined remaining participant.
    ///
    /// Single migration path so the tie-break rule (join time, then id)
    /// cannot drift between call sites.
    fn migrate_host(&mut self, unix: f64) -> Vec<SessionAction> {
        let Some(new_host) = membership::select_host(&self.participants) else {
            self.host_id = None;
            return vec![];
        };

        for p in self.participants.values_mut() {
            p.is_host = p.id == new_host;
        }
        self.host_id = Some(new_host.clone());

        tracing::info!(session_id = %self.id, new_host = %new_host, "host migrated");

        vec![SessionAction::Broadcast {
            message: Message::HostChanged { user_id: new_host, timestamp: unix },
            exclude: None,
            colocalized_only: false,
        }]
    }

    /// Verify the single-host invariant; used by tests and debug assertions.
    pub fn host_invariant_holds(&self) -> bool {
        let host_flags = self.participants.values().filter(|p| p.is_host).count();
        if self.participants.is_empty() {
            host_flags == 0
        } else {
            host_flags == 1
                && self.host_id.as_ref().is_some_and(|h| {
                    self.participants.get(h).is_some_and(|p| p.is_host)
                })
        }
    }
}

impl<E: Environment> std::fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("share_code", &self.share_code)
            .field("phase", &self.phase)
            .field("participants", &self.participants.len())
            .field("anchors", &self.anchors.len())
            .field("colocalized", &self.colocalized)
            .finish()
    }
}
