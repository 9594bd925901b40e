//! Replication channel message union.
//!
//! Every message on the wire is a JSON object with a `type` discriminator
//! and a closed set of variants. Unknown discriminators are decode errors:
//! the channel rejects them instead of silently ignoring them.
//!
//! Delivery classes:
//!
//! - `pose_update` is unreliable: a stale frame may be superseded without
//!   ever being delivered.
//! - Anchor, colocalization, and membership events are reliable and arrive
//!   in per-sender FIFO order. No ordering holds across senders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::ProtocolError,
    types::{Anchor, ColocalizationMethod, CoordinateSystem, ParticipantInfo, Pose, Quat, Vec3},
};

/// Maximum accepted chat message length in characters.
pub const MAX_CHAT_LENGTH: usize = 1000;

/// Identity of a participant as returned by create/join responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    /// Session-scoped participant id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Whether the participant joined without an account.
    pub is_anonymous: bool,
}

/// Session parameters echoed to a joining participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Maximum participants admitted to the session.
    pub max_players: u32,
    /// Seconds until the session expires absent further activity.
    pub expires_in: u64,
}

/// All messages carried by the replication channel.
///
/// One variant per message kind, discriminated by the `type` field.
/// Fields marked `Option` are filled by the server on rebroadcast and
/// omitted by clients (e.g. `user_id` on `pose_update`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Request a new session (first message on a fresh connection).
    SessionCreate {
        /// Optional display name for the creator.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        display_name: Option<String>,
        /// How the session intends to colocalize.
        #[serde(default)]
        colocalization_method: ColocalizationMethod,
        /// Requested participant cap.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        max_players: Option<u32>,
    },

    /// Server response to `session_create`.
    SessionCreated {
        /// Server-generated session id.
        session_id: String,
        /// Human-shareable join code.
        share_code: String,
        /// Identity assigned to the creator.
        creator: UserRef,
        /// Seconds until expiry.
        expires_in: u64,
        /// Participant cap after clamping.
        max_players: u32,
        /// Unix seconds of creation.
        created_at: f64,
    },

    /// Join an existing session by share code.
    SessionJoin {
        /// Share code, `[A-Z]{3}[0-9]{3}` (lowercase accepted).
        code: String,
        /// Optional display name.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        display_name: Option<String>,
    },

    /// Server response to `session_join`.
    SessionJoined {
        /// Resolved session id.
        session_id: String,
        /// Identity assigned to the joiner.
        user: UserRef,
        /// Share code that was joined.
        share_code: String,
        /// Session parameters.
        session_info: SessionInfo,
    },

    /// Participant pose sample. Unreliable delivery class.
    PoseUpdate {
        /// Filled by the server on rebroadcast; absent from client sends.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        user_id: Option<String>,
        /// The pose itself, flattened into the message body.
        #[serde(flatten)]
        pose: Pose,
    },

    /// Create a spatial anchor.
    AnchorCreate {
        /// Client-minted id; server mints one when absent.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        anchor_id: Option<String>,
        /// Anchor position.
        position: Vec3,
        /// Anchor orientation.
        rotation: Quat,
        /// Opaque application metadata.
        #[serde(default)]
        metadata: BTreeMap<String, String>,
        /// Filled by the server on rebroadcast.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        creator_id: Option<String>,
        /// Filled by the server on rebroadcast.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        created_at: Option<f64>,
    },

    /// Mutate an existing anchor. Unset fields are preserved.
    AnchorUpdate {
        /// Target anchor.
        anchor_id: String,
        /// New position, if changed.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        position: Option<Vec3>,
        /// New orientation, if changed.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        rotation: Option<Quat>,
        /// Replacement metadata, if changed.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        metadata: Option<BTreeMap<String, String>>,
        /// Server-side mutation time on rebroadcast.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp: Option<f64>,
    },

    /// Delete an anchor. Authorized for the creator or the host only.
    AnchorDelete {
        /// Target anchor.
        anchor_id: String,
        /// Server-side deletion time on rebroadcast.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp: Option<f64>,
    },

    /// Colocalization signal: host supplies the shared frame, any
    /// participant announces its own alignment status.
    ColocalizationData {
        /// Filled by the server on rebroadcast.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        user_id: Option<String>,
        /// The sender's local alignment status.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        colocalized: Option<bool>,
        /// Shared frame; only honored from the current host.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        coordinate_system: Option<CoordinateSystem>,
        /// Method that produced the frame.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        method: Option<ColocalizationMethod>,
    },

    /// Broadcast of the established shared frame.
    CoordinateSystem {
        /// The shared frame.
        coordinate_system: CoordinateSystem,
        /// Method that produced it.
        colocalization_method: ColocalizationMethod,
        /// Always true once broadcast.
        is_colocalized: bool,
        /// Unix seconds of establishment.
        timestamp: f64,
    },

    /// A participant joined the session.
    UserJoined {
        /// Joining participant.
        user_id: String,
        /// Display name.
        display_name: String,
        /// Whether the joiner holds host authority.
        is_host: bool,
        /// Whether the joiner is anonymous.
        is_anonymous: bool,
        /// Unix seconds of the join.
        timestamp: f64,
    },

    /// A participant left (or was evicted from) the session.
    UserLeft {
        /// Departing participant.
        user_id: String,
        /// Unix seconds of the departure.
        timestamp: f64,
    },

    /// Host authority moved to another participant.
    HostChanged {
        /// The new host.
        user_id: String,
        /// Unix seconds of the migration.
        timestamp: f64,
    },

    /// Chat relay.
    ChatMessage {
        /// Filled by the server on rebroadcast.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        user_id: Option<String>,
        /// Chat text.
        message: String,
        /// Server receive time on rebroadcast.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp: Option<f64>,
    },

    /// Keep-alive and latency probe.
    Ping {
        /// Sender's unix-seconds send time.
        timestamp: f64,
    },

    /// Reply to `ping`.
    Pong {
        /// Responder's unix-seconds send time.
        timestamp: f64,
        /// Echo of the ping's timestamp, for RTT measurement.
        client_timestamp: f64,
    },

    /// Full point-in-time session snapshot.
    ///
    /// Sent once to every participant on join, before any incremental
    /// deltas, so a joiner can never miss an update it raced with.
    SessionState {
        /// Session id.
        session_id: String,
        /// Shared frame, if established.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        coordinate_system: Option<CoordinateSystem>,
        /// Colocalization method tag.
        colocalization_method: ColocalizationMethod,
        /// Whether the shared frame is established.
        is_colocalized: bool,
        /// Current host, if any.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        host_id: Option<String>,
        /// Complete anchor set.
        anchors: BTreeMap<String, Anchor>,
        /// Complete roster.
        participants: BTreeMap<String, ParticipantInfo>,
        /// Unix seconds the snapshot was taken.
        timestamp: f64,
    },

    /// Terminal or advisory error surfaced to a client.
    Error {
        /// Stable machine-readable code.
        code: String,
        /// Human-readable description.
        message: String,
    },
}

impl Message {
    /// Encode to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode { reason: e.to_string() })
    }

    /// Decode from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decode`] for malformed JSON or an unknown
    /// `type` discriminator.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Decode { reason: e.to_string() })
    }

    /// Validate payload bounds for variants carrying spatial data.
    ///
    /// Called at the server boundary before a message touches session
    /// state. Variants without spatial payloads validate trivially.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] on out-of-range data.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Self::PoseUpdate { pose, .. } => pose.validate(),
            Self::AnchorCreate { position, rotation, metadata, .. } => {
                if !position.is_valid() || !rotation.is_valid() {
                    return Err(ProtocolError::InvalidPayload {
                        reason: "anchor transform out of bounds".to_string(),
                    });
                }
                if metadata.len() > crate::types::MAX_ANCHOR_METADATA_ENTRIES {
                    return Err(ProtocolError::InvalidPayload {
                        reason: "anchor metadata too large".to_string(),
                    });
                }
                Ok(())
            },
            Self::AnchorUpdate { anchor_id, position, rotation, metadata, .. } => {
                if anchor_id.is_empty() {
                    return Err(ProtocolError::InvalidPayload {
                        reason: "empty anchor id".to_string(),
                    });
                }
                if position.as_ref().is_some_and(|p| !p.is_valid())
                    || rotation.as_ref().is_some_and(|r| !r.is_valid())
                {
                    return Err(ProtocolError::InvalidPayload {
                        reason: "anchor transform out of bounds".to_string(),
                    });
                }
                if metadata
                    .as_ref()
                    .is_some_and(|m| m.len() > crate::types::MAX_ANCHOR_METADATA_ENTRIES)
                {
                    return Err(ProtocolError::InvalidPayload {
                        reason: "anchor metadata too large".to_string(),
                    });
                }
                Ok(())
            },
            Self::AnchorDelete { anchor_id, .. } => {
                if anchor_id.is_empty() {
                    return Err(ProtocolError::InvalidPayload {
                        reason: "empty anchor id".to_string(),
                    });
                }
                Ok(())
            },
            Self::ColocalizationData { coordinate_system, .. } => {
                coordinate_system.as_ref().map_or(Ok(()), CoordinateSystem::validate)
            },
            Self::ChatMessage { message, .. } => {
                if message.is_empty() || message.chars().count() > MAX_CHAT_LENGTH {
                    return Err(ProtocolError::InvalidPayload {
                        reason: "chat message empty or too long".to_string(),
                    });
                }
                Ok(())
            },
            _ => Ok(()),
        }
    }
}
