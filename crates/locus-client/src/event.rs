//! Client events and actions.
//!
//! The agent is driven entirely by [`ClientEvent`]s and answers with
//! [`ClientAction`]s. The caller owns the socket: it dials when told to,
//! writes what it is handed, and feeds back whatever arrives.

use std::{collections::BTreeMap, time::Duration};

use locus_proto::{ColocalizationMethod, CoordinateSystem, Message, Pose, Quat, Vec3};

/// Events fed into the client agent.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Start a new session once the transport is up.
    CreateSession {
        /// Optional display name; the server mints one otherwise.
        display_name: Option<String>,
        /// Intended colocalization method.
        method: ColocalizationMethod,
        /// Requested participant cap.
        max_players: Option<u32>,
    },

    /// Join an existing session by share code.
    JoinSession {
        /// Share code as entered by the user.
        code: String,
        /// Optional display name.
        display_name: Option<String>,
    },

    /// The transport the agent asked for is now open.
    TransportConnected,

    /// The transport dropped.
    TransportClosed {
        /// Close reason, if the transport knows one.
        reason: String,
    },

    /// A decoded message arrived from the server.
    MessageReceived(Message),

    /// A fresh local pose sample from the tracking system.
    LocalPose {
        /// The sampled pose.
        pose: Pose,
    },

    /// Place a shared anchor.
    CreateAnchor {
        /// Anchor position in the shared frame.
        position: Vec3,
        /// Anchor orientation.
        rotation: Quat,
        /// Opaque key/value payload.
        metadata: BTreeMap<String, String>,
    },

    /// Move or relabel an existing anchor.
    UpdateAnchor {
        /// Target anchor.
        anchor_id: String,
        /// New position, if changed.
        position: Option<Vec3>,
        /// New orientation, if changed.
        rotation: Option<Quat>,
        /// New metadata, if changed.
        metadata: Option<BTreeMap<String, String>>,
    },

    /// Remove an anchor.
    DeleteAnchor {
        /// Target anchor.
        anchor_id: String,
    },

    /// Announce local alignment to the shared frame.
    SetColocalized {
        /// Whether this device is now aligned.
        colocalized: bool,
    },

    /// Establish the shared coordinate frame (host only).
    SetCoordinateSystem {
        /// The shared frame.
        coordinate_system: CoordinateSystem,
        /// Method used to establish it.
        method: ColocalizationMethod,
    },

    /// Send a chat line.
    Chat {
        /// Message text.
        message: String,
    },

    /// Periodic timer; drives ping cadence and staleness checks.
    Tick,
}

/// Actions produced by the client agent for the caller to execute.
#[derive(Debug, Clone)]
pub enum ClientAction {
    /// Open a transport connection after the given delay.
    Dial {
        /// Backoff before dialing.
        delay: Duration,
    },

    /// Encode and write a message to the transport.
    Send(Message),

    /// A session is now active.
    SessionEstablished {
        /// Server-assigned session id.
        session_id: String,
        /// Share code to hand to peers.
        share_code: String,
        /// Our participant id.
        user_id: String,
    },

    /// Deliver a peer chat line to the application.
    DeliverChat {
        /// Sender.
        user_id: String,
        /// Message text.
        message: String,
    },

    /// The session ended and will not resume.
    Terminated {
        /// Why it ended.
        reason: String,
    },

    /// Diagnostic for the caller's logging layer.
    Log {
        /// Log line.
        message: String,
    },
}
