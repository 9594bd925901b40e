//! Wire protocol for the Locus shared-AR session engine.
//!
//! Defines the replication channel's message union and the geometric types
//! it carries. The protocol is JSON on the wire: every message is an object
//! with a `type` discriminator, decoded into the closed [`Message`] union.
//!
//! This crate is I/O-free. Transports and session logic live in
//! `locus-server` and `locus-core`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod message;
mod types;

pub use error::ProtocolError;
pub use message::{MAX_CHAT_LENGTH, Message, SessionInfo, UserRef};
pub use types::{
    Anchor, ColocalizationMethod, CoordinateSystem, MAX_ANCHOR_METADATA_ENTRIES, MAX_COORDINATE,
    ParticipantInfo, Pose, Quat, TrackingState, Vec3,
};
