//! Locus Core
//!
//! Authoritative session state for real-time AR synchronization: the share
//! code registry, the per-session state machine, and the membership rules
//! that keep exactly one host per session.
//!
//! # Architecture
//!
//! Everything in this crate is a pure state machine. Operations take inputs
//! and return [`SessionAction`]s for a driver to execute; no I/O happens
//! here. Time and randomness come through the [`Environment`] trait, so
//! every behavior is reproducible under a simulated clock and seeded RNG.
//!
//! # Components
//!
//! - [`SessionRegistry`]: share code allocation and TTL-based expiry
//! - [`Session`]: per-session participants, anchors, coordinate frame
//! - [`membership::select_host`]: the single host migration rule
//! - [`ident`]: id minting (session, participant, anchor, display name)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
pub mod error;
pub mod ident;
pub mod membership;
pub mod registry;
pub mod session;

pub use env::Environment;
pub use error::{RegistryError, SessionError};
pub use ident::{ParticipantId, SessionId};
pub use membership::{InactivityPolicy, Participant, select_host};
pub use registry::{RegistryConfig, SessionRegistry, ShareCode};
pub use session::{
    MAX_PARTICIPANT_CAP, NewParticipant, Session, SessionAction, SessionConfig, SessionPhase,
};
