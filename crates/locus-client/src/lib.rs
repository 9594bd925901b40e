//! Locus Client
//!
//! Action-based reconciliation agent for the Locus protocol. Mirrors
//! authoritative session state locally, throttles outbound poses, smooths
//! remote motion, and survives transport loss.
//!
//! # Architecture
//!
//! The client is a pure state machine that:
//! - Receives events from the caller (decoded messages, pose samples, ticks)
//! - Produces actions for the caller to execute (dial, send, deliver)
//! - Uses the `Environment` trait for time and randomness (deterministic
//!   testing)
//!
//! # Components
//!
//! - [`Client`]: Top-level state machine managing the session mirror
//! - [`PoseFilter`]: interval + dead-zone gate on outbound poses
//! - [`QualityMonitor`] / [`AdaptiveRate`]: RTT-driven rate control
//! - [`PoseHistory`]: remote pose extrapolation
//! - [`ClientEvent`]: Events fed into the client
//! - [`ClientAction`]: Actions produced by the client

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod event;
mod pose_filter;
mod prediction;
mod quality;

pub use client::{Client, ConnectionState, ReconcilerConfig, SessionHandle};
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent};
pub use locus_core::Environment;
pub use pose_filter::{PoseFilter, PoseFilterConfig};
pub use prediction::{PoseHistory, PredictionConfig};
pub use quality::{AdaptiveRate, LinkQuality, QualityMonitor};
