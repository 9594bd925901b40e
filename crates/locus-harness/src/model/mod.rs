//! Reference model for model-based testing.
//!
//! The model is a simplified implementation that captures the session rules
//! without connections, wire encoding, or timers. It serves as the oracle
//! against which the real driver is verified.
//!
//! # Design Principles
//!
//! - Simplicity: The model should be obviously correct
//! - Rules not mechanism: Captures WHAT, not HOW
//! - Deterministic: Same inputs produce same outputs

pub mod operation;
mod world;

pub use operation::{ANCHOR_SLOTS, ClientId, Operation, OperationError, OperationResult};
pub use world::{ModelWorld, ObservableState};
