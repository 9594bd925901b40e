//! Deterministic testing harness for the Locus session engine.
//!
//! Provides a seedable [`SimEnv`] implementing the `Environment` trait with
//! virtual time and deterministic randomness.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation for model-based
//! testing. Operations are applied to both the model and the real server
//! driver, and their observable states are compared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod sim_env;

pub use model::{
    ANCHOR_SLOTS, ClientId, ModelWorld, ObservableState, Operation, OperationError,
    OperationResult,
};
pub use sim_env::SimEnv;
