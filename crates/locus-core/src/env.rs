//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples session logic from system resources
//! (time, randomness). This enables:
//!
//! - Deterministic simulation: the harness provides a virtual clock and a
//!   seeded RNG, allowing perfect bug reproduction.
//!
//! - Production runtime: the server implementation uses real system time and
//!   OS entropy without any code changes to the session logic.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: implementations must not share global state

use std::time::{Duration, Instant};

/// Abstract environment providing time and randomness.
///
/// Session logic is written exclusively against this trait, which keeps the
/// state machines deterministic and testable.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current monotonic time.
    ///
    /// Used for all ordering and expiry decisions (join order, TTLs,
    /// inactivity windows). MUST never go backwards within one execution
    /// context.
    fn now(&self) -> Instant;

    /// Returns the current wall-clock time as unix seconds.
    ///
    /// Only used for timestamps embedded in wire messages; never for
    /// ordering or expiry logic.
    fn unix_time(&self) -> f64;

    /// Sleeps for the specified duration.
    ///
    /// This is the only async method in the trait, and it should only be
    /// used by driver code (not session logic).
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// Production implementations use OS entropy (`getrandom`); simulation
    /// implementations use a seeded RNG and log the seed for
    /// reproducibility.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Convenience for identifier generation.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a random `u128`.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }
}
