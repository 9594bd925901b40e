//! Protocol error types.

use thiserror::Error;

/// Errors from encoding, decoding, or validating wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message could not be decoded.
    ///
    /// Covers malformed JSON and unknown `type` discriminators. Unknown
    /// kinds are rejected rather than silently ignored so a misbehaving
    /// peer is detected at the protocol boundary.
    #[error("decode error: {reason}")]
    Decode {
        /// Description of the decode failure.
        reason: String,
    },

    /// Message could not be encoded.
    #[error("encode error: {reason}")]
    Encode {
        /// Description of the encode failure.
        reason: String,
    },

    /// Payload decoded but failed semantic validation.
    #[error("invalid payload: {reason}")]
    InvalidPayload {
        /// Description of the violated bound.
        reason: String,
    },
}
