//! Client error types.

use locus_proto::ProtocolError;
use thiserror::Error;

/// Errors from client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Operation requires an established session.
    #[error("not connected")]
    NotConnected,

    /// Connect requested while a session is already active.
    #[error("already connected to session {session_id}")]
    AlreadyConnected {
        /// The active session.
        session_id: String,
    },

    /// Share code failed local format validation before dialing.
    #[error("invalid share code: {code}")]
    InvalidShareCode {
        /// The rejected input.
        code: String,
    },

    /// The server refused the session request.
    #[error("session rejected ({code}): {message}")]
    SessionRejected {
        /// Machine-readable error code from the server.
        code: String,
        /// Human-readable detail.
        message: String,
    },

    /// Reconnection attempts exhausted.
    #[error("connection failed after {attempts} attempts")]
    AttemptsExhausted {
        /// How many attempts were made.
        attempts: u32,
    },

    /// Wire encode/decode failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Client is in an invalid state for the operation.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Description of the state error.
        reason: String,
    },
}

impl ClientError {
    /// Returns true if this error is fatal (unrecoverable).
    ///
    /// Fatal errors indicate protocol violations or terminal rejections.
    /// Transient errors can be recovered by retrying once connected.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::SessionRejected { .. }
            | Self::AttemptsExhausted { .. }
            | Self::Protocol(_)
            | Self::InvalidState { .. } => true,

            Self::NotConnected | Self::AlreadyConnected { .. } | Self::InvalidShareCode { .. } => {
                false
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_is_transient() {
        assert!(!ClientError::NotConnected.is_fatal());
    }

    #[test]
    fn attempts_exhausted_is_fatal() {
        assert!(ClientError::AttemptsExhausted { attempts: 5 }.is_fatal());
    }

    #[test]
    fn error_display() {
        let err = ClientError::SessionRejected {
            code: "session_full".to_string(),
            message: "session is full".to_string(),
        };
        assert_eq!(err.to_string(), "session rejected (session_full): session is full");
    }
}
