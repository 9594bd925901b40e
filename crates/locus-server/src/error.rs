//! Server error types.

use std::fmt;

/// Errors that can occur in the server runtime.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error
    Config(String),

    /// Transport/network error
    Transport(String),

    /// Protocol error
    Protocol(String),

    /// Internal error
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ServerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<locus_proto::ProtocolError> for ServerError {
    fn from(err: locus_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}
