//! Relay errors.

use crate::udp::protocol::RelayErrorCode;
use huddle_core::EngineError;
use std::io;

/// Errors raised by the relay layer
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Bind attempted while a listener exists or is being created
    #[error("relay listener already bound")]
    AlreadyBound,

    /// Operation needs a bound listener
    #[error("relay listener not bound")]
    NotBound,

    /// Relay service refused or failed the allocation
    #[error("relay allocation failed: {0}")]
    AllocationFailed(String),

    /// Joining a peer's allocation failed
    #[error("failed to join allocation {join_code}: {reason}")]
    JoinFailed {
        /// Join code that was dialed
        join_code: String,
        /// Failure description
        reason: String,
    },

    /// Frame shorter than the sender id prefix
    #[error("relay frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// Link is unknown to the driver
    #[error("unknown relay link {0}")]
    UnknownLink(u32),

    /// Driver has been closed
    #[error("relay driver closed")]
    Closed,

    /// Relay server reported an error
    #[error("relay server error {code:?}: {message}")]
    Server {
        /// Error code from the server
        code: RelayErrorCode,
        /// Server-provided description
        message: String,
    },

    /// No reply within the handshake timeout
    #[error("relay handshake timed out")]
    Timeout,

    /// Message could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Message could not be decoded
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Engine rejected a relay packet call
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl RelayError {
    /// Whether retrying the same operation later can succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RelayError::AllocationFailed(_)
                | RelayError::JoinFailed { .. }
                | RelayError::Timeout
                | RelayError::Io(_)
                | RelayError::Server {
                    code: RelayErrorCode::ServerFull | RelayErrorCode::AllocationFull,
                    ..
                }
        )
    }
}
