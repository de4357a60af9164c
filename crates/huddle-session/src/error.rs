//! Error types for session bootstrap.

use crate::session::SessionState;
use huddle_core::{AddressBookError, EngineError, EntryError};
use huddle_relay::RelayError;
use thiserror::Error;

/// Session state machine errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Address book rejected an entry in a way that breaks the session
    #[error("address book error: {0}")]
    AddressBook(#[from] AddressBookError),

    /// Operation not allowed in the current state
    #[error("operation not allowed in state {0:?}")]
    InvalidState(SessionState),

    /// Relay allocation request failed
    #[error("relay allocation failed: {0}")]
    RelayAllocationFailed(String),

    /// Relay allocation is required but no allocator was configured
    #[error("network mode requires a relay allocator")]
    MissingAllocator,

    /// Consensus engine returned a failure
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl SessionError {
    /// Whether calling `start_session` again may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RelayAllocationFailed(_) | Self::Engine(_))
    }
}

/// Failure reported by a [`RelayAllocator`](crate::RelayAllocator)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct AllocationError(pub String);

/// Lobby collaborator errors
#[derive(Debug, Error)]
pub enum LobbyError {
    /// Player is not a member of the lobby
    #[error("unknown player: {0}")]
    UnknownPlayer(String),

    /// Lobby service could not be reached
    #[error("lobby unavailable: {0}")]
    Unavailable(String),

    /// Local entry could not be serialized
    #[error(transparent)]
    Entry(#[from] EntryError),
}

/// Peer transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// `start_host` or `start_client` was already called
    #[error("transport already started")]
    AlreadyStarted,

    /// Transport has not been started
    #[error("transport not started")]
    NotStarted,

    /// Session is not running yet
    #[error("session not in progress")]
    SessionNotInProgress,

    /// Network mode needs a relay service
    #[error("network mode requires a relay service")]
    MissingRelayService,

    /// Session setup failed
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Relay multiplexer failed
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Consensus engine failed
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Lobby exchange failed
    #[error(transparent)]
    Lobby(#[from] LobbyError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::EngineResultCode;

    #[test]
    fn test_retryable() {
        assert!(SessionError::RelayAllocationFailed("timeout".into()).is_retryable());
        assert!(
            SessionError::Engine(EngineError::new("tce_start", EngineResultCode::NotInitialized))
                .is_retryable()
        );
        assert!(!SessionError::AddressBook(AddressBookError::Frozen).is_retryable());
        assert!(!SessionError::MissingAllocator.is_retryable());
    }
}
