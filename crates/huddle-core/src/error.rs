//! Error types for the Huddle core data model.

use crate::engine::EngineResultCode;
use crate::identity::PeerIdentity;
use thiserror::Error;

/// Synthetic address encoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Address family is neither IPv4 nor IPv6
    #[error("unsupported address family: {0}")]
    UnsupportedAddressFamily(u16),

    /// Raw address bytes do not match the family's length
    #[error("invalid address length for family {family}: expected {expected}, got {actual}")]
    InvalidLength {
        /// Wire value of the address family
        family: u16,
        /// Expected byte count
        expected: usize,
        /// Actual byte count
        actual: usize,
    },
}

/// Peer identity errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// DER encoding has the wrong length
    #[error("key DER must be {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required length
        expected: usize,
        /// Provided length
        actual: usize,
    },

    /// Textual encoding could not be decoded
    #[error("invalid public key encoding: {0}")]
    InvalidEncoding(String),
}

/// Address book errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressBookError {
    /// A second identity was marked as the session host
    #[error("host already set to {existing:?}, refusing to mark {rejected:?}")]
    DuplicateHost {
        /// Identity already holding the host flag
        existing: PeerIdentity,
        /// Identity that tried to claim it
        rejected: PeerIdentity,
    },

    /// Two distinct identities derive the same client id
    #[error("client id {0} is already taken by another identity")]
    ClientIdCollision(crate::identity::ClientId),

    /// Direct entry without a bound port
    #[error("direct entry for {0} has no bound port")]
    UnboundPort(std::net::IpAddr),

    /// The book has been committed to the engine
    #[error("address book is frozen")]
    Frozen,
}

/// Address book entry (de)serialization errors
#[derive(Debug, Error)]
pub enum EntryError {
    /// Peer-supplied entry could not be parsed
    #[error("malformed address book entry: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Engine event decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Event carries no creator
    #[error("event has no creator")]
    CreatorMissing,

    /// Creator identity is malformed
    #[error("invalid event creator: {0}")]
    InvalidCreator(#[from] IdentityError),

    /// Packed transactions are cut short
    #[error("packed transactions truncated")]
    Truncated,
}

/// Failure reported by the consensus engine collaborator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("engine call `{call}` failed: {code:?}")]
pub struct EngineError {
    /// Name of the engine call that failed
    pub call: &'static str,
    /// Result code returned by the engine
    pub code: EngineResultCode,
}

impl EngineError {
    /// Create an engine error for `call`
    #[must_use]
    pub const fn new(call: &'static str, code: EngineResultCode) -> Self {
        Self { call, code }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration values are inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
