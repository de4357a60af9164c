//! Wire messages of the reference UDP relay.

use crate::error::RelayError;
use crate::service::LinkId;
use serde::{Deserialize, Serialize};

/// Relay allocation identifier
pub type AllocationId = u64;

/// Messages exchanged between relay clients and the relay server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelayMessage {
    /// Host asks for a new allocation
    Allocate {
        /// Participants including the host
        capacity: u16,
    },

    /// Server created the allocation
    Allocated {
        /// Allocation identifier
        allocation_id: AllocationId,
        /// Code peers use to join
        join_code: String,
    },

    /// Peer asks to join an allocation
    Join {
        /// Join code handed out by the host
        join_code: String,
    },

    /// Server admitted the peer
    Joined {
        /// Allocation identifier
        allocation_id: AllocationId,
        /// Link the peer was assigned
        link: LinkId,
    },

    /// A peer joined the host's allocation
    PeerJoined {
        /// Link of the new peer
        link: LinkId,
    },

    /// A participant left the allocation
    PeerLeft {
        /// Link of the participant that left
        link: LinkId,
    },

    /// Client sends a datagram to another participant
    SendTo {
        /// Destination link
        link: LinkId,
        /// Opaque payload
        payload: Vec<u8>,
    },

    /// Server delivers a datagram
    Deliver {
        /// Source link
        link: LinkId,
        /// Opaque payload
        payload: Vec<u8>,
    },

    /// Client leaves its allocation
    Leave,

    /// Keepalive (no payload)
    Keepalive,

    /// Server error response
    Error {
        /// Error code
        code: RelayErrorCode,
        /// Human-readable error message
        message: String,
    },
}

/// Relay server error codes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelayErrorCode {
    /// Sender is neither host nor member of an allocation
    NotRegistered = 1,
    /// Join code does not name a live allocation
    UnknownJoinCode = 2,
    /// Allocation has no free slot
    AllocationFull = 3,
    /// Server cannot hold more allocations
    ServerFull = 4,
    /// Destination link is not part of the allocation
    UnknownLink = 5,
    /// Message could not be decoded
    InvalidMessage = 6,
}

impl RelayMessage {
    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, RelayError> {
        bincode::serialize(self).map_err(|e| RelayError::Serialization(e.to_string()))
    }

    /// Deserialize message from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RelayError> {
        bincode::deserialize(bytes).map_err(|e| RelayError::Deserialization(e.to_string()))
    }

    /// Get the message type name
    pub fn message_type(&self) -> &'static str {
        match self {
            RelayMessage::Allocate { .. } => "Allocate",
            RelayMessage::Allocated { .. } => "Allocated",
            RelayMessage::Join { .. } => "Join",
            RelayMessage::Joined { .. } => "Joined",
            RelayMessage::PeerJoined { .. } => "PeerJoined",
            RelayMessage::PeerLeft { .. } => "PeerLeft",
            RelayMessage::SendTo { .. } => "SendTo",
            RelayMessage::Deliver { .. } => "Deliver",
            RelayMessage::Leave => "Leave",
            RelayMessage::Keepalive => "Keepalive",
            RelayMessage::Error { .. } => "Error",
        }
    }
}
