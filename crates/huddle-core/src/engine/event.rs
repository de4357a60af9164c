//! Ordered events produced by the consensus engine.

use crate::error::EventError;
use crate::identity::PeerIdentity;

/// Length prefix of each packed transaction
const TX_LEN_PREFIX: usize = 4;

/// One ordered event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusEvent {
    /// Identity that created the event
    pub creator: PeerIdentity,
    /// Creation time, nanoseconds since the Unix epoch
    pub timestamp_created: u64,
    /// Time the local engine received it, nanoseconds since the Unix epoch
    pub timestamp_received: u64,
    /// Opaque transactions in order
    pub transactions: Vec<Vec<u8>>,
}

impl ConsensusEvent {
    /// Decode an event from the engine's packed representation
    ///
    /// `packed` holds each transaction behind a 4-byte little-endian length.
    ///
    /// # Errors
    ///
    /// Fails when the creator is missing or malformed, or when a transaction
    /// length runs past the end of `packed`.
    pub fn from_packed(
        creator_der: &[u8],
        timestamp_created: u64,
        timestamp_received: u64,
        packed: &[u8],
    ) -> Result<Self, EventError> {
        if creator_der.is_empty() {
            return Err(EventError::CreatorMissing);
        }
        let creator = PeerIdentity::from_der(creator_der)?;
        Ok(Self {
            creator,
            timestamp_created,
            timestamp_received,
            transactions: unpack_transactions(packed)?,
        })
    }
}

/// Split length-prefixed transactions
///
/// # Errors
///
/// Returns [`EventError::Truncated`] if a prefix or body is cut short.
pub fn unpack_transactions(mut packed: &[u8]) -> Result<Vec<Vec<u8>>, EventError> {
    let mut out = Vec::new();
    while !packed.is_empty() {
        if packed.len() < TX_LEN_PREFIX {
            return Err(EventError::Truncated);
        }
        let (prefix, rest) = packed.split_at(TX_LEN_PREFIX);
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if rest.len() < len {
            return Err(EventError::Truncated);
        }
        let (tx, rest) = rest.split_at(len);
        out.push(tx.to_vec());
        packed = rest;
    }
    Ok(out)
}
