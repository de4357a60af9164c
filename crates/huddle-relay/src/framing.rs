//! Relay frame: 8-byte big-endian sender client id, then the engine packet.

use crate::error::RelayError;
use huddle_core::{CLIENT_ID_PREFIX_LEN, ClientId};

/// Prefix `payload` with the sender's client id
#[must_use]
pub fn encode_frame(sender: ClientId, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(CLIENT_ID_PREFIX_LEN + payload.len());
    frame.extend_from_slice(&sender.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Split a frame into sender id and payload
///
/// # Errors
///
/// Returns [`RelayError::FrameTooShort`] if the id prefix is incomplete.
pub fn decode_frame(frame: &[u8]) -> Result<(ClientId, &[u8]), RelayError> {
    if frame.len() < CLIENT_ID_PREFIX_LEN {
        return Err(RelayError::FrameTooShort(frame.len()));
    }
    let (id, payload) = frame.split_at(CLIENT_ID_PREFIX_LEN);
    let mut bytes = [0u8; CLIENT_ID_PREFIX_LEN];
    bytes.copy_from_slice(id);
    Ok((ClientId::from_be_bytes(bytes), payload))
}
