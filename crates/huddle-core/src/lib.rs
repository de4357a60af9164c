//! # Huddle Core
//!
//! Data model shared by the Huddle session bootstrap crates.
//!
//! This crate provides:
//! - Peer identities and the numeric [`ClientId`] derived from them
//! - [`SyntheticAddress`], a socket-address-shaped value that can carry a
//!   client id for relay-routed peers
//! - The [`AddressBook`] accumulated from lobby entries until quorum
//! - The [`ConsensusEngine`] boundary and its result codes
//! - [`TransportConfig`]
//!
//! ## Addressing
//!
//! ```text
//! Direct peer    ->  192.168.1.20:4242                    (real socket address)
//! Relayed peer   ->  [fd54:6173:6869:0:<client id>]:26471 (synthetic address)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod address_book;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod sockaddr;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use address_book::{AddressBook, AddressBookEntry, JoinCode};
pub use config::{NetworkMode, TransportConfig};
pub use engine::{ConsensusEngine, ConsensusEvent, EngineNetworkMode, EngineResultCode};
pub use error::{
    AddressBookError, AddressError, ConfigError, EngineError, EntryError, EventError,
    IdentityError,
};
pub use identity::{ClientId, PeerIdentity, SecretKey};
pub use sockaddr::{AddressFamily, Endpoint, SyntheticAddress};

/// Bootstrap greeting sent once a session starts
pub const GREETING: &[u8] = b"Hi";

/// Length of the big-endian client id prefixing relay frames and application payloads
pub const CLIENT_ID_PREFIX_LEN: usize = 8;
