//! # Huddle Relay
//!
//! Relay plumbing for peers that cannot reach each other directly.
//!
//! This crate provides:
//! - The [`RelayService`] / [`RelayDriver`] seam to a relay provider
//! - Frame encoding with the sender's client id
//! - [`RelayMultiplexer`], one logical channel per peer over relay allocations
//! - A reference UDP relay server and client ([`udp`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod framing;
pub mod multiplexer;
pub mod service;
pub mod udp;

pub use error::RelayError;
pub use framing::{decode_frame, encode_frame};
pub use multiplexer::{
    ConnectionStatus, MultiplexerStats, RelayConnection, RelayMultiplexer, RelayNotice,
};
pub use service::{DriverEvent, HOST_LINK, HostAllocation, LinkId, RelayDriver, RelayService};
pub use udp::{UdpRelayServer, UdpRelayService};
