//! # Reference UDP relay
//!
//! A small allocation relay so sessions can run without a hosted relay
//! service. A host allocates a slot group and receives a join code; peers
//! join with the code and exchange datagrams with the host through the
//! server.
//!
//! ```text
//!   host ── Allocate ──►┐                 ┌◄── Join(code) ── peer
//!   host ◄─ Allocated ──┤  relay server   ├─── Joined ─────► peer
//!   host ◄─ PeerJoined ─┘                 └
//!   host ◄─ Deliver(link) ◄── SendTo(HOST_LINK) ── peer
//!   host ── SendTo(link) ──► Deliver(HOST_LINK) ──► peer
//! ```

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{UdpDriver, UdpRelayService};
pub use protocol::{AllocationId, RelayErrorCode, RelayMessage};
pub use server::{RelayServerConfig, UdpRelayServer};

use std::time::Duration;

/// Largest datagram the relay handles
pub const MAX_DATAGRAM: usize = 65536;

/// Idle interval after which a driver sends a keepalive
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// How long a client waits for the server's handshake reply
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
