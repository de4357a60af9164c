//! Relay service abstraction.
//!
//! A relay service hands out allocations. The host of an allocation gets a
//! join code and a driver for the allocation socket; peers dial the join code
//! and get a driver of their own. Drivers are polled from the tick thread and
//! never block.

use crate::error::RelayError;
use async_trait::async_trait;
use huddle_core::JoinCode;

/// Logical link within one allocation
pub type LinkId = u32;

/// Link under which an allocation member reaches the allocation host
pub const HOST_LINK: LinkId = 0;

/// Something that happened on a driver's socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// Link finished its rendezvous and accepts data
    Connected(LinkId),
    /// Datagram received on a link
    Data(LinkId, Vec<u8>),
    /// Link went away
    Disconnected(LinkId),
}

/// Non-blocking socket bound to one allocation
pub trait RelayDriver: Send {
    /// Next pending event, or `None` if nothing is ready
    fn poll_event(&mut self) -> Result<Option<DriverEvent>, RelayError>;

    /// Send a datagram on `link`
    fn send(&mut self, link: LinkId, payload: &[u8]) -> Result<(), RelayError>;

    /// Leave the allocation; later calls fail with [`RelayError::Closed`]
    fn close(&mut self);
}

/// Result of creating an allocation
pub struct HostAllocation {
    /// Code peers use to join
    pub join_code: JoinCode,
    /// Driver for the allocation socket
    pub driver: Box<dyn RelayDriver>,
}

impl std::fmt::Debug for HostAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostAllocation")
            .field("join_code", &self.join_code)
            .finish_non_exhaustive()
    }
}

/// Third-party relay reachable from every peer
#[async_trait]
pub trait RelayService: Send + Sync + 'static {
    /// Create an allocation with room for `capacity` participants, host included
    async fn create_allocation(&self, capacity: usize) -> Result<HostAllocation, RelayError>;

    /// Join the allocation behind `join_code`
    async fn join_allocation(&self, join_code: &JoinCode)
    -> Result<Box<dyn RelayDriver>, RelayError>;
}
