//! Relay node allocation for `node_relay` sessions.

use crate::error::AllocationError;
use async_trait::async_trait;
use huddle_core::AddressBookEntry;

/// Requests a relay node that joins the session as an extra member
///
/// Called at most once per `start_session` attempt, by the host only.
#[async_trait]
pub trait RelayAllocator: Send + Sync + 'static {
    /// Allocate a relay for a session whose members are `members`
    ///
    /// Returns the relay's address book entry.
    async fn allocate(
        &self,
        members: Vec<AddressBookEntry>,
    ) -> Result<AddressBookEntry, AllocationError>;
}

/// Allocator handing out a relay that is already running
#[derive(Debug, Clone)]
pub struct StaticRelayAllocator {
    entry: AddressBookEntry,
}

impl StaticRelayAllocator {
    /// Allocator that always returns `entry`, flagged as a relay
    #[must_use]
    pub fn new(entry: AddressBookEntry) -> Self {
        Self {
            entry: entry.into_relay(),
        }
    }
}

#[async_trait]
impl RelayAllocator for StaticRelayAllocator {
    async fn allocate(
        &self,
        members: Vec<AddressBookEntry>,
    ) -> Result<AddressBookEntry, AllocationError> {
        tracing::debug!(members = members.len(), "handing out static relay");
        Ok(self.entry.clone())
    }
}
