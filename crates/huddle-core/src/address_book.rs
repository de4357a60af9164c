//! Address book: who is in the session and how to reach them.
//!
//! Entries arrive from the lobby in no particular order and are accumulated
//! until the configured node count is reached. Once committed to the engine
//! the book is frozen.

use crate::error::{AddressBookError, EntryError};
use crate::identity::PeerIdentity;
use crate::sockaddr::SyntheticAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Relay join code handed out by an allocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JoinCode(String);

impl JoinCode {
    /// Wrap a join code string
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The code as text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JoinCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How to reach one peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AddressBookEntry {
    /// Reachable at a real IP address and port
    Direct {
        /// IP address
        address: IpAddr,
        /// Bound port
        port: u16,
        /// Peer public key
        identity: PeerIdentity,
        /// Entry describes a relay node rather than a player
        #[serde(default)]
        is_relay: bool,
    },
    /// Reachable by joining a relay allocation
    External {
        /// Join code of the peer's allocation
        join_code: JoinCode,
        /// Peer public key
        identity: PeerIdentity,
        /// Entry describes a relay node rather than a player
        #[serde(default)]
        is_relay: bool,
    },
}

impl AddressBookEntry {
    /// Direct entry for a bound socket address
    #[must_use]
    pub fn direct(addr: SocketAddr, identity: PeerIdentity) -> Self {
        AddressBookEntry::Direct {
            address: addr.ip(),
            port: addr.port(),
            identity,
            is_relay: false,
        }
    }

    /// External entry for a relay join code
    #[must_use]
    pub fn external(join_code: JoinCode, identity: PeerIdentity) -> Self {
        AddressBookEntry::External {
            join_code,
            identity,
            is_relay: false,
        }
    }

    /// Mark this entry as describing a relay node
    #[must_use]
    pub fn into_relay(mut self) -> Self {
        match &mut self {
            AddressBookEntry::Direct { is_relay, .. }
            | AddressBookEntry::External { is_relay, .. } => *is_relay = true,
        }
        self
    }

    /// Peer public key
    #[must_use]
    pub fn identity(&self) -> &PeerIdentity {
        match self {
            AddressBookEntry::Direct { identity, .. }
            | AddressBookEntry::External { identity, .. } => identity,
        }
    }

    /// Whether the entry describes a relay node
    #[must_use]
    pub fn is_relay(&self) -> bool {
        match self {
            AddressBookEntry::Direct { is_relay, .. }
            | AddressBookEntry::External { is_relay, .. } => *is_relay,
        }
    }

    /// Socket address of a direct entry
    #[must_use]
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            AddressBookEntry::Direct { address, port, .. } => Some(SocketAddr::new(*address, *port)),
            AddressBookEntry::External { .. } => None,
        }
    }

    /// Join code of an external entry
    #[must_use]
    pub fn join_code(&self) -> Option<&JoinCode> {
        match self {
            AddressBookEntry::Direct { .. } => None,
            AddressBookEntry::External { join_code, .. } => Some(join_code),
        }
    }

    /// Address under which the engine knows this peer
    ///
    /// Direct peers are addressed by their real socket address, external
    /// peers by the synthetic address carrying their client id.
    #[must_use]
    pub fn engine_address(&self) -> SyntheticAddress {
        match self {
            AddressBookEntry::Direct { address, port, .. } => {
                SyntheticAddress::from_socket_addr(SocketAddr::new(*address, *port))
            }
            AddressBookEntry::External { identity, .. } => identity.synthetic_address(),
        }
    }

    /// Serialize into the lobby wire form (JSON)
    ///
    /// # Errors
    ///
    /// Only fails if serde_json itself fails, which it does not for this type.
    pub fn to_json(&self) -> Result<String, EntryError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the lobby wire form
    ///
    /// # Errors
    ///
    /// Returns [`EntryError::Malformed`] for anything that is not a valid entry.
    pub fn from_json(text: &str) -> Result<Self, EntryError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Ordered, deduplicated set of entries with at most one host
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    entries: Vec<AddressBookEntry>,
    host: Option<PeerIdentity>,
    frozen: bool,
}

impl AddressBook {
    /// Empty book
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an entry
    ///
    /// Returns `Ok(true)` if the entry was appended and `Ok(false)` if an equal
    /// entry was already present.
    ///
    /// # Errors
    ///
    /// - [`AddressBookError::DuplicateHost`] when `is_host` names a second host
    /// - [`AddressBookError::UnboundPort`] for a direct entry with port 0
    /// - [`AddressBookError::ClientIdCollision`] when another identity already
    ///   owns the same client id
    /// - [`AddressBookError::Frozen`] for new entries after [`AddressBook::freeze`]
    pub fn add(&mut self, entry: AddressBookEntry, is_host: bool) -> Result<bool, AddressBookError> {
        if self.entries.contains(&entry) {
            if is_host {
                self.mark_host(entry.identity())?;
            }
            return Ok(false);
        }

        if self.frozen {
            return Err(AddressBookError::Frozen);
        }

        if let AddressBookEntry::Direct { address, port: 0, .. } = &entry {
            return Err(AddressBookError::UnboundPort(*address));
        }

        let id = entry.identity().client_id();
        if self
            .entries
            .iter()
            .any(|e| e.identity() != entry.identity() && e.identity().client_id() == id)
        {
            return Err(AddressBookError::ClientIdCollision(id));
        }

        if is_host {
            self.mark_host(entry.identity())?;
        }

        tracing::trace!(client_id = %id, is_host, "address book entry added");
        self.entries.push(entry);
        Ok(true)
    }

    fn mark_host(&mut self, identity: &PeerIdentity) -> Result<(), AddressBookError> {
        match &self.host {
            Some(existing) if existing != identity => Err(AddressBookError::DuplicateHost {
                existing: existing.clone(),
                rejected: identity.clone(),
            }),
            _ => {
                self.host = Some(identity.clone());
                Ok(())
            }
        }
    }

    /// Number of distinct entries
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Whether exactly `total` entries are known
    #[must_use]
    pub fn is_quorum_reached(&self, total: usize) -> bool {
        self.count() == total
    }

    /// Entries in arrival order
    #[must_use]
    pub fn entries(&self) -> &[AddressBookEntry] {
        &self.entries
    }

    /// Iterate entries in arrival order
    pub fn iter(&self) -> impl Iterator<Item = &AddressBookEntry> {
        self.entries.iter()
    }

    /// Identity marked as session host
    #[must_use]
    pub fn host(&self) -> Option<&PeerIdentity> {
        self.host.as_ref()
    }

    /// First entry flagged as a relay node
    #[must_use]
    pub fn relay_entry(&self) -> Option<&AddressBookEntry> {
        self.entries.iter().find(|e| e.is_relay())
    }

    /// Whether any entry belongs to `identity`
    #[must_use]
    pub fn contains_identity(&self, identity: &PeerIdentity) -> bool {
        self.entries.iter().any(|e| e.identity() == identity)
    }

    /// Refuse further additions
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Whether the book has been committed
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Drop everything, including the freeze
    pub fn clear(&mut self) {
        self.entries.clear();
        self.host = None;
        self.frozen = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::RAW_POINT_LEN;

    fn identity(seed: u8) -> PeerIdentity {
        PeerIdentity::from_raw_point(&[seed; RAW_POINT_LEN])
    }

    fn direct(seed: u8, port: u16) -> AddressBookEntry {
        AddressBookEntry::direct(SocketAddr::from(([127, 0, 0, 1], port)), identity(seed))
    }

    #[test]
    fn test_add_duplicate_is_noop() {
        let mut book = AddressBook::new();
        assert!(book.add(direct(1, 4000), false).unwrap());
        assert!(!book.add(direct(1, 4000), false).unwrap());
        assert_eq!(book.count(), 1);
    }

    #[test]
    fn test_second_host_rejected() {
        let mut book = AddressBook::new();
        book.add(direct(1, 4000), true).unwrap();
        let err = book.add(direct(2, 4001), true).unwrap_err();
        assert!(matches!(err, AddressBookError::DuplicateHost { .. }));
        assert_eq!(book.count(), 1);
        assert_eq!(book.host(), Some(&identity(1)));
    }

    #[test]
    fn test_same_host_remark_allowed() {
        let mut book = AddressBook::new();
        book.add(direct(1, 4000), true).unwrap();
        assert!(!book.add(direct(1, 4000), true).unwrap());
        assert_eq!(book.host(), Some(&identity(1)));
    }

    #[test]
    fn test_existing_entry_can_be_promoted_to_host() {
        let mut book = AddressBook::new();
        book.add(direct(3, 4000), false).unwrap();
        book.add(direct(3, 4000), true).unwrap();
        assert_eq!(book.host(), Some(&identity(3)));
    }

    #[test]
    fn test_unbound_port_rejected() {
        let mut book = AddressBook::new();
        assert!(matches!(
            book.add(direct(1, 0), false),
            Err(AddressBookError::UnboundPort(_))
        ));
        assert_eq!(book.count(), 0);
    }

    #[test]
    fn test_client_id_collision() {
        let mut a = [9u8; RAW_POINT_LEN];
        let mut b = [9u8; RAW_POINT_LEN];
        a[63] = 1;
        b[63] = 2;
        let mut book = AddressBook::new();
        book.add(
            AddressBookEntry::external(JoinCode::new("A"), PeerIdentity::from_raw_point(&a)),
            false,
        )
        .unwrap();
        let err = book
            .add(
                AddressBookEntry::external(JoinCode::new("B"), PeerIdentity::from_raw_point(&b)),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, AddressBookError::ClientIdCollision(_)));
    }

    #[test]
    fn test_quorum() {
        let mut book = AddressBook::new();
        book.add(direct(1, 4000), true).unwrap();
        assert!(!book.is_quorum_reached(2));
        book.add(direct(2, 4001), false).unwrap();
        assert!(book.is_quorum_reached(2));
        assert!(!book.is_quorum_reached(3));
    }

    #[test]
    fn test_frozen_refuses_new_entries() {
        let mut book = AddressBook::new();
        book.add(direct(1, 4000), false).unwrap();
        book.freeze();
        assert!(!book.add(direct(1, 4000), false).unwrap());
        assert_eq!(book.add(direct(2, 4001), false), Err(AddressBookError::Frozen));
        book.clear();
        assert!(!book.is_frozen());
        assert_eq!(book.count(), 0);
    }

    #[test]
    fn test_relay_entry_lookup() {
        let mut book = AddressBook::new();
        book.add(direct(1, 4000), true).unwrap();
        book.add(direct(5, 7000).into_relay(), false).unwrap();
        assert_eq!(book.relay_entry().map(AddressBookEntry::identity), Some(&identity(5)));
    }

    #[test]
    fn test_entry_json_shape() {
        let entry = AddressBookEntry::external(JoinCode::new("XYZ123"), identity(4));
        let json: serde_json::Value = serde_json::from_str(&entry.to_json().unwrap()).unwrap();
        assert_eq!(json["kind"], "external");
        assert_eq!(json["join_code"], "XYZ123");
        assert_eq!(json["is_relay"], false);
        assert_eq!(json["identity"], identity(4).to_base64());
    }

    #[test]
    fn test_entry_roundtrip() {
        for entry in [
            direct(1, 4000),
            direct(2, 5000).into_relay(),
            AddressBookEntry::external(JoinCode::new("J"), identity(3)),
        ] {
            let text = entry.to_json().unwrap();
            assert_eq!(AddressBookEntry::from_json(&text).unwrap(), entry);
        }
    }

    #[test]
    fn test_malformed_entry() {
        assert!(AddressBookEntry::from_json("{\"kind\":\"carrier_pigeon\"}").is_err());
        assert!(AddressBookEntry::from_json("not json").is_err());
        let short_key = r#"{"kind":"external","join_code":"J","identity":"AAAA","is_relay":false}"#;
        assert!(AddressBookEntry::from_json(short_key).is_err());
    }

    #[test]
    fn test_engine_address() {
        let ext = AddressBookEntry::external(JoinCode::new("J"), identity(3));
        assert_eq!(ext.engine_address().client_id(), Some(identity(3).client_id()));
        let dir = direct(1, 4000);
        assert_eq!(
            dir.engine_address().to_socket_addr().unwrap(),
            SocketAddr::from(([127, 0, 0, 1], 4000))
        );
    }
}
