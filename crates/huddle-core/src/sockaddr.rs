//! Fixed-size socket addresses, including the synthetic form that carries a
//! [`ClientId`] for relay-routed peers.
//!
//! The 128-byte buffer mirrors a `sockaddr_storage`, but every field is
//! stored big-endian so that the encoding is identical on every platform:
//!
//! ```text
//! [0..2]   family (2 = IPv4, 10 = IPv6)
//! [2..4]   port
//! IPv4:  [4..8]   address
//! IPv6:  [4..8]   flow info
//!        [8..24]  address
//!        [24..28] scope id
//! ```
//!
//! A synthetic address is the IPv6 address `fd54:6173:6869:0000:<client id>`
//! (the `fd` unique-local prefix, the ASCII tag `Tashi` and a zero subnet)
//! with port [`SYNTHETIC_PORT`].

use crate::error::AddressError;
use crate::identity::ClientId;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// Size of the address buffer
pub const SOCKADDR_LEN: usize = 128;

/// Reserved port of every synthetic address
pub const SYNTHETIC_PORT: u16 = 0x6767;

/// Unique-local prefix plus organization tag and zero subnet
pub const SYNTHETIC_PREFIX: [u8; 8] = [0xfd, b'T', b'a', b's', b'h', b'i', 0x00, 0x00];

const FAMILY_INET: u16 = 2;
const FAMILY_INET6: u16 = 10;

/// Address family of an [`Endpoint`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4
    Inet,
    /// IPv6
    Inet6,
    /// Anything else, by wire value
    Other(u16),
}

impl AddressFamily {
    /// Wire value of the family tag
    #[must_use]
    pub const fn to_wire(self) -> u16 {
        match self {
            AddressFamily::Inet => FAMILY_INET,
            AddressFamily::Inet6 => FAMILY_INET6,
            AddressFamily::Other(v) => v,
        }
    }

    /// Parse a wire family tag
    #[must_use]
    pub const fn from_wire(value: u16) -> Self {
        match value {
            FAMILY_INET => AddressFamily::Inet,
            FAMILY_INET6 => AddressFamily::Inet6,
            v => AddressFamily::Other(v),
        }
    }
}

/// Generic (family, address bytes, port) triple used at socket-API seams
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Address family
    pub family: AddressFamily,
    /// Raw address bytes (4 for IPv4, 16 for IPv6)
    pub bytes: Vec<u8>,
    /// Port
    pub port: u16,
}

/// Socket-address-shaped value understood by the consensus engine
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyntheticAddress([u8; SOCKADDR_LEN]);

impl SyntheticAddress {
    /// Synthetic address embedding `id`
    #[must_use]
    pub fn from_client_id(id: ClientId) -> Self {
        let mut ip = [0u8; 16];
        ip[..8].copy_from_slice(&SYNTHETIC_PREFIX);
        ip[8..].copy_from_slice(&id.to_be_bytes());
        Self::from_socket_addr(SocketAddr::V6(SocketAddrV6::new(
            Ipv6Addr::from(ip),
            SYNTHETIC_PORT,
            0,
            0,
        )))
    }

    /// The embedded client id, if this is a synthetic address
    #[must_use]
    pub fn client_id(&self) -> Option<ClientId> {
        if self.family() != AddressFamily::Inet6
            || self.port() != SYNTHETIC_PORT
            || self.0[8..16] != SYNTHETIC_PREFIX
        {
            return None;
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.0[16..24]);
        Some(ClientId::from_be_bytes(id))
    }

    /// Whether this address carries a client id rather than a real location
    #[must_use]
    pub fn has_client_id(&self) -> bool {
        self.client_id().is_some()
    }

    /// Encode a real socket address
    #[must_use]
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        let mut buf = [0u8; SOCKADDR_LEN];
        buf[2..4].copy_from_slice(&addr.port().to_be_bytes());
        match addr {
            SocketAddr::V4(v4) => {
                buf[0..2].copy_from_slice(&FAMILY_INET.to_be_bytes());
                buf[4..8].copy_from_slice(&v4.ip().octets());
            }
            SocketAddr::V6(v6) => {
                buf[0..2].copy_from_slice(&FAMILY_INET6.to_be_bytes());
                buf[4..8].copy_from_slice(&v6.flowinfo().to_be_bytes());
                buf[8..24].copy_from_slice(&v6.ip().octets());
                buf[24..28].copy_from_slice(&v6.scope_id().to_be_bytes());
            }
        }
        Self(buf)
    }

    /// Decode into a socket address
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::UnsupportedAddressFamily`] for unknown family tags.
    pub fn to_socket_addr(&self) -> Result<SocketAddr, AddressError> {
        let port = self.port();
        match self.family() {
            AddressFamily::Inet => {
                let ip = Ipv4Addr::new(self.0[4], self.0[5], self.0[6], self.0[7]);
                Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
            }
            AddressFamily::Inet6 => {
                let flowinfo = u32::from_be_bytes([self.0[4], self.0[5], self.0[6], self.0[7]]);
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&self.0[8..24]);
                let scope = u32::from_be_bytes([self.0[24], self.0[25], self.0[26], self.0[27]]);
                Ok(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(ip),
                    port,
                    flowinfo,
                    scope,
                )))
            }
            AddressFamily::Other(v) => Err(AddressError::UnsupportedAddressFamily(v)),
        }
    }

    /// Convert to a generic endpoint triple
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::UnsupportedAddressFamily`] for unknown family tags.
    pub fn to_endpoint(&self) -> Result<Endpoint, AddressError> {
        let addr = self.to_socket_addr()?;
        let (family, bytes) = match addr.ip() {
            IpAddr::V4(ip) => (AddressFamily::Inet, ip.octets().to_vec()),
            IpAddr::V6(ip) => (AddressFamily::Inet6, ip.octets().to_vec()),
        };
        Ok(Endpoint {
            family,
            bytes,
            port: addr.port(),
        })
    }

    /// Build from a generic endpoint triple
    ///
    /// # Errors
    ///
    /// Fails on unsupported families or when the byte count does not match the family.
    pub fn from_endpoint(endpoint: &Endpoint) -> Result<Self, AddressError> {
        let ip = match endpoint.family {
            AddressFamily::Inet => {
                let octets: [u8; 4] = endpoint.bytes.as_slice().try_into().map_err(|_| {
                    AddressError::InvalidLength {
                        family: FAMILY_INET,
                        expected: 4,
                        actual: endpoint.bytes.len(),
                    }
                })?;
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            AddressFamily::Inet6 => {
                let octets: [u8; 16] = endpoint.bytes.as_slice().try_into().map_err(|_| {
                    AddressError::InvalidLength {
                        family: FAMILY_INET6,
                        expected: 16,
                        actual: endpoint.bytes.len(),
                    }
                })?;
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            AddressFamily::Other(v) => return Err(AddressError::UnsupportedAddressFamily(v)),
        };
        Ok(Self::from_socket_addr(SocketAddr::new(ip, endpoint.port)))
    }

    /// Address family tag
    #[must_use]
    pub fn family(&self) -> AddressFamily {
        AddressFamily::from_wire(u16::from_be_bytes([self.0[0], self.0[1]]))
    }

    /// Port
    #[must_use]
    pub fn port(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    /// Raw buffer
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SOCKADDR_LEN] {
        &self.0
    }

    /// Wrap a raw buffer as produced by [`SyntheticAddress::as_bytes`]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SOCKADDR_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<SocketAddr> for SyntheticAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::from_socket_addr(addr)
    }
}

impl fmt::Debug for SyntheticAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = self.client_id() {
            return write!(f, "SyntheticAddress(client {id})");
        }
        match self.to_socket_addr() {
            Ok(addr) => write!(f, "SyntheticAddress({addr})"),
            Err(_) => write!(f, "SyntheticAddress(family {:?})", self.family()),
        }
    }
}
