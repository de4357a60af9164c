//! Peer identities and the numeric client id derived from them.

use crate::error::IdentityError;
use crate::sockaddr::SyntheticAddress;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a DER-encoded P-256 `SubjectPublicKeyInfo`
pub const PUBLIC_KEY_DER_LEN: usize = 91;

/// Length of a DER-encoded P-256 secret key
pub const SECRET_KEY_DER_LEN: usize = 121;

/// Length of the uncompressed curve point (X || Y) at the tail of the DER
pub const RAW_POINT_LEN: usize = 64;

/// DER header preceding the raw point: SPKI sequence, ecPublicKey + prime256v1 OIDs,
/// bit string, uncompressed-point marker
const SPKI_P256_PREFIX: [u8; PUBLIC_KEY_DER_LEN - RAW_POINT_LEN] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00, 0x04,
];

/// Numeric peer id derived from a [`PeerIdentity`]
///
/// `ClientId::HOST` (0) is reserved for "the session host" in transport events
/// seen by followers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl ClientId {
    /// Sentinel id under which followers see the host
    pub const HOST: ClientId = ClientId(0);

    /// Big-endian wire encoding
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decode from big-endian wire encoding
    #[must_use]
    pub const fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for ClientId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A peer's public key in DER form
///
/// The identity is opaque to this crate apart from the trailing curve point,
/// which is where the [`ClientId`] comes from.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    der: [u8; PUBLIC_KEY_DER_LEN],
}

impl PeerIdentity {
    /// Wrap a DER-encoded public key
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidLength`] unless `der` is exactly
    /// [`PUBLIC_KEY_DER_LEN`] bytes.
    pub fn from_der(der: &[u8]) -> Result<Self, IdentityError> {
        let der: [u8; PUBLIC_KEY_DER_LEN] =
            der.try_into().map_err(|_| IdentityError::InvalidLength {
                expected: PUBLIC_KEY_DER_LEN,
                actual: der.len(),
            })?;
        Ok(Self { der })
    }

    /// Build the P-256 SPKI encoding around an uncompressed point
    #[must_use]
    pub fn from_raw_point(point: &[u8; RAW_POINT_LEN]) -> Self {
        let mut der = [0u8; PUBLIC_KEY_DER_LEN];
        der[..SPKI_P256_PREFIX.len()].copy_from_slice(&SPKI_P256_PREFIX);
        der[SPKI_P256_PREFIX.len()..].copy_from_slice(point);
        Self { der }
    }

    /// DER bytes
    #[must_use]
    pub fn as_der(&self) -> &[u8; PUBLIC_KEY_DER_LEN] {
        &self.der
    }

    /// The uncompressed curve point (last 64 bytes of the DER)
    #[must_use]
    pub fn raw_point(&self) -> &[u8] {
        &self.der[PUBLIC_KEY_DER_LEN - RAW_POINT_LEN..]
    }

    /// Numeric id: first 8 bytes of the raw point, big-endian
    #[must_use]
    pub fn client_id(&self) -> ClientId {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.raw_point()[..8]);
        ClientId::from_be_bytes(id)
    }

    /// Relay-routable synthetic address for this identity
    #[must_use]
    pub fn synthetic_address(&self) -> SyntheticAddress {
        SyntheticAddress::from_client_id(self.client_id())
    }

    /// Standard base64 of the DER bytes
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.der)
    }

    /// Parse from standard base64
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not base64 or decodes to the wrong length.
    pub fn from_base64(text: &str) -> Result<Self, IdentityError> {
        let bytes = BASE64
            .decode(text)
            .map_err(|e| IdentityError::InvalidEncoding(e.to_string()))?;
        Self::from_der(&bytes)
    }
}

/// Secret key of the local peer, DER encoded
///
/// The engine derives the local [`PeerIdentity`] from it, so a native engine
/// is built from the key alone. Key material is zeroized on drop; generating
/// a key and deriving its public key need the `native` feature.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    der: [u8; SECRET_KEY_DER_LEN],
}

impl SecretKey {
    /// Wrap a DER-encoded secret key
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidLength`] unless `der` is exactly
    /// [`SECRET_KEY_DER_LEN`] bytes.
    pub fn from_der(der: &[u8]) -> Result<Self, IdentityError> {
        let der: [u8; SECRET_KEY_DER_LEN] =
            der.try_into().map_err(|_| IdentityError::InvalidLength {
                expected: SECRET_KEY_DER_LEN,
                actual: der.len(),
            })?;
        Ok(Self { der })
    }

    #[cfg(feature = "native")]
    pub(crate) fn from_bytes(der: [u8; SECRET_KEY_DER_LEN]) -> Self {
        Self { der }
    }

    /// DER bytes
    ///
    /// Do not keep copies of the returned bytes beyond the key's lifetime.
    #[must_use]
    pub fn as_der(&self) -> &[u8; SECRET_KEY_DER_LEN] {
        &self.der
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerIdentity({})", self.client_id())
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.raw_point()[..8]))
    }
}

impl Serialize for PeerIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PeerIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_base64(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(first: u8) -> [u8; RAW_POINT_LEN] {
        let mut p = [0u8; RAW_POINT_LEN];
        for (i, b) in p.iter_mut().enumerate() {
            *b = first.wrapping_add(i as u8);
        }
        p
    }

    #[test]
    fn test_client_id_is_big_endian_prefix_of_point() {
        let id = PeerIdentity::from_raw_point(&point(0x11));
        assert_eq!(id.client_id(), ClientId(0x1112_1314_1516_1718));
    }

    #[test]
    fn test_from_der_rejects_wrong_length() {
        let err = PeerIdentity::from_der(&[0u8; 90]).unwrap_err();
        assert_eq!(
            err,
            IdentityError::InvalidLength {
                expected: 91,
                actual: 90
            }
        );
    }

    #[test]
    fn test_der_prefix() {
        let id = PeerIdentity::from_raw_point(&point(1));
        assert_eq!(&id.as_der()[..3], &[0x30, 0x59, 0x30]);
        assert_eq!(id.as_der()[26], 0x04);
        assert_eq!(id.raw_point(), &point(1)[..]);
    }

    #[test]
    fn test_base64_roundtrip() {
        let id = PeerIdentity::from_raw_point(&point(7));
        let parsed = PeerIdentity::from_base64(&id.to_base64()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_from_base64_rejects_garbage() {
        assert!(matches!(
            PeerIdentity::from_base64("not base64!"),
            Err(IdentityError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_synthetic_address_carries_client_id() {
        let id = PeerIdentity::from_raw_point(&point(0x40));
        assert_eq!(id.synthetic_address().client_id(), Some(id.client_id()));
    }

    #[test]
    fn test_secret_key_length_is_checked() {
        let key = SecretKey::from_der(&[7u8; SECRET_KEY_DER_LEN]).unwrap();
        assert_eq!(key.as_der().len(), 121);
        assert_eq!(
            SecretKey::from_der(&[7u8; PUBLIC_KEY_DER_LEN]).unwrap_err(),
            IdentityError::InvalidLength {
                expected: 121,
                actual: 91
            }
        );
    }

    #[test]
    fn test_secret_key_debug_is_redacted() {
        let key = SecretKey::from_der(&[0xaa; SECRET_KEY_DER_LEN]).unwrap();
        assert_eq!(format!("{key:?}"), "SecretKey(..)");
    }

    #[test]
    fn test_client_id_display() {
        assert_eq!(ClientId(0xab).to_string(), "00000000000000ab");
    }
}
