use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Number of bytes kept from the path hash.
pub const NAMESPACE_LEN: usize = 20;

/// Scope under which object sequence numbers are allocated.
///
/// A `NamespaceId` is derived deterministically from a package path using
/// BLAKE3 with a domain separator, truncated to [`NAMESPACE_LEN`] bytes. The
/// same path always produces the same namespace. The all-zero value is
/// reserved: it is the namespace of ephemeral (not yet persisted) objects.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespaceId([u8; NAMESPACE_LEN]);

impl NamespaceId {
    /// Derive the namespace of a package path.
    pub fn from_path(path: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"realm-namespace-v1:");
        hasher.update(path.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; NAMESPACE_LEN];
        bytes.copy_from_slice(&digest.as_bytes()[..NAMESPACE_LEN]);
        Self(bytes)
    }

    /// The zero namespace.
    pub const fn zero() -> Self {
        Self([0u8; NAMESPACE_LEN])
    }

    /// Returns `true` for the zero namespace.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; NAMESPACE_LEN]
    }

    /// Create from raw bytes. Use `from_path()` for production code.
    pub fn from_raw(bytes: [u8; NAMESPACE_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; NAMESPACE_LEN] {
        &self.0
    }

    /// Full hex-encoded string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short identifier (first 8 hex characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string (40 hex characters).
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != NAMESPACE_LEN {
            return Err(TypeError::InvalidLength {
                expected: NAMESPACE_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; NAMESPACE_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NamespaceId({})", self.short_hex())
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
