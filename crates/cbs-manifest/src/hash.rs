//! Content hashing for derived manifests
//!
//! Provides [`ManifestHash`], a 32-byte Blake3 digest of a manifest's
//! canonical JSON form. Two manifests that differ only in key order hash
//! identically, so a debounced persister can skip writes that would not
//! change anything.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde_json::Value;

use crate::document::canonical_json;

/// A 32-byte manifest hash (Blake3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManifestHash([u8; 32]);

impl ManifestHash {
    /// Create a hash from raw bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create hash from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != 32 {
            return Err(HashError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Hash arbitrary bytes
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self::new(*blake3::hash(data).as_bytes())
    }

    /// Hash a JSON tree by its canonical (key-sorted) encoding
    #[inline]
    #[must_use]
    pub fn of_value(value: &Value) -> Self {
        Self::compute(canonical_json(value).as_bytes())
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for ManifestHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ManifestHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl serde::Serialize for ManifestHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ManifestHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors related to manifest hashes
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Wrong number of bytes
    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Not a hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_ignores_key_order() {
        let a = json!({"version": "1.0.0", "streams": [{"name": "a", "type": "DeclarativeStream"}]});
        let b = json!({"streams": [{"type": "DeclarativeStream", "name": "a"}], "version": "1.0.0"});
        assert_eq!(ManifestHash::of_value(&a), ManifestHash::of_value(&b));
    }

    #[test]
    fn hash_detects_value_change() {
        let a = json!({"url_base": "https://a.example.com"});
        let b = json!({"url_base": "https://b.example.com"});
        assert_ne!(ManifestHash::of_value(&a), ManifestHash::of_value(&b));
    }

    #[test]
    fn hash_hex_roundtrip() {
        let hash = ManifestHash::compute(b"manifest");
        let parsed: ManifestHash = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);
        assert_eq!(hash.short().len(), 16);
    }

    #[test]
    fn hash_rejects_short_input() {
        let result = "abcd".parse::<ManifestHash>();
        assert!(matches!(result, Err(HashError::InvalidLength { .. })));
    }
}
