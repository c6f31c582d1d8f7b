use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// Content tag over an entity's mutable payload.
///
/// An `ETag` is the 32-byte digest of `(body, meta, status)`. Identical
/// payloads always produce the same tag, regardless of any other entity
/// field. The digest itself is computed by `strata-crypto`; this type only
/// carries and renders it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ETag([u8; 32]);

impl ETag {
    /// Wrap a pre-computed digest.
    pub fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// The unset tag (all zeros). Carried by entities that have not been
    /// stored yet.
    pub const fn null() -> Self {
        Self([0u8; 32])
    }

    /// Returns `true` if this is the unset tag.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The raw 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string. The empty string parses as the null tag.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        if s.is_empty() {
            return Ok(Self::null());
        }
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ETag({})", self.short_hex())
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for ETag {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

// Rendered as hex so JSON documents stay readable; null renders as "".
impl Serialize for ETag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_null() {
            serializer.serialize_str("")
        } else {
            serializer.serialize_str(&self.to_hex())
        }
    }
}

impl<'de> Deserialize<'de> for ETag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_all_zeros() {
        let null = ETag::null();
        assert!(null.is_null());
        assert_eq!(null, ETag::default());
        assert_eq!(null.as_bytes(), &[0u8; 32]);
    }

    #[test]
    fn hex_roundtrip() {
        let tag = ETag::from_hash([0xab; 32]);
        let parsed = ETag::from_hex(&tag.to_hex()).unwrap();
        assert_eq!(tag, parsed);
    }

    #[test]
    fn empty_hex_is_null() {
        assert!(ETag::from_hex("").unwrap().is_null());
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = ETag::from_hex("abcd").unwrap_err();
        assert_eq!(err, TypeError::InvalidLength { expected: 32, actual: 2 });
    }

    #[test]
    fn invalid_hex_is_rejected() {
        assert!(matches!(ETag::from_hex("zz"), Err(TypeError::InvalidHex(_))));
    }

    #[test]
    fn display_is_full_hex() {
        let tag = ETag::from_hash([1; 32]);
        let display = format!("{tag}");
        assert_eq!(display.len(), 64);
        assert_eq!(tag.short_hex().len(), 8);
    }

    #[test]
    fn serializes_as_hex_string() {
        let tag = ETag::from_hash([7; 32]);
        let json = serde_json::to_string(&tag).unwrap();
        assert_eq!(json, format!("\"{}\"", tag.to_hex()));
        let parsed: ETag = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tag);

        assert_eq!(serde_json::to_string(&ETag::null()).unwrap(), "\"\"");
    }
}
