//! Immutable byte container.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::FramingError;

/// Ordered sequence of bytes, immutable once built.
///
/// Cloning is cheap (reference counted). Construction never pads or truncates:
/// the length and order of the input are preserved exactly.
///
/// Serializes as an uppercase hex string so it can sit inside JSON graph
/// documents and component settings.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteArray(Bytes);

impl ByteArray {
    /// Empty byte array.
    pub fn new() -> Self {
        Self(Bytes::new())
    }

    /// Parse hex text. ASCII whitespace between digits is ignored, so
    /// `"F0 00 00 17"` and `"F0000017"` are equivalent.
    ///
    /// # Errors
    ///
    /// Returns `FramingError::InvalidHex` on odd digit count or non-hex chars.
    pub fn from_hex(text: &str) -> Result<Self, FramingError> {
        let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes =
            hex::decode(compact).map_err(|e| FramingError::InvalidHex { reason: e.to_string() })?;
        Ok(Self(Bytes::from(bytes)))
    }

    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Byte at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<u8> {
        self.0.get(index).copied()
    }

    /// Borrow the raw bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Underlying buffer.
    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }

    /// Uppercase hex rendering without separators.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.0)
    }

    /// Sub-range `[start, end)` sharing the same buffer.
    ///
    /// Returns `None` if the range falls outside the array.
    pub fn slice(&self, start: usize, end: usize) -> Option<Self> {
        if start > end || end > self.0.len() {
            return None;
        }
        Some(Self(self.0.slice(start..end)))
    }
}

impl fmt::Display for ByteArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ByteArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteArray({})", self.to_hex())
    }
}

impl AsRef<[u8]> for ByteArray {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ByteArray {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&[u8]> for ByteArray {
    fn from(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }
}

impl<const N: usize> From<[u8; N]> for ByteArray {
    fn from(bytes: [u8; N]) -> Self {
        Self(Bytes::copy_from_slice(&bytes))
    }
}

impl From<Bytes> for ByteArray {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl Serialize for ByteArray {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ByteArray {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn from_hex_ignores_whitespace() {
        let spaced = ByteArray::from_hex("F0 00 00 17\n11 31 12").unwrap();
        let compact = ByteArray::from_hex("F0000017113112").unwrap();
        assert_eq!(spaced, compact);
        assert_eq!(spaced.len(), 7);
    }

    #[test]
    fn from_hex_rejects_odd_digits() {
        let result = ByteArray::from_hex("ABC");
        assert!(matches!(result, Err(FramingError::InvalidHex { .. })));
    }

    #[test]
    fn from_hex_rejects_non_hex() {
        assert!(ByteArray::from_hex("ZZ").is_err());
    }

    #[test]
    fn renders_uppercase_hex() {
        let bytes = ByteArray::from([0x9f, 0x17, 0x01]);
        assert_eq!(bytes.to_string(), "9F1701");
        assert_eq!(format!("{bytes:?}"), "ByteArray(9F1701)");
    }

    #[test]
    fn slice_bounds() {
        let bytes = ByteArray::from([1, 2, 3, 4]);
        assert_eq!(bytes.slice(1, 3).unwrap().as_slice(), &[2, 3]);
        assert!(bytes.slice(3, 5).is_none());
        assert!(bytes.slice(3, 2).is_none());
    }

    #[test]
    fn serde_as_hex_string() {
        let bytes = ByteArray::from([0x83, 0x00]);
        let json = serde_json::to_string(&bytes).unwrap();
        assert_eq!(json, "\"8300\"");

        let decoded: ByteArray = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn empty_is_empty() {
        assert!(ByteArray::new().is_empty());
        assert!(ByteArray::from_hex("").unwrap().is_empty());
    }
}
