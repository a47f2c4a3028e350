use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// A 32-byte block or transaction hash, rendered as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256([u8; 32]);

/// Error parsing a hex string into a [`Hash256`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseHashError(String);

impl fmt::Display for ParseHashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid 32-byte hash: {}", self.0)
    }
}

impl std::error::Error for ParseHashError {}

impl Hash256 {
    pub fn new(bytes: [u8; 32]) -> Hash256 {
        Hash256(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Hash256, ParseHashError> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ParseHashError(format!("{} bytes", bytes.len())))?;
        Ok(Hash256(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl FromStr for Hash256 {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Hash256, ParseHashError> {
        if s.len() != 64 {
            return Err(ParseHashError(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| ParseHashError(s.to_string()))?;
        Hash256::from_slice(&bytes)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", hex::encode(self.0))
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Hash256, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_renders_lowercase_hex() {
        let s = "00000000a1b2c3d4e5f60718293a4b5c6d7e8f9000000000a1b2c3d4e5f60718";
        let h: Hash256 = s.parse().unwrap();
        assert_eq!(h.to_string(), s);
    }

    #[test]
    fn rejects_bad_lengths() {
        assert!("abcd".parse::<Hash256>().is_err());
        assert!(Hash256::from_slice(&[0u8; 31]).is_err());
    }
}
