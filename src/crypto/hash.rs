//! Fixed 32-byte values: salts, code hashes, transaction hashes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 32-byte value rendered as lowercase `0x` hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct B256([u8; 32]);

/// CREATE2 salt.
pub type Salt = B256;

/// keccak256 of creation or runtime code.
pub type CodeHash = B256;

impl B256 {
    pub const ZERO: B256 = B256([0u8; 32]);

    #[inline]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex_prefixed(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<[u8; 32]> for B256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum B256Error {
    #[error("expected 64 hex characters, got {0}")]
    InvalidLength(usize),
    #[error("value contains non-hex characters")]
    InvalidHex,
}

impl From<B256> for alloy_primitives::B256 {
    fn from(b: B256) -> Self {
        alloy_primitives::B256::new(b.0)
    }
}

impl From<alloy_primitives::B256> for B256 {
    fn from(b: alloy_primitives::B256) -> Self {
        B256(b.0)
    }
}

impl FromStr for B256 {
    type Err = B256Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let body = s.strip_prefix("0x").unwrap_or(s);
        if body.len() != 64 {
            return Err(B256Error::InvalidLength(body.len()));
        }
        let bytes = hex::decode(body).map_err(|_| B256Error::InvalidHex)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Debug for B256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B256({})", self.to_hex_prefixed())
    }
}

impl fmt::Display for B256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex_prefixed())
    }
}

impl Serialize for B256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex_prefixed())
    }
}

impl<'de> Deserialize<'de> for B256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
