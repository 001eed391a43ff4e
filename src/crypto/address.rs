//! Ethereum address representation and utilities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::keccak256;

/// An Ethereum address (20 bytes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Creates an address from raw bytes.
    #[inline]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Creates an address from a 20-byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AddressError> {
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| AddressError::InvalidLength(bytes.len() * 2))?;
        Ok(Self(arr))
    }

    /// Returns the address as raw bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns true for the zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Returns the address as a lowercase hex string (without 0x prefix).
    #[inline]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the address with 0x prefix.
    pub fn to_hex_prefixed(&self) -> String {
        format!("0x{}", self.to_hex())
    }

    /// Returns the address with checksum encoding (EIP-55).
    pub fn to_checksum(&self) -> String {
        let hex_addr = self.to_hex();
        let hash = keccak256(hex_addr.as_bytes());

        let mut checksum = String::with_capacity(42);
        checksum.push_str("0x");

        for (i, c) in hex_addr.chars().enumerate() {
            let hash_byte = hash[i / 2];
            let hash_nibble = if i % 2 == 0 {
                hash_byte >> 4
            } else {
                hash_byte & 0x0f
            };

            if c.is_ascii_digit() || hash_nibble < 8 {
                checksum.push(c);
            } else {
                checksum.push(c.to_ascii_uppercase());
            }
        }

        checksum
    }

    /// Returns the address left-padded to a 32-byte ABI word.
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }
}

/// Errors raised while parsing an address string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("expected 40 hex characters, got {0}")]
    InvalidLength(usize),
    #[error("address contains non-hex characters")]
    InvalidHex,
    #[error("mixed-case address fails EIP-55 checksum")]
    BadChecksum,
}

impl From<Address> for alloy_primitives::Address {
    fn from(addr: Address) -> Self {
        alloy_primitives::Address::new(addr.0)
    }
}

impl From<alloy_primitives::Address> for Address {
    fn from(addr: alloy_primitives::Address) -> Self {
        Address(addr.into_array())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    /// Accepts `0x`-prefixed or bare hex. All-lowercase and all-uppercase
    /// inputs are taken as-is; mixed case must carry a valid checksum.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let body = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);

        if body.len() != 40 {
            return Err(AddressError::InvalidLength(body.len()));
        }
        if !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError::InvalidHex);
        }

        let bytes = hex::decode(body).map_err(|_| AddressError::InvalidHex)?;
        let address = Address::from_slice(&bytes)?;

        let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && address.to_checksum()[2..] != *body {
            return Err(AddressError::BadChecksum);
        }

        Ok(address)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
