use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::TypesError;

/// 33-byte account identifier: a 1-byte type tag followed by a 32-byte body.
///
/// The tag distinguishes address classes (externally-owned accounts,
/// contract accounts, system accounts); the body is an opaque digest.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Address([u8; Self::LEN]);

impl Address {
    pub const LEN: usize = 33;
    pub const ZERO: Self = Self([0u8; Self::LEN]);

    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Build an address from a type tag and a 32-byte body.
    pub fn new(tag: u8, body: [u8; 32]) -> Self {
        let mut bytes = [0u8; Self::LEN];
        bytes[0] = tag;
        bytes[1..].copy_from_slice(&body);
        Self(bytes)
    }

    /// Create from a byte slice.
    pub fn from_slice(slice: &[u8]) -> Result<Self, TypesError> {
        if slice.len() != Self::LEN {
            return Err(TypesError::InvalidAddressLength(slice.len()));
        }
        let mut bytes = [0u8; Self::LEN];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Derive an address by hashing arbitrary input under a type tag.
    /// Uses blake3 over the input for the 32-byte body.
    pub fn derive(tag: u8, input: &[u8]) -> Self {
        Self::new(tag, *blake3::hash(input).as_bytes())
    }

    /// The leading type tag byte.
    pub fn tag(&self) -> u8 {
        self.0[0]
    }

    /// Check if this is the zero address.
    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }

    /// Convert to hex string without 0x prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| TypesError::InvalidAddressFormat(s.to_string()))?;
        let bytes = hex::decode(stripped)?;
        Self::from_slice(&bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
