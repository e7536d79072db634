use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::TypesError;

/// 32-byte identifier of compiled contract bytecode.
///
/// Assigned at deployment and permanent for the life of the bytecode.
/// [`ContractId::from_bytecode`] derives the canonical id as the blake3
/// digest of the raw module bytes.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct ContractId([u8; Self::LEN]);

impl ContractId {
    pub const LEN: usize = 32;
    pub const ZERO: Self = Self([0u8; Self::LEN]);

    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, TypesError> {
        if slice.len() != Self::LEN {
            return Err(TypesError::InvalidIdLength(slice.len()));
        }
        let mut bytes = [0u8; Self::LEN];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Canonical id of a compiled module: blake3 over the raw bytes.
    pub fn from_bytecode(bytecode: &[u8]) -> Self {
        Self(*blake3::hash(bytecode).as_bytes())
    }

    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContractId(0x{})", hex::encode(self.0))
    }
}

impl FromStr for ContractId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)?;
        Self::from_slice(&bytes)
    }
}

impl AsRef<[u8]> for ContractId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// 32-byte identifier of the action that triggered an invocation.
/// Minted by the outer system; opaque to the runtime.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct ActionId([u8; Self::LEN]);

impl ActionId {
    pub const LEN: usize = 32;
    pub const ZERO: Self = Self([0u8; Self::LEN]);

    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionId(0x{})", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for ActionId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_id_from_bytecode_deterministic() {
        let id = ContractId::from_bytecode(b"\0asm");
        assert_eq!(id, ContractId::from_bytecode(b"\0asm"));
        assert_ne!(id, ContractId::from_bytecode(b"\0asn"));
        assert!(!id.is_zero());
    }

    #[test]
    fn test_contract_id_from_slice() {
        let id = ContractId::from_slice(&[4u8; 32]).unwrap();
        assert_eq!(id.as_bytes(), &[4u8; 32]);

        assert!(matches!(
            ContractId::from_slice(&[0u8; 31]),
            Err(TypesError::InvalidIdLength(31))
        ));
    }

    #[test]
    fn test_contract_id_hex_roundtrip() {
        let id = ContractId::from_bytes([0xcdu8; 32]);
        let parsed: ContractId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_action_id_borsh_is_raw_bytes() {
        let action = ActionId::from_bytes([6u8; 32]);
        let encoded = borsh::to_vec(&action).unwrap();
        assert_eq!(encoded.len(), ActionId::LEN);
        assert_eq!(&encoded, action.as_bytes());
    }
}
