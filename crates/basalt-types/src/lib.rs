//! Basalt Types - Core identifier types for the Basalt contract runtime.
//!
//! This crate provides the fundamental types shared by the runtime and its
//! embedders:
//! - Addresses (33-byte, 1-byte tag + 32-byte body)
//! - Contract identifiers (32-byte, blake3 digests of bytecode)
//! - Action identifiers (32-byte, externally minted)

pub mod address;
pub mod error;
pub mod id;

pub use address::Address;
pub use error::TypesError;
pub use id::{ActionId, ContractId};
