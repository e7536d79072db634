//! External state interfaces and the contract-scoped view.
//!
//! The runtime never owns state: contracts, accounts, balances and the
//! key/value store behind state access all live behind [`StateManager`],
//! supplied by the embedder. [`PrefixedState`] is the adapter the host wraps
//! around a contract's raw view so every key lands under the contract's
//! address prefix.

use basalt_types::{Address, ContractId};

use crate::error::{BalanceError, StateError};

/// Key/value interface the host exposes to a single contract.
pub trait Mutable {
    fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError>;
    fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StateError>;
    /// Remove a key, returning the previous value when one existed.
    fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError>;
}

/// The external collaborator resolving contracts, accounts and balances.
///
/// The runtime assumes linearizable semantics within a single invocation;
/// locking discipline is the implementor's responsibility.
pub trait StateManager: Send + Sync {
    /// The contract id associated with the given account.
    fn get_account_contract(&self, account: Address) -> Result<ContractId, StateError>;

    /// The compiled WASM bytes of the contract with the given id.
    fn get_contract_bytes(&self, id: ContractId) -> Result<Vec<u8>, StateError>;

    /// Store the compiled WASM bytes of the contract with the given id.
    fn set_contract_bytes(&self, id: ContractId, bytes: Vec<u8>) -> Result<(), StateError>;

    /// Create a new account representing an instance of the contract.
    fn new_account_with_contract(
        &self,
        id: ContractId,
        creation_data: &[u8],
    ) -> Result<Address, StateError>;

    /// Associate the given contract id with the given account.
    fn set_account_contract(&self, account: Address, id: ContractId) -> Result<(), StateError>;

    /// The raw (unprefixed) state of the contract at the given address.
    fn contract_state(&self, account: Address) -> Box<dyn Mutable + '_>;

    fn get_balance(&self, address: Address) -> Result<u64, BalanceError>;

    fn transfer_balance(&self, from: Address, to: Address, amount: u64)
        -> Result<(), BalanceError>;
}

/// Scopes every key under `address || '/'`.
///
/// The isolation is strict and unconditional; contracts cannot escape their
/// prefix through host APIs.
pub struct PrefixedState<M> {
    address: Address,
    inner: M,
}

impl<M: Mutable> PrefixedState<M> {
    pub fn new(address: Address, inner: M) -> Self {
        Self { address, inner }
    }

    fn scoped_key(&self, key: &[u8]) -> Vec<u8> {
        let mut scoped = Vec::with_capacity(Address::LEN + 1 + key.len());
        scoped.extend_from_slice(self.address.as_bytes());
        scoped.push(b'/');
        scoped.extend_from_slice(key);
        scoped
    }
}

impl<M: Mutable> Mutable for PrefixedState<M> {
    fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        self.inner.get_value(&self.scoped_key(key))
    }

    fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StateError> {
        self.inner.insert(&self.scoped_key(key), value)
    }

    fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        self.inner.remove(&self.scoped_key(key))
    }
}

impl<M: Mutable + ?Sized> Mutable for &mut M {
    fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        (**self).get_value(key)
    }

    fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StateError> {
        (**self).insert(key, value)
    }

    fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        (**self).remove(key)
    }
}

impl<M: Mutable + ?Sized> Mutable for Box<M> {
    fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        (**self).get_value(key)
    }

    fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StateError> {
        (**self).insert(key, value)
    }

    fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        (**self).remove(key)
    }
}
