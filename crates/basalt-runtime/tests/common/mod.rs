//! Shared fixtures: an in-memory state manager and WAT guest contracts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use basalt_runtime::{
    BalanceError, CallContext, CallInfo, Mutable, Runtime, RuntimeConfig, StateError, StateManager,
};
use basalt_types::{Address, ContractId};

/// In-memory state manager backing the end-to-end tests.
#[derive(Default)]
pub struct TestStateManager {
    contracts: Mutex<HashMap<ContractId, Vec<u8>>>,
    accounts: Mutex<HashMap<Address, ContractId>>,
    balances: Mutex<HashMap<Address, u64>>,
    kv: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    account_seq: AtomicU64,
}

impl TestStateManager {
    /// Compile a WAT contract, store its bytecode and bind a fresh account.
    pub fn deploy(&self, wat: &str) -> (ContractId, Address) {
        let bytecode = wat::parse_str(wat).expect("fixture WAT must compile");
        let id = ContractId::from_bytecode(&bytecode);
        self.set_contract_bytes(id, bytecode).unwrap();
        let account = self.new_account_with_contract(id, &[]).unwrap();
        (id, account)
    }

    pub fn set_balance(&self, address: Address, amount: u64) {
        self.balances.lock().unwrap().insert(address, amount);
    }

    pub fn balance_of(&self, address: Address) -> u64 {
        self.balances
            .lock()
            .unwrap()
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    /// Raw keys in the backing store, prefixes included.
    pub fn raw_keys(&self) -> Vec<Vec<u8>> {
        self.kv.lock().unwrap().keys().cloned().collect()
    }

    pub fn raw_value(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.kv.lock().unwrap().get(key).cloned()
    }
}

impl StateManager for TestStateManager {
    fn get_account_contract(&self, account: Address) -> Result<ContractId, StateError> {
        self.accounts
            .lock()
            .unwrap()
            .get(&account)
            .copied()
            .ok_or(StateError::AccountNotFound(account))
    }

    fn get_contract_bytes(&self, id: ContractId) -> Result<Vec<u8>, StateError> {
        self.contracts
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StateError::ContractNotFound(id))
    }

    fn set_contract_bytes(&self, id: ContractId, bytes: Vec<u8>) -> Result<(), StateError> {
        self.contracts.lock().unwrap().insert(id, bytes);
        Ok(())
    }

    fn new_account_with_contract(
        &self,
        id: ContractId,
        creation_data: &[u8],
    ) -> Result<Address, StateError> {
        let seq = self.account_seq.fetch_add(1, Ordering::Relaxed);
        let mut seed = id.as_bytes().to_vec();
        seed.extend_from_slice(creation_data);
        seed.extend_from_slice(&seq.to_le_bytes());
        let account = Address::derive(1, &seed);
        self.accounts.lock().unwrap().insert(account, id);
        Ok(account)
    }

    fn set_account_contract(&self, account: Address, id: ContractId) -> Result<(), StateError> {
        self.accounts.lock().unwrap().insert(account, id);
        Ok(())
    }

    fn contract_state(&self, _account: Address) -> Box<dyn Mutable + '_> {
        Box::new(KvView(&self.kv))
    }

    fn get_balance(&self, address: Address) -> Result<u64, BalanceError> {
        Ok(self.balance_of(address))
    }

    fn transfer_balance(&self, from: Address, to: Address, amount: u64) -> Result<(), BalanceError> {
        let mut balances = self.balances.lock().unwrap();
        let have = balances.get(&from).copied().unwrap_or(0);
        if have < amount {
            return Err(BalanceError::InsufficientFunds { have, need: amount });
        }
        let to_balance = balances.get(&to).copied().unwrap_or(0);
        let new_to = to_balance.checked_add(amount).ok_or(BalanceError::Overflow)?;
        balances.insert(from, have - amount);
        balances.insert(to, new_to);
        Ok(())
    }
}

struct KvView<'a>(&'a Mutex<HashMap<Vec<u8>, Vec<u8>>>);

impl Mutable for KvView<'_> {
    fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.0.lock().unwrap().get(key).cloned())
    }

    fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StateError> {
        self.0.lock().unwrap().insert(key.to_vec(), value);
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.0.lock().unwrap().remove(key))
    }
}

pub struct TestRuntime {
    pub runtime: Runtime,
    pub state: Arc<TestStateManager>,
    pub context: CallContext,
}

/// A runtime with default policy, an empty state manager, and generous
/// default fuel.
pub fn test_runtime() -> TestRuntime {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    let state = Arc::new(TestStateManager::default());
    let context = runtime.with_defaults(CallInfo {
        state: Some(state.clone() as Arc<dyn StateManager>),
        fuel: 1_000_000_000,
        ..Default::default()
    });
    TestRuntime {
        runtime,
        state,
        context,
    }
}

/// Returns `simple_call` results through `set_result`: the first eight bytes
/// of zeroed linear memory.
pub const SIMPLE_CALL: &str = r#"(module
    (import "contract" "set_result" (func $set_result (param i32 i32)))
    (memory (export "memory") 1 16)
    (global $heap (mut i32) (i32.const 4096))
    (func (export "alloc") (param $len i32) (result i32)
        (local $ptr i32)
        (local.set $ptr (global.get $heap))
        (global.set $heap (i32.add (local.get $ptr) (local.get $len)))
        (local.get $ptr))
    (func (export "simple_call") (param i32)
        (call $set_result (i32.const 0) (i32.const 8))))"#;

/// Echoes the 114-byte context prefix back to the host.
pub const ECHO_CONTEXT: &str = r#"(module
    (import "contract" "set_result" (func $set_result (param i32 i32)))
    (memory (export "memory") 1 16)
    (global $heap (mut i32) (i32.const 4096))
    (func (export "alloc") (param $len i32) (result i32)
        (local $ptr i32)
        (local.set $ptr (global.get $heap))
        (global.set $heap (i32.add (local.get $ptr) (local.get $len)))
        (local.get $ptr))
    (func (export "echo_ctx") (param $ctx i32)
        (call $set_result (local.get $ctx) (i32.const 114))))"#;

/// Nested-call trampoline. Params are a u32 length followed by a serialized
/// `CallContractArgs` buffer, forwarded verbatim to `contract::call_contract`.
/// `relay` treats child failure as fatal; `try_call` reports the raw packed
/// return value so the host can observe `-1`.
pub const RELAY: &str = r#"(module
    (import "contract" "call_contract" (func $call_contract (param i32 i32) (result i64)))
    (import "contract" "set_result" (func $set_result (param i32 i32)))
    (memory (export "memory") 1 16)
    (global $heap (mut i32) (i32.const 4096))
    (func (export "alloc") (param $len i32) (result i32)
        (local $ptr i32)
        (local.set $ptr (global.get $heap))
        (global.set $heap (i32.add (local.get $ptr) (local.get $len)))
        (local.get $ptr))
    (func (export "relay") (param $ctx i32)
        (local $len i32) (local $res i64)
        (local.set $len (i32.load (i32.add (local.get $ctx) (i32.const 114))))
        (local.set $res (call $call_contract
            (i32.add (local.get $ctx) (i32.const 118))
            (local.get $len)))
        (if (i64.eq (local.get $res) (i64.const -1))
            (then unreachable))
        (call $set_result
            (i32.wrap_i64 (i64.shr_u (local.get $res) (i64.const 32)))
            (i32.wrap_i64 (i64.and (local.get $res) (i64.const 0xffffffff)))))
    (func (export "try_call") (param $ctx i32)
        (local $len i32)
        (local.set $len (i32.load (i32.add (local.get $ctx) (i32.const 114))))
        (i64.store (i32.const 640)
            (call $call_contract
                (i32.add (local.get $ctx) (i32.const 118))
                (local.get $len)))
        (call $set_result (i32.const 640) (i32.const 8))))"#;

/// Key/value access under the key "counter".
pub const STATE_RW: &str = r#"(module
    (import "state" "get" (func $get (param i32 i32) (result i64)))
    (import "state" "insert" (func $insert (param i32 i32 i32 i32)))
    (import "state" "remove" (func $remove (param i32 i32) (result i64)))
    (import "contract" "set_result" (func $set_result (param i32 i32)))
    (memory (export "memory") 1 16)
    (global $heap (mut i32) (i32.const 4096))
    (data (i32.const 512) "counter")
    (func (export "alloc") (param $len i32) (result i32)
        (local $ptr i32)
        (local.set $ptr (global.get $heap))
        (global.set $heap (i32.add (local.get $ptr) (local.get $len)))
        (local.get $ptr))
    (func (export "put") (param $ctx i32)
        (call $insert (i32.const 512) (i32.const 7)
            (i32.add (local.get $ctx) (i32.const 114)) (i32.const 8)))
    (func (export "read") (param $ctx i32)
        (local $res i64)
        (local.set $res (call $get (i32.const 512) (i32.const 7)))
        (if (i64.eq (local.get $res) (i64.const -1))
            (then (return)))
        (call $set_result
            (i32.wrap_i64 (i64.shr_u (local.get $res) (i64.const 32)))
            (i32.wrap_i64 (i64.and (local.get $res) (i64.const 0xffffffff)))))
    (func (export "drop_key") (param $ctx i32)
        (drop (call $remove (i32.const 512) (i32.const 7)))))"#;

/// Balance queries and guest-driven transfers.
pub const BALANCE_OPS: &str = r#"(module
    (import "balance" "get" (func $get (param i32) (result i64)))
    (import "balance" "transfer" (func $transfer (param i32 i32 i64) (result i32)))
    (import "contract" "set_result" (func $set_result (param i32 i32)))
    (memory (export "memory") 1 16)
    (global $heap (mut i32) (i32.const 4096))
    (func (export "alloc") (param $len i32) (result i32)
        (local $ptr i32)
        (local.set $ptr (global.get $heap))
        (global.set $heap (i32.add (local.get $ptr) (local.get $len)))
        (local.get $ptr))
    (func (export "my_balance") (param $ctx i32)
        (i64.store (i32.const 640)
            (call $get (i32.add (local.get $ctx) (i32.const 33))))
        (call $set_result (i32.const 640) (i32.const 8)))
    (func (export "give_back") (param $ctx i32)
        (i32.store8 (i32.const 648)
            (call $transfer
                (local.get $ctx)
                (i32.add (local.get $ctx) (i32.const 33))
                (i64.const 50)))
        (call $set_result (i32.const 648) (i32.const 1))))"#;

/// Fuel accounting probes.
pub const FUEL_OPS: &str = r#"(module
    (import "contract" "consume_fuel" (func $consume_fuel (param i64)))
    (import "contract" "remaining_fuel" (func $remaining_fuel (result i64)))
    (import "contract" "set_result" (func $set_result (param i32 i32)))
    (memory (export "memory") 1 16)
    (global $heap (mut i32) (i32.const 4096))
    (func (export "alloc") (param $len i32) (result i32)
        (local $ptr i32)
        (local.set $ptr (global.get $heap))
        (global.set $heap (i32.add (local.get $ptr) (local.get $len)))
        (local.get $ptr))
    (func (export "burn") (param i32)
        (call $consume_fuel (i64.const 5000))
        (i64.store (i32.const 640) (call $remaining_fuel))
        (call $set_result (i32.const 640) (i32.const 8)))
    (func (export "burn_all") (param i32)
        (call $consume_fuel (i64.const 0x7fffffffffffffff))))"#;

/// Writes a marker key; `mark_then_spin` then burns the rest of the budget.
pub const MARKER: &str = r#"(module
    (import "state" "insert" (func $insert (param i32 i32 i32 i32)))
    (memory (export "memory") 1 16)
    (global $heap (mut i32) (i32.const 4096))
    (data (i32.const 512) "marker")
    (func (export "alloc") (param $len i32) (result i32)
        (local $ptr i32)
        (local.set $ptr (global.get $heap))
        (global.set $heap (i32.add (local.get $ptr) (local.get $len)))
        (local.get $ptr))
    (func (export "mark") (param i32)
        (call $insert (i32.const 512) (i32.const 6) (i32.const 512) (i32.const 6)))
    (func (export "mark_then_spin") (param i32)
        (call $insert (i32.const 512) (i32.const 6) (i32.const 512) (i32.const 6))
        (loop $forever (br $forever))))"#;

/// Forwards UTF-8 text to the host log sink.
pub const LOGGER: &str = r#"(module
    (import "log" "write" (func $log (param i32 i32)))
    (memory (export "memory") 1 16)
    (global $heap (mut i32) (i32.const 4096))
    (data (i32.const 512) "hello from guest")
    (func (export "alloc") (param $len i32) (result i32)
        (local $ptr i32)
        (local.set $ptr (global.get $heap))
        (global.set $heap (i32.add (local.get $ptr) (local.get $len)))
        (local.get $ptr))
    (func (export "speak") (param i32)
        (call $log (i32.const 512) (i32.const 16))))"#;

/// Binds a new account to the contract id given in params (32 bytes).
pub const DEPLOYER: &str = r#"(module
    (import "contract" "deploy" (func $deploy (param i32 i32) (result i64)))
    (import "contract" "set_result" (func $set_result (param i32 i32)))
    (memory (export "memory") 1 16)
    (global $heap (mut i32) (i32.const 4096))
    (func (export "alloc") (param $len i32) (result i32)
        (local $ptr i32)
        (local.set $ptr (global.get $heap))
        (global.set $heap (i32.add (local.get $ptr) (local.get $len)))
        (local.get $ptr))
    (func (export "spawn") (param $ctx i32)
        (local $res i64)
        (memory.copy (i32.const 1024)
            (i32.add (local.get $ctx) (i32.const 114)) (i32.const 32))
        (i32.store (i32.const 1056) (i32.const 0))
        (local.set $res (call $deploy (i32.const 1024) (i32.const 36)))
        (call $set_result
            (i32.wrap_i64 (i64.shr_u (local.get $res) (i64.const 32)))
            (i32.wrap_i64 (i64.and (local.get $res) (i64.const 0xffffffff))))))"#;
