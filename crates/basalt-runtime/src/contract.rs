//! Per-invocation call descriptors, the guest-facing context prefix, and the
//! instantiated contract wrapper.

use std::fmt;
use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};
use bytes::Bytes;
use wasmtime::{AsContextMut, Store, Val, ValType};

use basalt_types::{ActionId, Address};

use crate::error::{ExecutionError, RuntimeError, ValidationError};
use crate::runtime::Runtime;
use crate::state::StateManager;
use crate::{ALLOC_EXPORT, MEMORY_EXPORT};

/// Complete descriptor of a single contract invocation.
///
/// Constructed through [`crate::CallContext`]; immutable once execution
/// starts. Discarded on return.
#[derive(Clone, Default)]
pub struct CallInfo {
    /// The state the contract will run against
    pub state: Option<Arc<dyn StateManager>>,

    /// The address that originated the call; during nested calls this is the
    /// immediate caller contract, not the top-level initiator
    pub actor: Address,

    /// The account of the contract being called
    pub contract: Address,

    /// The name of the exported function being invoked
    pub function: String,

    /// Serialized parameters passed to the called function
    pub params: Bytes,

    /// Maximum fuel this call may consume
    pub fuel: u64,

    /// Chain height at the time of the call
    pub height: u64,

    /// Chain timestamp at the time of the call
    pub timestamp: u64,

    /// The action that triggered this call
    pub action_id: ActionId,

    /// Value transferred from actor to contract before the guest runs
    pub value: u64,
}

impl CallInfo {
    pub(crate) fn state(&self) -> Result<&Arc<dyn StateManager>, RuntimeError> {
        self.state
            .as_ref()
            .ok_or_else(|| RuntimeError::Argument("call info carries no state manager".into()))
    }
}

impl fmt::Debug for CallInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallInfo")
            .field("actor", &self.actor)
            .field("contract", &self.contract)
            .field("function", &self.function)
            .field("params_len", &self.params.len())
            .field("fuel", &self.fuel)
            .field("height", &self.height)
            .field("timestamp", &self.timestamp)
            .field("action_id", &self.action_id)
            .field("value", &self.value)
            .finish()
    }
}

/// Guest-visible prefix written ahead of the caller-supplied params.
///
/// Borsh gives the fixed little-endian integer encoding the ABI requires;
/// addresses and the action id serialize as raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ContractContext {
    pub contract: Address,
    pub actor: Address,
    pub height: u64,
    pub timestamp: u64,
    pub action_id: ActionId,
}

impl ContractContext {
    /// Serialized size: 33 + 33 + 8 + 8 + 32.
    pub const SERIALIZED_LEN: usize = 114;

    pub fn from_call(call: &CallInfo) -> Self {
        Self {
            contract: call.contract,
            actor: call.actor,
            height: call.height,
            timestamp: call.timestamp,
            action_id: call.action_id,
        }
    }
}

/// Host data carried by each execution store.
pub(crate) struct StoreData {
    pub call: CallInfo,
    pub runtime: Runtime,
    pub result: Option<Vec<u8>>,
}

/// A validated module bound to a fresh store; lives for one invocation.
pub(crate) struct ContractInstance {
    instance: wasmtime::Instance,
    store: Store<StoreData>,
}

impl ContractInstance {
    /// Instantiate the module into a fresh store carrying the call.
    ///
    /// The store starts with the call's fuel budget and an epoch deadline of
    /// one tick. Both conventional exports must be present.
    pub(crate) fn new(
        runtime: &Runtime,
        module: &wasmtime::Module,
        call: CallInfo,
    ) -> Result<Self, RuntimeError> {
        let fuel = call.fuel;
        let mut store = Store::new(
            runtime.engine(),
            StoreData {
                call,
                runtime: runtime.clone(),
                result: None,
            },
        );
        store
            .set_fuel(fuel)
            .map_err(|e| RuntimeError::Argument(format!("fuel metering unavailable: {e}")))?;
        store.epoch_deadline_trap();
        store.set_epoch_deadline(1);

        let instance = runtime.linker().instantiate(&mut store, module).map_err(|e| {
            RuntimeError::Instance(
                ValidationError::for_rule("instance", "failed to instantiate module").with_cause(e),
            )
        })?;

        if instance.get_memory(&mut store, MEMORY_EXPORT).is_none() {
            return Err(RuntimeError::Instance(ValidationError::for_rule(
                "instance",
                format!("missing required export `{MEMORY_EXPORT}`"),
            )));
        }
        if instance
            .get_typed_func::<i32, i32>(&mut store, ALLOC_EXPORT)
            .is_err()
        {
            return Err(RuntimeError::Instance(ValidationError::for_rule(
                "instance",
                format!("missing required export `{ALLOC_EXPORT}`"),
            )));
        }

        Ok(Self { instance, store })
    }

    /// Run the call to completion. Always reports the fuel left in the store
    /// so callers can credit it back, error or not.
    pub(crate) fn call(mut self) -> (Result<Bytes, RuntimeError>, u64) {
        let result = self.run();
        let remaining = self.store.get_fuel().unwrap_or(0);
        (result, remaining)
    }

    fn run(&mut self) -> Result<Bytes, RuntimeError> {
        let call = self.store.data().call.clone();

        // Attached value moves before the guest entry point runs; a failed
        // transfer aborts the call with no side effects.
        if call.value > 0 {
            call.state()?
                .transfer_balance(call.actor, call.contract, call.value)?;
        }

        let context = ContractContext::from_call(&call);
        let mut buffer = borsh::to_vec(&context)
            .map_err(|e| RuntimeError::Argument(format!("context serialization failed: {e}")))?;
        buffer.extend_from_slice(&call.params);

        let offset = self.write_to_memory(&buffer)?;

        let function = self
            .instance
            .get_func(&mut self.store, &call.function)
            .ok_or_else(|| RuntimeError::UnknownFunction(call.function.clone()))?;

        let mut results = result_slots(&function.ty(&self.store))?;
        function
            .call(&mut self.store, &[Val::I32(offset)], &mut results)
            .map_err(RuntimeError::from_wasm)?;

        let data = self.store.data_mut().result.take();
        Ok(data.map(Bytes::from).unwrap_or_default())
    }

    /// Place a payload into guest memory through the guest allocator and
    /// return its offset.
    fn write_to_memory(&mut self, data: &[u8]) -> Result<i32, RuntimeError> {
        let alloc = self
            .instance
            .get_typed_func::<i32, i32>(&mut self.store, ALLOC_EXPORT)
            .map_err(|e| {
                RuntimeError::Instance(
                    ValidationError::for_rule(
                        "instance",
                        format!("allocation export `{ALLOC_EXPORT}` has the wrong signature"),
                    )
                    .with_cause(e),
                )
            })?;

        let len = i32::try_from(data.len()).map_err(|_| {
            RuntimeError::Argument("parameter buffer exceeds addressable guest memory".into())
        })?;
        let offset = alloc
            .call(&mut self.store, len)
            .map_err(RuntimeError::from_wasm)?;

        let memory = self
            .instance
            .get_memory(&mut self.store, MEMORY_EXPORT)
            .ok_or_else(|| {
                RuntimeError::Instance(ValidationError::for_rule(
                    "instance",
                    format!("missing required export `{MEMORY_EXPORT}`"),
                ))
            })?;
        memory
            .write(&mut self.store, offset as u32 as usize, data)
            .map_err(|e| ExecutionError::Trap(format!("guest allocator returned bad offset: {e}")))?;

        Ok(offset)
    }
}

fn result_slots(ty: &wasmtime::FuncType) -> Result<Vec<Val>, RuntimeError> {
    ty.results()
        .map(|result| match result {
            ValType::I32 => Ok(Val::I32(0)),
            ValType::I64 => Ok(Val::I64(0)),
            ValType::F32 => Ok(Val::F32(0)),
            ValType::F64 => Ok(Val::F64(0)),
            other => Err(RuntimeError::Argument(format!(
                "unsupported entry point result type {other}"
            ))),
        })
        .collect()
}

/// Fuel left in the store.
pub(crate) fn remaining_fuel(ctx: &mut impl AsContextMut) -> Result<u64, RuntimeError> {
    ctx.as_context_mut().get_fuel().map_err(fuel_unavailable)
}

/// Credit fuel back; saturates rather than wrapping.
pub(crate) fn add_fuel(ctx: &mut impl AsContextMut, amount: u64) -> Result<(), RuntimeError> {
    let mut store = ctx.as_context_mut();
    let remaining = store.get_fuel().map_err(fuel_unavailable)?;
    store
        .set_fuel(remaining.saturating_add(amount))
        .map_err(fuel_unavailable)
}

/// Deduct fuel, failing fast with out-of-fuel and no partial deduction.
pub(crate) fn consume_fuel(ctx: &mut impl AsContextMut, amount: u64) -> Result<(), RuntimeError> {
    let mut store = ctx.as_context_mut();
    let remaining = store.get_fuel().map_err(fuel_unavailable)?;
    if remaining < amount {
        return Err(ExecutionError::OutOfFuel.into());
    }
    store.set_fuel(remaining - amount).map_err(fuel_unavailable)
}

fn fuel_unavailable(err: wasmtime::Error) -> RuntimeError {
    RuntimeError::Argument(format!("fuel metering unavailable: {err}"))
}
