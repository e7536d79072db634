//! Host import surface exposed to guest code through the linker.
//!
//! Four flat modules: `contract` (nested calls, result reporting, fuel,
//! deployment), `log` (diagnostic sink), `balance` (queries and transfers)
//! and `state` (key/value access scoped to the executing contract).
//!
//! Variable-length host-to-guest payloads travel through the guest `alloc`
//! export: the host allocates in guest memory, copies the bytes, and returns
//! `offset << 32 | len` packed into an i64. `-1` signals absent values and
//! failed nested calls so guests can observe and handle them.

use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};
use bytes::Bytes;
use wasmtime::{Caller, Extern, Linker, Memory};

use basalt_types::{Address, ContractId};

use crate::contract::{add_fuel, consume_fuel, remaining_fuel, CallInfo, StoreData};
use crate::error::{ExecutionError, RuntimeError, ValidationError};
use crate::state::{Mutable, PrefixedState, StateManager};
use crate::{ALLOC_EXPORT, MEMORY_EXPORT};

/// Wire layout of the `contract::call_contract` argument buffer.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CallContractArgs {
    pub contract: Address,
    pub function: String,
    pub params: Vec<u8>,
    pub fuel: u64,
    pub value: u64,
}

/// Wire layout of the `contract::deploy` argument buffer.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DeployArgs {
    pub contract_id: ContractId,
    pub creation_data: Vec<u8>,
}

/// Register all four host modules. The contract module goes first since the
/// others assume a registered runtime back-reference in the store data.
pub(crate) fn register(linker: &mut Linker<StoreData>) -> wasmtime::Result<()> {
    register_contract_module(linker)?;
    register_log_module(linker)?;
    register_balance_module(linker)?;
    register_state_module(linker)?;
    Ok(())
}

fn register_contract_module(linker: &mut Linker<StoreData>) -> wasmtime::Result<()> {
    linker.func_wrap(
        "contract",
        "call_contract",
        |mut caller: Caller<'_, StoreData>, args_ptr: i32, args_len: i32| -> wasmtime::Result<i64> {
            let raw = read_bytes(&mut caller, args_ptr, args_len)?;
            let args: CallContractArgs = borsh::from_slice(&raw).map_err(|e| {
                host_err(RuntimeError::Argument(format!(
                    "malformed call_contract arguments: {e}"
                )))
            })?;

            // Reserve the child's budget from the caller. A shortfall is
            // observable by the guest rather than fatal.
            match consume_fuel(&mut caller, args.fuel) {
                Ok(()) => {}
                Err(RuntimeError::Execution(ExecutionError::OutOfFuel)) => return Ok(-1),
                Err(other) => return Err(host_err(other)),
            }

            let (runtime, parent) = {
                let data = caller.data();
                (data.runtime.clone(), data.call.clone())
            };
            let child = CallInfo {
                state: parent.state.clone(),
                // The executing contract is the caller of the nested
                // invocation; attached value moves from its balance.
                actor: parent.contract,
                contract: args.contract,
                function: args.function,
                params: Bytes::from(args.params),
                fuel: args.fuel,
                height: parent.height,
                timestamp: parent.timestamp,
                action_id: parent.action_id,
                value: args.value,
            };

            let (result, child_remaining) = runtime.call_with_remaining(child);
            // Unused child fuel flows back to the parent, error or not.
            add_fuel(&mut caller, child_remaining).map_err(host_err)?;

            match result {
                Ok(data) => write_to_guest(&mut caller, &data),
                Err(err) => {
                    tracing::debug!(error = %err, "nested contract call failed");
                    Ok(-1)
                }
            }
        },
    )?;

    linker.func_wrap(
        "contract",
        "set_result",
        |mut caller: Caller<'_, StoreData>, ptr: i32, len: i32| -> wasmtime::Result<()> {
            let bytes = read_bytes(&mut caller, ptr, len)?;
            caller.data_mut().result = Some(bytes);
            Ok(())
        },
    )?;

    linker.func_wrap(
        "contract",
        "remaining_fuel",
        |mut caller: Caller<'_, StoreData>| -> wasmtime::Result<i64> {
            Ok(remaining_fuel(&mut caller).map_err(host_err)? as i64)
        },
    )?;

    linker.func_wrap(
        "contract",
        "consume_fuel",
        |mut caller: Caller<'_, StoreData>, amount: i64| -> wasmtime::Result<()> {
            consume_fuel(&mut caller, amount as u64).map_err(host_err)
        },
    )?;

    linker.func_wrap(
        "contract",
        "deploy",
        |mut caller: Caller<'_, StoreData>, args_ptr: i32, args_len: i32| -> wasmtime::Result<i64> {
            let raw = read_bytes(&mut caller, args_ptr, args_len)?;
            let args: DeployArgs = borsh::from_slice(&raw).map_err(|e| {
                host_err(RuntimeError::Argument(format!("malformed deploy arguments: {e}")))
            })?;
            let state = caller.data().call.state().map_err(host_err)?.clone();
            let address = state
                .new_account_with_contract(args.contract_id, &args.creation_data)
                .map_err(|e| host_err(RuntimeError::State(e)))?;
            write_to_guest(&mut caller, address.as_bytes())
        },
    )?;

    Ok(())
}

fn register_log_module(linker: &mut Linker<StoreData>) -> wasmtime::Result<()> {
    linker.func_wrap(
        "log",
        "write",
        |mut caller: Caller<'_, StoreData>, ptr: i32, len: i32| -> wasmtime::Result<()> {
            let bytes = read_bytes(&mut caller, ptr, len)?;
            let message = String::from_utf8_lossy(&bytes);
            let contract = caller.data().call.contract;
            tracing::info!(target: "basalt::guest", %contract, "{message}");
            Ok(())
        },
    )?;
    Ok(())
}

fn register_balance_module(linker: &mut Linker<StoreData>) -> wasmtime::Result<()> {
    linker.func_wrap(
        "balance",
        "get",
        |mut caller: Caller<'_, StoreData>, addr_ptr: i32| -> wasmtime::Result<i64> {
            let address = read_address(&mut caller, addr_ptr)?;
            let state = caller.data().call.state().map_err(host_err)?.clone();
            let balance = state
                .get_balance(address)
                .map_err(|e| host_err(RuntimeError::Balance(e)))?;
            Ok(balance as i64)
        },
    )?;

    linker.func_wrap(
        "balance",
        "transfer",
        |mut caller: Caller<'_, StoreData>,
         from_ptr: i32,
         to_ptr: i32,
         amount: i64|
         -> wasmtime::Result<i32> {
            let from = read_address(&mut caller, from_ptr)?;
            let to = read_address(&mut caller, to_ptr)?;
            let state = caller.data().call.state().map_err(host_err)?.clone();
            match state.transfer_balance(from, to, amount as u64) {
                Ok(()) => Ok(1),
                Err(err) => {
                    tracing::debug!(%from, %to, amount, error = %err, "guest transfer refused");
                    Ok(0)
                }
            }
        },
    )?;

    Ok(())
}

fn register_state_module(linker: &mut Linker<StoreData>) -> wasmtime::Result<()> {
    linker.func_wrap(
        "state",
        "get",
        |mut caller: Caller<'_, StoreData>, key_ptr: i32, key_len: i32| -> wasmtime::Result<i64> {
            let key = read_bytes(&mut caller, key_ptr, key_len)?;
            let (state, contract) = state_handle(&caller)?;
            let value = {
                let view = PrefixedState::new(contract, state.contract_state(contract));
                view.get_value(&key).map_err(|e| host_err(RuntimeError::State(e)))?
            };
            match value {
                Some(value) => write_to_guest(&mut caller, &value),
                None => Ok(-1),
            }
        },
    )?;

    linker.func_wrap(
        "state",
        "insert",
        |mut caller: Caller<'_, StoreData>,
         key_ptr: i32,
         key_len: i32,
         val_ptr: i32,
         val_len: i32|
         -> wasmtime::Result<()> {
            let key = read_bytes(&mut caller, key_ptr, key_len)?;
            let value = read_bytes(&mut caller, val_ptr, val_len)?;
            let (state, contract) = state_handle(&caller)?;
            let mut view = PrefixedState::new(contract, state.contract_state(contract));
            view.insert(&key, value)
                .map_err(|e| host_err(RuntimeError::State(e)))
        },
    )?;

    linker.func_wrap(
        "state",
        "remove",
        |mut caller: Caller<'_, StoreData>, key_ptr: i32, key_len: i32| -> wasmtime::Result<i64> {
            let key = read_bytes(&mut caller, key_ptr, key_len)?;
            let previous = {
                let (state, contract) = state_handle(&caller)?;
                let mut view = PrefixedState::new(contract, state.contract_state(contract));
                view.remove(&key).map_err(|e| host_err(RuntimeError::State(e)))?
            };
            match previous {
                Some(value) => write_to_guest(&mut caller, &value),
                None => Ok(-1),
            }
        },
    )?;

    Ok(())
}

fn state_handle(
    caller: &Caller<'_, StoreData>,
) -> wasmtime::Result<(Arc<dyn StateManager>, Address)> {
    let data = caller.data();
    Ok((data.call.state().map_err(host_err)?.clone(), data.call.contract))
}

fn guest_memory(caller: &mut Caller<'_, StoreData>) -> wasmtime::Result<Memory> {
    match caller.get_export(MEMORY_EXPORT) {
        Some(Extern::Memory(memory)) => Ok(memory),
        _ => Err(host_err(RuntimeError::Instance(ValidationError::for_rule(
            "instance",
            format!("missing required export `{MEMORY_EXPORT}`"),
        )))),
    }
}

fn read_bytes(
    caller: &mut Caller<'_, StoreData>,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<Vec<u8>> {
    let memory = guest_memory(caller)?;
    let start = ptr as u32 as usize;
    let end = start
        .checked_add(len as u32 as usize)
        .ok_or_else(out_of_bounds)?;
    memory
        .data(&*caller)
        .get(start..end)
        .map(<[u8]>::to_vec)
        .ok_or_else(out_of_bounds)
}

fn read_address(caller: &mut Caller<'_, StoreData>, ptr: i32) -> wasmtime::Result<Address> {
    let bytes = read_bytes(caller, ptr, Address::LEN as i32)?;
    Address::from_slice(&bytes)
        .map_err(|e| host_err(RuntimeError::Argument(format!("bad address from guest: {e}"))))
}

/// Allocate in guest memory through the guest `alloc` export, copy `data`
/// there, and pack the location into `offset << 32 | len`.
fn write_to_guest(caller: &mut Caller<'_, StoreData>, data: &[u8]) -> wasmtime::Result<i64> {
    if data.is_empty() {
        return Ok(0);
    }
    let alloc = match caller.get_export(ALLOC_EXPORT) {
        Some(Extern::Func(func)) => func,
        _ => {
            return Err(host_err(RuntimeError::Instance(ValidationError::for_rule(
                "instance",
                format!("missing required export `{ALLOC_EXPORT}`"),
            ))))
        }
    };
    let alloc = alloc.typed::<i32, i32>(&*caller).map_err(|e| {
        host_err(RuntimeError::Instance(
            ValidationError::for_rule(
                "instance",
                format!("allocation export `{ALLOC_EXPORT}` has the wrong signature"),
            )
            .with_cause(e),
        ))
    })?;

    let len = i32::try_from(data.len()).map_err(|_| {
        host_err(RuntimeError::Argument(
            "host payload exceeds addressable guest memory".into(),
        ))
    })?;
    let offset = alloc.call(&mut *caller, len)?;

    let memory = guest_memory(caller)?;
    memory
        .write(&mut *caller, offset as u32 as usize, data)
        .map_err(|_| out_of_bounds())?;

    Ok(((offset as u32 as i64) << 32) | data.len() as i64)
}

fn host_err(err: impl Into<RuntimeError>) -> wasmtime::Error {
    wasmtime::Error::new(err.into())
}

fn out_of_bounds() -> wasmtime::Error {
    host_err(ExecutionError::Trap(
        "guest pointer outside linear memory".into(),
    ))
}
