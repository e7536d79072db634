//! Engine construction and the call orchestrator.
//!
//! A [`Runtime`] owns the wasmtime engine, the linker carrying the host
//! import surface, the module cache and the validator. The handle is cheap
//! to clone and safe to share across threads; each invocation gets its own
//! store and instance, so callers may drive calls in parallel.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use wasmtime::{Engine, Linker, Module, OptLevel};

use basalt_types::ContractId;

use crate::cache::ModuleCache;
use crate::call_context::CallContext;
use crate::contract::{CallInfo, ContractInstance, StoreData};
use crate::error::{RuntimeError, ValidationError};
use crate::imports;
use crate::limits::ResourceLimits;
use crate::rules::SecurityRule;
use crate::state::StateManager;
use crate::validator::Validator;

/// Construction-time configuration of the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Module cache budget in estimated bytes
    pub contract_cache_size: usize,

    /// Resource bounds applied by the validator
    pub limits: ResourceLimits,

    /// Whether the built-in default security rules apply
    pub default_rules: bool,

    /// Additional rules, applied after the defaults in registration order
    #[serde(skip)]
    pub custom_rules: Vec<SecurityRule>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            contract_cache_size: 10 * 1024 * 1024, // 10 MiB
            limits: ResourceLimits::default(),
            default_rules: true,
            custom_rules: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_cache_size(mut self, bytes: usize) -> Self {
        self.contract_cache_size = bytes;
        self
    }

    pub fn with_rule(mut self, rule: SecurityRule) -> Self {
        self.custom_rules.push(rule);
        self
    }
}

/// Result of a completed top-level contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// Bytes the guest reported through `contract::set_result`
    pub data: Bytes,
    /// Fuel left in the invocation's budget on return
    pub fuel_remaining: u64,
}

struct RuntimeInner {
    engine: Engine,
    linker: Linker<StoreData>,
    cache: ModuleCache,
    validator: Validator,
}

/// The contract execution engine. Cloning shares the engine, linker, cache
/// and policy.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let mut wasm_config = wasmtime::Config::new();
        wasm_config
            .consume_fuel(true)
            .epoch_interruption(true)
            .wasm_bulk_memory(true)
            .wasm_multi_value(true)
            .wasm_reference_types(true)
            .cranelift_nan_canonicalization(true)
            .cranelift_opt_level(OptLevel::Speed);

        let engine = Engine::new(&wasm_config).map_err(|e| {
            RuntimeError::Instance(ValidationError::new("failed to create engine").with_cause(e))
        })?;

        let mut linker = Linker::new(&engine);
        imports::register(&mut linker).map_err(|e| {
            RuntimeError::Instance(
                ValidationError::new("failed to register host imports").with_cause(e),
            )
        })?;

        let mut validator = Validator::new(config.limits);
        if !config.default_rules {
            validator = validator.without_default_rules();
        }
        for rule in config.custom_rules {
            validator = validator.with_rule(rule);
        }

        tracing::info!(
            cache_size = config.contract_cache_size,
            "contract runtime initialized"
        );

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                engine,
                linker,
                cache: ModuleCache::new(config.contract_cache_size),
                validator,
            }),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    pub(crate) fn linker(&self) -> &Linker<StoreData> {
        &self.inner.linker
    }

    /// A call context that fills unset fields of every call from `defaults`.
    pub fn with_defaults(&self, defaults: CallInfo) -> CallContext {
        CallContext::new(self.clone(), defaults)
    }

    /// Top-level entry point: resolve the contract, fetch or build the
    /// module, instantiate, transfer any attached value, marshal parameters
    /// and dispatch the named entry point.
    pub fn call_contract(&self, call: CallInfo) -> Result<CallOutcome, RuntimeError> {
        let (result, fuel_remaining) = self.call_with_remaining(call);
        result.map(|data| CallOutcome {
            data,
            fuel_remaining,
        })
    }

    /// Like [`Self::call_contract`] but always reports remaining fuel so
    /// nested callers can credit it back, error or not. When the call fails
    /// before a store exists the whole budget is unspent.
    pub(crate) fn call_with_remaining(&self, call: CallInfo) -> (Result<Bytes, RuntimeError>, u64) {
        let unspent = call.fuel;
        tracing::debug!(
            contract = %call.contract,
            function = %call.function,
            fuel = call.fuel,
            value = call.value,
            "calling contract"
        );
        match self.prepare(call) {
            Ok(instance) => instance.call(),
            Err(err) => (Err(err), unspent),
        }
    }

    fn prepare(&self, call: CallInfo) -> Result<ContractInstance, RuntimeError> {
        if call.fuel == 0 {
            return Err(RuntimeError::Argument(
                "call requires a non-zero fuel budget".into(),
            ));
        }
        if call.function.is_empty() {
            return Err(RuntimeError::Argument("call names no function".into()));
        }
        let state = call.state()?.clone();
        let contract_id = state.get_account_contract(call.contract)?;
        let module = self.module(&state, contract_id)?;
        ContractInstance::new(self, &module, call)
    }

    /// Fetch a module from the cache, or pull the bytecode from state,
    /// validate and cache it.
    fn module(
        &self,
        state: &Arc<dyn StateManager>,
        contract_id: ContractId,
    ) -> Result<Module, RuntimeError> {
        if let Some(module) = self.inner.cache.get(&contract_id) {
            tracing::debug!(contract_id = %contract_id, "module cache hit");
            return Ok(module);
        }
        let bytecode = state.get_contract_bytes(contract_id)?;
        let module = self.inner.validator.validate(&self.inner.engine, &bytecode)?;
        self.inner.cache.put(contract_id, module.clone(), bytecode.len());
        tracing::debug!(
            contract_id = %contract_id,
            size = bytecode.len(),
            "compiled and cached contract module"
        );
        Ok(module)
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &ModuleCache {
        &self.inner.cache
    }
}
