//! Basalt Runtime - sandboxed WebAssembly smart-contract execution.
//!
//! This crate provides:
//! - Module validation against resource limits and security rules
//! - A weighted LRU cache of compiled modules
//! - Fuel-metered, epoch-bounded execution stores
//! - The host import surface (contract control, logging, balance, state)
//! - A call orchestrator handling nested contract-to-contract invocations
//!
//! State and balances stay external: embedders supply a [`StateManager`]
//! and drive calls through [`Runtime::call_contract`] or a [`CallContext`]
//! built with [`Runtime::with_defaults`].

pub mod cache;
pub mod call_context;
pub mod contract;
pub mod error;
pub mod imports;
pub mod limits;
pub mod rules;
pub mod runtime;
pub mod state;
pub mod validator;

pub use cache::ModuleCache;
pub use call_context::CallContext;
pub use contract::{CallInfo, ContractContext};
pub use error::{
    BalanceError, ExecutionError, RuntimeError, StateError, ValidationError,
};
pub use imports::{CallContractArgs, DeployArgs};
pub use limits::ResourceLimits;
pub use rules::{
    default_security_rules, deterministic_float_rule, memory_limit_rule,
    restricted_instruction_rule, RuleKind, SecurityRule,
};
pub use runtime::{CallOutcome, Runtime, RuntimeConfig};
pub use state::{Mutable, PrefixedState, StateManager};
pub use validator::Validator;

/// Name of the linear memory export every contract must provide.
pub const MEMORY_EXPORT: &str = "memory";

/// Name of the allocation function export every contract must provide.
pub const ALLOC_EXPORT: &str = "alloc";

/// Bytes per WebAssembly memory page.
pub const WASM_PAGE_SIZE: u32 = 65_536;
