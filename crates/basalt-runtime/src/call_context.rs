//! Fluent composition of call descriptors.
//!
//! A [`CallContext`] pairs a runtime handle with a default [`CallInfo`];
//! every `with_*` returns a new context, leaving the receiver untouched.
//! This is the sole supported way for external callers to compose a call.

use std::sync::Arc;

use bytes::Bytes;

use basalt_types::{ActionId, Address};

use crate::contract::CallInfo;
use crate::error::RuntimeError;
use crate::runtime::{CallOutcome, Runtime};
use crate::state::StateManager;

/// Runtime handle plus call defaults; cheap to clone.
#[derive(Clone)]
pub struct CallContext {
    runtime: Runtime,
    defaults: CallInfo,
}

impl CallContext {
    pub(crate) fn new(runtime: Runtime, defaults: CallInfo) -> Self {
        Self { runtime, defaults }
    }

    pub fn with_state_manager(&self, state: Arc<dyn StateManager>) -> Self {
        let mut next = self.clone();
        next.defaults.state = Some(state);
        next
    }

    pub fn with_actor(&self, actor: Address) -> Self {
        let mut next = self.clone();
        next.defaults.actor = actor;
        next
    }

    pub fn with_contract(&self, contract: Address) -> Self {
        let mut next = self.clone();
        next.defaults.contract = contract;
        next
    }

    pub fn with_function(&self, function: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.defaults.function = function.into();
        next
    }

    pub fn with_params(&self, params: impl Into<Bytes>) -> Self {
        let mut next = self.clone();
        next.defaults.params = params.into();
        next
    }

    pub fn with_fuel(&self, fuel: u64) -> Self {
        let mut next = self.clone();
        next.defaults.fuel = fuel;
        next
    }

    pub fn with_height(&self, height: u64) -> Self {
        let mut next = self.clone();
        next.defaults.height = height;
        next
    }

    pub fn with_timestamp(&self, timestamp: u64) -> Self {
        let mut next = self.clone();
        next.defaults.timestamp = timestamp;
        next
    }

    pub fn with_action_id(&self, action_id: ActionId) -> Self {
        let mut next = self.clone();
        next.defaults.action_id = action_id;
        next
    }

    pub fn with_value(&self, value: u64) -> Self {
        let mut next = self.clone();
        next.defaults.value = value;
        next
    }

    /// Dispatch a call, filling unset fields from the context defaults.
    pub fn call_contract(&self, call: CallInfo) -> Result<CallOutcome, RuntimeError> {
        self.runtime.call_contract(self.merge(call))
    }

    pub(crate) fn merge(&self, mut call: CallInfo) -> CallInfo {
        if call.state.is_none() {
            call.state = self.defaults.state.clone();
        }
        if call.actor.is_zero() {
            call.actor = self.defaults.actor;
        }
        if call.contract.is_zero() {
            call.contract = self.defaults.contract;
        }
        if call.function.is_empty() {
            call.function = self.defaults.function.clone();
        }
        if call.params.is_empty() {
            call.params = self.defaults.params.clone();
        }
        if call.fuel == 0 {
            call.fuel = self.defaults.fuel;
        }
        if call.height == 0 {
            call.height = self.defaults.height;
        }
        if call.timestamp == 0 {
            call.timestamp = self.defaults.timestamp;
        }
        if call.action_id.is_zero() {
            call.action_id = self.defaults.action_id;
        }
        if call.value == 0 {
            call.value = self.defaults.value;
        }
        call
    }
}
