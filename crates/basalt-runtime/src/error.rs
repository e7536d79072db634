//! Structured error model for validation and execution.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use basalt_types::{Address, ContractId};

type BoxedCause = Box<dyn StdError + Send + Sync + 'static>;

/// Structured rejection produced by module validation.
///
/// Carries the failing rule's name when a specific rule is responsible, and
/// preserves the underlying cause when one exists.
#[derive(Debug)]
pub struct ValidationError {
    message: String,
    rule: Option<String>,
    cause: Option<BoxedCause>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            rule: None,
            cause: None,
        }
    }

    /// An error attributed to a named validation rule.
    pub fn for_rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            rule: Some(rule.into()),
            cause: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_cause(mut self, cause: impl Into<BoxedCause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Name of the rule that failed, if attribution exists.
    pub fn rule(&self) -> Option<&str> {
        self.rule.as_deref()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.rule, &self.cause) {
            (Some(rule), Some(cause)) => {
                write!(f, "validation failed for rule {rule}: {}: {cause}", self.message)
            }
            (Some(rule), None) => write!(f, "validation failed for rule {rule}: {}", self.message),
            (None, Some(cause)) => write!(f, "validation error: {}: {cause}", self.message),
            (None, None) => write!(f, "validation error: {}", self.message),
        }
    }
}

impl StdError for ValidationError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn StdError + 'static))
    }
}

/// Errors surfaced by the external state manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("no contract associated with account {0}")]
    AccountNotFound(Address),

    #[error("unknown contract id {0}")]
    ContractNotFound(ContractId),

    #[error("state backend error: {0}")]
    Backend(String),
}

/// Errors produced by balance queries and transfers.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BalanceError {
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },

    #[error("balance arithmetic overflow")]
    Overflow,
}

/// Failures raised while guest code is running.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("out of fuel")]
    OutOfFuel,

    #[error("execution interrupted by epoch deadline")]
    Interrupted,

    #[error("guest trap: {0}")]
    Trap(String),
}

/// Top-level error surface of the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("instance error: {0}")]
    Instance(#[source] ValidationError),

    #[error("function {0} does not exist")]
    UnknownFunction(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Balance(#[from] BalanceError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("invalid call: {0}")]
    Argument(String),
}

impl RuntimeError {
    /// Recover a structured error from a wasmtime call failure.
    ///
    /// Host imports raise `RuntimeError` through the wasmtime error chain;
    /// engine-level traps (fuel exhaustion, epoch interruption, guest traps)
    /// are mapped onto the execution kinds.
    pub(crate) fn from_wasm(err: wasmtime::Error) -> Self {
        let err = match err.downcast::<RuntimeError>() {
            Ok(runtime_err) => return runtime_err,
            Err(err) => err,
        };
        match err.downcast_ref::<wasmtime::Trap>() {
            Some(wasmtime::Trap::OutOfFuel) => ExecutionError::OutOfFuel.into(),
            Some(wasmtime::Trap::Interrupt) => ExecutionError::Interrupted.into(),
            Some(trap) => ExecutionError::Trap(trap.to_string()).into(),
            None => ExecutionError::Trap(format!("{err:#}")).into(),
        }
    }
}
