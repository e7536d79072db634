//! Declarative resource bounds applied to contract modules.

use serde::{Deserialize, Serialize};

/// Constraints a WebAssembly contract must respect to be accepted.
///
/// Composed at engine construction and immutable afterwards; consumed by the
/// validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum size of contract bytecode in bytes
    pub max_contract_size: u32,

    /// Maximum number of function-typed exports and imports in a module
    pub max_functions: u32,

    /// Maximum number of imports in a module
    pub max_imports: u32,

    /// Maximum number of exports in a module
    pub max_exports: u32,

    /// Maximum number of globals in a module
    pub max_globals: u32,

    /// Maximum initial memory pages (64 KiB per page)
    pub max_initial_memory_pages: u32,

    /// Maximum memory pages after growth
    pub max_memory_pages: u32,

    /// Maximum table size
    pub max_table_size: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_contract_size: 1024 * 1024, // 1 MiB
            max_functions: 1000,
            max_imports: 100,
            max_exports: 100,
            max_globals: 100,
            max_initial_memory_pages: 4,  // 256 KiB
            max_memory_pages: 16,         // 1 MiB
            max_table_size: 10_000,
        }
    }
}
