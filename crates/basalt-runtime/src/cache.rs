//! Size-bounded LRU cache of validated contract modules.
//!
//! The cache is the only component holding strong references to compiled
//! modules. Entries are weighed by an estimate (fixed per-module overhead
//! plus bytecode length) rather than by serializing the module. Eviction is
//! strict LRU on insertion; concurrent probes may race to a double compile,
//! which converges on the last insert.

use lru::LruCache;
use parking_lot::Mutex;
use wasmtime::Module;

use basalt_types::ContractId;

/// Estimated fixed overhead of a compiled module beyond its bytecode.
const MODULE_OVERHEAD: usize = 16 * 1024;

struct CachedModule {
    module: Module,
    weight: usize,
}

struct Inner {
    entries: LruCache<ContractId, CachedModule>,
    total_weight: usize,
}

/// Concurrent weighted LRU from contract id to compiled module.
pub struct ModuleCache {
    inner: Mutex<Inner>,
    max_weight: usize,
}

impl ModuleCache {
    /// A cache holding at most `max_weight` estimated bytes.
    pub fn new(max_weight: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_weight: 0,
            }),
            max_weight,
        }
    }

    /// Fetch a module, refreshing its recency. Modules are internally
    /// reference-counted, so the returned clone is cheap.
    pub fn get(&self, id: &ContractId) -> Option<Module> {
        let mut inner = self.inner.lock();
        inner.entries.get(id).map(|cached| cached.module.clone())
    }

    /// Insert a module weighed by its bytecode length, evicting least
    /// recently used entries until the budget holds. Entries heavier than
    /// the whole budget are not cached.
    pub fn put(&self, id: ContractId, module: Module, bytecode_len: usize) {
        let weight = ContractId::LEN + MODULE_OVERHEAD + bytecode_len;
        if weight > self.max_weight {
            tracing::debug!(contract_id = %id, weight, "module too large to cache");
            return;
        }

        let mut inner = self.inner.lock();
        if let Some(previous) = inner.entries.pop(&id) {
            inner.total_weight -= previous.weight;
        }
        inner.entries.push(id, CachedModule { module, weight });
        inner.total_weight += weight;

        while inner.total_weight > self.max_weight {
            match inner.entries.pop_lru() {
                Some((evicted_id, evicted)) => {
                    inner.total_weight -= evicted.weight;
                    tracing::debug!(contract_id = %evicted_id, "evicted contract module");
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current total estimated weight of all entries.
    pub fn weight(&self) -> usize {
        self.inner.lock().total_weight
    }
}
