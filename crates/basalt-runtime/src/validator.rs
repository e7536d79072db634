//! Module acceptance: resource limits, type discipline, and security rules.
//!
//! Checks run in a fixed order and the first failure aborts: bytecode size,
//! parseability, entity counts, memory limits, table limits, then the rule
//! set (defaults first, customs in registration order). Instruction-level
//! rules walk the code section through `wasmparser`, so deny lists apply to
//! the opcodes a module actually uses, not only to its declared types.

use std::collections::HashSet;

use wasmtime::{Engine, ExternType, Module, ValType};

use crate::error::ValidationError;
use crate::limits::ResourceLimits;
use crate::rules::{default_security_rules, RuleKind, SecurityRule};

/// Validates raw bytecode against the configured policy.
pub struct Validator {
    limits: ResourceLimits,
    default_rules: Vec<SecurityRule>,
    custom_rules: Vec<SecurityRule>,
}

impl Validator {
    /// A validator with the built-in default rule set enabled.
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            default_rules: default_security_rules(),
            custom_rules: Vec::new(),
        }
    }

    /// Disable the built-in default rules.
    pub fn without_default_rules(mut self) -> Self {
        self.default_rules.clear();
        self
    }

    /// Register an additional rule; custom rules run after the defaults in
    /// registration order.
    pub fn with_rule(mut self, rule: SecurityRule) -> Self {
        self.custom_rules.push(rule);
        self
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Accept raw bytecode, returning the parsed module or a structured
    /// rejection attributed to the failing rule.
    pub fn validate(&self, engine: &Engine, bytes: &[u8]) -> Result<Module, ValidationError> {
        if bytes.len() > self.limits.max_contract_size as usize {
            return Err(ValidationError::for_rule(
                "contract-size",
                format!(
                    "contract size {} exceeds maximum allowed {}",
                    bytes.len(),
                    self.limits.max_contract_size
                ),
            ));
        }

        let module = Module::new(engine, bytes)
            .map_err(|e| ValidationError::for_rule("parse", "failed to parse module").with_cause(e))?;

        self.check_counts(&module)?;
        self.check_memories(&module)?;
        self.check_tables(&module)?;

        let ops_used = collect_operators(bytes)?;
        for rule in self.default_rules.iter().chain(&self.custom_rules) {
            apply_rule(&module, &ops_used, rule)?;
        }

        Ok(module)
    }

    fn check_counts(&self, module: &Module) -> Result<(), ValidationError> {
        let export_count = module.exports().len() as u32;
        if export_count > self.limits.max_exports {
            return Err(ValidationError::for_rule(
                "resource-limits",
                format!(
                    "export count {export_count} exceeds limit {}",
                    self.limits.max_exports
                ),
            ));
        }

        let import_count = module.imports().len() as u32;
        if import_count > self.limits.max_imports {
            return Err(ValidationError::for_rule(
                "resource-limits",
                format!(
                    "import count {import_count} exceeds limit {}",
                    self.limits.max_imports
                ),
            ));
        }

        let func_count = count_entities(module, |ty| matches!(ty, ExternType::Func(_)));
        if func_count > self.limits.max_functions {
            return Err(ValidationError::for_rule(
                "resource-limits",
                format!(
                    "function count {func_count} exceeds limit {}",
                    self.limits.max_functions
                ),
            ));
        }

        let global_count = count_entities(module, |ty| matches!(ty, ExternType::Global(_)));
        if global_count > self.limits.max_globals {
            return Err(ValidationError::for_rule(
                "resource-limits",
                format!(
                    "global count {global_count} exceeds limit {}",
                    self.limits.max_globals
                ),
            ));
        }

        Ok(())
    }

    fn check_memories(&self, module: &Module) -> Result<(), ValidationError> {
        let limit = u64::from(self.limits.max_memory_pages);
        for ty in declared_types(module) {
            if let ExternType::Memory(memory) = ty {
                let min = memory.minimum();
                if min > limit {
                    return Err(ValidationError::for_rule(
                        "resource-limits",
                        format!("minimum memory pages {min} exceeds limit {limit}"),
                    ));
                }
                if let Some(max) = memory.maximum() {
                    if max > limit {
                        return Err(ValidationError::for_rule(
                            "resource-limits",
                            format!("maximum memory pages {max} exceeds limit {limit}"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_tables(&self, module: &Module) -> Result<(), ValidationError> {
        let limit = u64::from(self.limits.max_table_size);
        for ty in declared_types(module) {
            if let ExternType::Table(table) = ty {
                let min = u64::from(table.minimum());
                if min > limit {
                    return Err(ValidationError::for_rule(
                        "resource-limits",
                        format!("minimum table size {min} exceeds limit {limit}"),
                    ));
                }
                if let Some(max) = table.maximum() {
                    let max = u64::from(max);
                    if max > limit {
                        return Err(ValidationError::for_rule(
                            "resource-limits",
                            format!("maximum table size {max} exceeds limit {limit}"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Exported and imported entity types, the surface the policy can see.
fn declared_types(module: &Module) -> impl Iterator<Item = ExternType> + '_ {
    module
        .exports()
        .map(|e| e.ty())
        .chain(module.imports().map(|i| i.ty()))
}

fn count_entities(module: &Module, pred: impl Fn(&ExternType) -> bool) -> u32 {
    declared_types(module).filter(|ty| pred(ty)).count() as u32
}

fn apply_rule(
    module: &Module,
    ops_used: &HashSet<&'static str>,
    rule: &SecurityRule,
) -> Result<(), ValidationError> {
    match rule.kind {
        RuleKind::Instruction => {
            check_denied_operators(ops_used, rule)?;
            check_signature_types(module, rule)
        }
        RuleKind::FloatingPoint => check_floating_point(module, ops_used, rule),
        RuleKind::Memory => {
            check_denied_operators(ops_used, rule)?;
            check_memory_growth(module, rule)
        }
        RuleKind::Custom => match &rule.predicate {
            Some(predicate) => (predicate.as_ref())(module).map_err(|e| {
                if e.rule().is_some() {
                    e
                } else {
                    ValidationError::for_rule(rule.name.clone(), "custom validation failed")
                        .with_cause(e)
                }
            }),
            None => Ok(()),
        },
    }
}

fn check_denied_operators(
    ops_used: &HashSet<&'static str>,
    rule: &SecurityRule,
) -> Result<(), ValidationError> {
    for denied in &rule.deny {
        if ops_used.contains(denied.as_str()) {
            return Err(ValidationError::for_rule(
                rule.name.clone(),
                format!("instruction {denied} is not allowed"),
            ));
        }
    }
    Ok(())
}

/// Type discipline: every function parameter and result must be a permitted
/// value kind under the rule's deny list.
fn check_signature_types(module: &Module, rule: &SecurityRule) -> Result<(), ValidationError> {
    for export in module.exports() {
        if let Some(func) = export.ty().func() {
            for ty in func.params().chain(func.results()) {
                if rule.denies(val_type_name(&ty)) {
                    return Err(ValidationError::for_rule(
                        rule.name.clone(),
                        format!(
                            "invalid value type {} in export {}",
                            val_type_name(&ty),
                            export.name()
                        ),
                    ));
                }
            }
        }
    }
    for import in module.imports() {
        if let Some(func) = import.ty().func() {
            for ty in func.params().chain(func.results()) {
                if rule.denies(val_type_name(&ty)) {
                    return Err(ValidationError::for_rule(
                        rule.name.clone(),
                        format!(
                            "invalid value type {} in import {}::{}",
                            val_type_name(&ty),
                            import.module(),
                            import.name()
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn check_floating_point(
    module: &Module,
    ops_used: &HashSet<&'static str>,
    rule: &SecurityRule,
) -> Result<(), ValidationError> {
    for op in ops_used {
        if !is_float_op(op) {
            continue;
        }
        if rule.denies(op) {
            return Err(ValidationError::for_rule(
                rule.name.clone(),
                format!("floating point operation {op} is not allowed"),
            ));
        }
        if !rule.allows(op) {
            return Err(ValidationError::for_rule(
                rule.name.clone(),
                format!("floating point operation {op} is not in the allow list"),
            ));
        }
    }

    // With no allow list the rule is a total float ban, including signatures.
    if rule.allow.is_empty() {
        for ty in declared_types(module) {
            if let ExternType::Func(func) = ty {
                for val in func.params().chain(func.results()) {
                    if matches!(val, ValType::F32 | ValType::F64) {
                        return Err(ValidationError::for_rule(
                            rule.name.clone(),
                            "floating point operations not allowed",
                        ));
                    }
                }
            }
        }
    }

    Ok(())
}

fn check_memory_growth(module: &Module, rule: &SecurityRule) -> Result<(), ValidationError> {
    if !rule.denies("memory.grow") {
        return Ok(());
    }
    // With growth denied, a memory without a declared maximum is unbounded.
    for ty in declared_types(module) {
        if let ExternType::Memory(memory) = ty {
            if memory.maximum().is_none() {
                return Err(ValidationError::for_rule(
                    rule.name.clone(),
                    "unbounded memory growth not allowed",
                ));
            }
        }
    }
    Ok(())
}

fn val_type_name(ty: &ValType) -> &'static str {
    match ty {
        ValType::I32 => "i32",
        ValType::I64 => "i64",
        ValType::F32 => "f32",
        ValType::F64 => "f64",
        ValType::V128 => "v128",
        ValType::Ref(_) => "ref",
    }
}

fn is_float_op(name: &str) -> bool {
    name.starts_with("f32.") || name.starts_with("f64.")
}

/// Walk the code section and collect the canonical names of the operators
/// the rule vocabulary can reference. Unknown operators are not collected;
/// they can only be rejected by type-level checks.
fn collect_operators(bytes: &[u8]) -> Result<HashSet<&'static str>, ValidationError> {
    let mut used = HashSet::new();
    for payload in wasmparser::Parser::new(0).parse_all(bytes) {
        let payload = payload
            .map_err(|e| ValidationError::for_rule("parse", "malformed module").with_cause(e))?;
        if let wasmparser::Payload::CodeSectionEntry(body) = payload {
            let mut reader = body
                .get_operators_reader()
                .map_err(|e| ValidationError::for_rule("parse", "malformed code section").with_cause(e))?;
            while !reader.eof() {
                let op = reader
                    .read()
                    .map_err(|e| ValidationError::for_rule("parse", "malformed code section").with_cause(e))?;
                if let Some(name) = operator_name(&op) {
                    used.insert(name);
                }
            }
        }
    }
    Ok(used)
}

fn operator_name(op: &wasmparser::Operator<'_>) -> Option<&'static str> {
    use wasmparser::Operator as Op;
    Some(match op {
        Op::Unreachable => "unreachable",
        Op::MemoryGrow { .. } => "memory.grow",
        Op::MemorySize { .. } => "memory.size",
        Op::DataDrop { .. } => "data.drop",
        Op::ElemDrop { .. } => "elem.drop",
        Op::TableGet { .. } => "table.get",
        Op::TableSet { .. } => "table.set",
        Op::TableSize { .. } => "table.size",
        Op::TableGrow { .. } => "table.grow",
        Op::TableFill { .. } => "table.fill",
        Op::TableInit { .. } => "table.init",
        Op::TableCopy { .. } => "table.copy",
        Op::F32Abs => "f32.abs",
        Op::F32Neg => "f32.neg",
        Op::F32Ceil => "f32.ceil",
        Op::F32Floor => "f32.floor",
        Op::F32Trunc => "f32.trunc",
        Op::F32Nearest => "f32.nearest",
        Op::F32Sqrt => "f32.sqrt",
        Op::F32Add => "f32.add",
        Op::F32Sub => "f32.sub",
        Op::F32Mul => "f32.mul",
        Op::F32Div => "f32.div",
        Op::F32Min => "f32.min",
        Op::F32Max => "f32.max",
        Op::F32Copysign => "f32.copysign",
        Op::F64Abs => "f64.abs",
        Op::F64Neg => "f64.neg",
        Op::F64Ceil => "f64.ceil",
        Op::F64Floor => "f64.floor",
        Op::F64Trunc => "f64.trunc",
        Op::F64Nearest => "f64.nearest",
        Op::F64Sqrt => "f64.sqrt",
        Op::F64Add => "f64.add",
        Op::F64Sub => "f64.sub",
        Op::F64Mul => "f64.mul",
        Op::F64Div => "f64.div",
        Op::F64Min => "f64.min",
        Op::F64Max => "f64.max",
        Op::F64Copysign => "f64.copysign",
        _ => return None,
    })
}
