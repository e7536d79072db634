//! Named security rules applied by the module validator.
//!
//! A rule is either an allow/deny list over instruction or type names, or a
//! custom predicate over the parsed module. The built-in default set forbids
//! table mutation and memory growth; strict floating-point determinism is
//! opt-in.

use std::fmt;
use std::sync::Arc;

use wasmtime::Module;

use crate::error::ValidationError;

/// Classifies what a security rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Specific WebAssembly instructions
    Instruction,
    /// Floating point operations
    FloatingPoint,
    /// Memory operations
    Memory,
    /// Arbitrary predicate over the parsed module
    Custom,
}

/// Predicate signature for custom rules.
pub type RulePredicate = dyn Fn(&Module) -> Result<(), ValidationError> + Send + Sync;

/// A named validation rule: allow/deny lists or a custom predicate.
#[derive(Clone)]
pub struct SecurityRule {
    pub kind: RuleKind,
    pub name: String,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub predicate: Option<Arc<RulePredicate>>,
}

impl SecurityRule {
    pub fn instruction(name: impl Into<String>, deny: &[&str]) -> Self {
        Self {
            kind: RuleKind::Instruction,
            name: name.into(),
            allow: Vec::new(),
            deny: deny.iter().map(|s| s.to_string()).collect(),
            predicate: None,
        }
    }

    pub fn memory(name: impl Into<String>, deny: &[&str]) -> Self {
        Self {
            kind: RuleKind::Memory,
            name: name.into(),
            allow: Vec::new(),
            deny: deny.iter().map(|s| s.to_string()).collect(),
            predicate: None,
        }
    }

    pub fn floating_point(name: impl Into<String>, allow: &[&str], deny: &[&str]) -> Self {
        Self {
            kind: RuleKind::FloatingPoint,
            name: name.into(),
            allow: allow.iter().map(|s| s.to_string()).collect(),
            deny: deny.iter().map(|s| s.to_string()).collect(),
            predicate: None,
        }
    }

    pub fn custom(
        name: impl Into<String>,
        predicate: impl Fn(&Module) -> Result<(), ValidationError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: RuleKind::Custom,
            name: name.into(),
            allow: Vec::new(),
            deny: Vec::new(),
            predicate: Some(Arc::new(predicate)),
        }
    }

    pub(crate) fn denies(&self, item: &str) -> bool {
        self.deny.iter().any(|d| d == item)
    }

    /// An empty allow list permits everything.
    pub(crate) fn allows(&self, item: &str) -> bool {
        self.allow.is_empty() || self.allow.iter().any(|a| a == item)
    }
}

impl fmt::Debug for SecurityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityRule")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("allow", &self.allow)
            .field("deny", &self.deny)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// The built-in rule set: table mutation and memory growth are forbidden.
pub fn default_security_rules() -> Vec<SecurityRule> {
    vec![
        SecurityRule::instruction(
            "default-instructions",
            &[
                "table.get",
                "table.set",
                "table.size",
                "table.grow",
                "table.fill",
                "table.init",
                "table.copy",
                "elem.drop",
                "data.drop",
            ],
        ),
        SecurityRule::memory("default-memory", &["memory.grow"]),
    ]
}

/// Opt-in strict determinism for floating point: only basic arithmetic is
/// allowed; rounding variants whose results depend on the host are denied.
pub fn deterministic_float_rule() -> SecurityRule {
    SecurityRule::floating_point(
        "strict-float",
        &[
            "f32.add", "f32.sub", "f32.mul", "f32.div",
            "f64.add", "f64.sub", "f64.mul", "f64.div",
        ],
        &[
            "f32.nearest", "f32.ceil", "f32.floor", "f32.trunc",
            "f64.nearest", "f64.ceil", "f64.floor", "f64.trunc",
        ],
    )
}

/// Opt-in rule denying size/growth introspection and `unreachable`.
pub fn restricted_instruction_rule() -> SecurityRule {
    SecurityRule::instruction(
        "restricted-instructions",
        &[
            "memory.grow",
            "memory.size",
            "table.grow",
            "table.size",
            "unreachable",
        ],
    )
}

/// Custom memory-page ceiling, tighter than the policy-wide limit.
pub fn memory_limit_rule(max_pages: u64) -> SecurityRule {
    SecurityRule::custom("memory-limits", move |module: &Module| {
        for export in module.exports() {
            if let Some(memory) = export.ty().memory() {
                let min = memory.minimum();
                if min > max_pages {
                    return Err(ValidationError::for_rule(
                        "memory-limits",
                        format!("memory pages {min} exceed custom limit {max_pages}"),
                    ));
                }
                if let Some(max) = memory.maximum() {
                    if max > max_pages {
                        return Err(ValidationError::for_rule(
                            "memory-limits",
                            format!("memory pages {max} exceed custom limit {max_pages}"),
                        ));
                    }
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_deny_table_and_growth() {
        let rules = default_security_rules();
        assert_eq!(rules.len(), 2);

        let instructions = &rules[0];
        assert_eq!(instructions.kind, RuleKind::Instruction);
        assert_eq!(instructions.name, "default-instructions");
        assert!(instructions.denies("table.grow"));
        assert!(instructions.denies("elem.drop"));
        assert!(!instructions.denies("i32.add"));

        let memory = &rules[1];
        assert_eq!(memory.kind, RuleKind::Memory);
        assert!(memory.denies("memory.grow"));
    }

    #[test]
    fn test_empty_allow_list_permits_everything() {
        let rule = SecurityRule::instruction("r", &["table.get"]);
        assert!(rule.allows("i32.add"));
        assert!(rule.allows("table.get")); // deny is checked separately
    }

    #[test]
    fn test_strict_float_lists() {
        let rule = deterministic_float_rule();
        assert!(rule.allows("f64.mul"));
        assert!(!rule.allows("f64.sqrt"));
        assert!(rule.denies("f32.nearest"));
    }

    #[test]
    fn test_custom_memory_rule() {
        let engine = wasmtime::Engine::default();
        let wasm = wat::parse_str(r#"(module (memory (export "memory") 4 8))"#).unwrap();
        let module = Module::new(&engine, &wasm).unwrap();

        let lenient = memory_limit_rule(8).predicate.unwrap();
        assert!((lenient.as_ref())(&module).is_ok());

        let strict = memory_limit_rule(2).predicate.unwrap();
        let err = (strict.as_ref())(&module).unwrap_err();
        assert_eq!(err.rule(), Some("memory-limits"));
    }
}
