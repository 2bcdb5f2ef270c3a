//! Operator descriptors and the built-in function registry.
//!
//! Built-ins are registered with [`inventory`] from the `builtins_*` modules
//! and collected once into an immutable map, so there is no process-wide
//! mutable state: parsing and evaluation consult the same frozen table.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::EngineError;
use crate::eval::{EvalContext, NodeOutput};
use crate::tree::NodeId;

mod builtins_geochron;
mod builtins_logical;
mod builtins_math;
mod builtins_statistical;

/// Binary operators of the formula dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl OperatorKind {
    pub fn symbol(self) -> &'static str {
        match self {
            OperatorKind::Add => "+",
            OperatorKind::Subtract => "-",
            OperatorKind::Multiply => "*",
            OperatorKind::Divide => "/",
            OperatorKind::Power => "^",
            OperatorKind::Equal => "==",
            OperatorKind::NotEqual => "<>",
            OperatorKind::Less => "<",
            OperatorKind::LessEqual => "<=",
            OperatorKind::Greater => ">",
            OperatorKind::GreaterEqual => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            OperatorKind::Equal
                | OperatorKind::NotEqual
                | OperatorKind::Less
                | OperatorKind::LessEqual
                | OperatorKind::Greater
                | OperatorKind::GreaterEqual
        )
    }
}

pub type FunctionImpl = fn(&EvalContext<'_>, &[NodeId]) -> Result<NodeOutput, EngineError>;

/// One entry in the built-in function table.
///
/// `summary` marks functions that aggregate their arguments over the whole
/// spot collection and produce a single result row instead of one per spot.
#[derive(Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub summary: bool,
    pub implementation: FunctionImpl,
}

impl FunctionSpec {
    /// Declared child count used by the tree builder and the health check.
    pub fn arity(&self) -> usize {
        self.max_args
    }
}

impl std::fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("summary", &self.summary)
            .finish()
    }
}

inventory::collect!(FunctionSpec);

fn registry() -> &'static HashMap<String, &'static FunctionSpec> {
    static REGISTRY: OnceLock<HashMap<String, &'static FunctionSpec>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        for spec in inventory::iter::<FunctionSpec> {
            map.insert(spec.name.to_ascii_lowercase(), spec);
        }
        map
    })
}

/// Case-insensitive lookup in the built-in function table.
pub fn lookup_function(name: &str) -> Option<&'static FunctionSpec> {
    registry().get(&name.to_ascii_lowercase()).copied()
}

/// Iterate every registered built-in.
pub fn iter_function_specs() -> impl Iterator<Item = &'static FunctionSpec> {
    inventory::iter::<FunctionSpec>.into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(lookup_function("sqWtdAv").is_some());
        assert!(lookup_function("SQWTDAV").is_some());
        assert!(lookup_function("sqwtdav").is_some());
        assert!(lookup_function("noSuchFunction").is_none());
    }

    #[test]
    fn registry_has_the_core_vocabulary() {
        for name in [
            "ln", "sqrt", "exp", "abs", "max", "min", "if", "and", "or", "not", "sum", "count",
            "average", "median", "totalCps", "sqWtdAv", "sqBiweight", "robReg", "agePb76",
            "concordiaTW",
        ] {
            assert!(lookup_function(name).is_some(), "missing builtin {name}");
        }
    }

    #[test]
    fn names_are_unique_in_the_table() {
        let mut seen = std::collections::HashSet::new();
        for spec in iter_function_specs() {
            assert!(
                seen.insert(spec.name.to_ascii_lowercase()),
                "duplicate builtin {}",
                spec.name
            );
        }
    }
}
