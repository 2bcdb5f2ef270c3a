//! Named-expression registry: the arena plus the case-insensitive name map.

use ahash::AHashMap;

use crate::error::EngineError;
use crate::tree::{ExpressionNode, NodeId};

/// Owns every expression node for one task configuration.
///
/// Root expressions are registered under their (case-insensitive) names;
/// interior nodes are anonymous arena entries. The registry is built once per
/// task configuration and treated as frozen during an evaluation pass:
/// mutation requires `&mut self`, so the borrow checker enforces the
/// single-writer/many-reader discipline.
#[derive(Debug, Default)]
pub struct NamedExpressionRegistry {
    nodes: Vec<ExpressionNode>,
    roots: AHashMap<String, NodeId>,
    root_order: Vec<NodeId>,
}

impl NamedExpressionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, node: ExpressionNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &ExpressionNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut ExpressionNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Registers `id` as a root expression under its node name. Names are
    /// unique; a collision is a data-integrity error.
    pub fn register_root(&mut self, id: NodeId) -> Result<(), EngineError> {
        let name = self.node(id).name.clone();
        let key = name.to_lowercase();
        if self.roots.contains_key(&key) {
            return Err(EngineError::DuplicateExpressionName(name));
        }
        self.node_mut(id).is_root = true;
        self.roots.insert(key, id);
        self.root_order.push(id);
        Ok(())
    }

    /// Re-registers a root after an edit/re-parse, repointing the name at the
    /// freshly built tree. Superseded nodes stay in the arena until the task
    /// is rebuilt.
    pub fn replace_root(&mut self, id: NodeId) {
        let name = self.node(id).name.clone();
        let key = name.to_lowercase();
        self.node_mut(id).is_root = true;
        if let Some(previous) = self.roots.insert(key, id) {
            if let Some(slot) = self.root_order.iter().position(|&r| r == previous) {
                self.root_order[slot] = id;
            } else {
                self.root_order.push(id);
            }
            self.node_mut(previous).is_root = false;
        } else {
            self.root_order.push(id);
        }
    }

    pub fn remove_root(&mut self, name: &str) -> Option<NodeId> {
        let removed = self.roots.remove(&name.to_lowercase())?;
        self.root_order.retain(|&r| r != removed);
        self.node_mut(removed).is_root = false;
        Some(removed)
    }

    /// Case-insensitive lookup of a registered root.
    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.roots.get(&name.to_lowercase()).copied()
    }

    pub fn is_registered_root(&self, id: NodeId) -> bool {
        let node = self.node(id);
        node.is_root && self.lookup(&node.name) == Some(id)
    }

    /// Registered roots in registration order.
    pub fn roots(&self) -> &[NodeId] {
        &self.root_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeKind, ExpressionNode};
    use crate::value::Value;

    fn constant(name: &str, value: f64) -> ExpressionNode {
        ExpressionNode::named(NodeKind::Constant(Value::Number(value)), name)
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut registry = NamedExpressionRegistry::new();
        let id = registry.alloc(constant("Lambda238", 1.55125e-10));
        registry.register_root(id).unwrap();
        assert_eq!(registry.lookup("lambda238"), Some(id));
        assert_eq!(registry.lookup("LAMBDA238"), Some(id));
        assert_eq!(registry.lookup("other"), None);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = NamedExpressionRegistry::new();
        let first = registry.alloc(constant("x", 1.0));
        registry.register_root(first).unwrap();
        let second = registry.alloc(constant("X", 2.0));
        assert!(matches!(
            registry.register_root(second),
            Err(EngineError::DuplicateExpressionName(_))
        ));
    }

    #[test]
    fn replace_root_repoints_the_name() {
        let mut registry = NamedExpressionRegistry::new();
        let first = registry.alloc(constant("x", 1.0));
        registry.register_root(first).unwrap();
        let second = registry.alloc(constant("x", 2.0));
        registry.replace_root(second);
        assert_eq!(registry.lookup("x"), Some(second));
        assert!(!registry.node(first).is_root);
        assert_eq!(registry.roots(), &[second]);
    }
}
