//! Reconstructs expression trees from reversed postfix streams.
//!
//! The builder walks the reversed (right-to-left) postfix emission, keeping a
//! cursor path from the root down to the node whose left-hand operand slot is
//! still open. Each token materializes a node (or resolves to a shared
//! registered node) that is front-inserted as the cursor's first child.
//! Reference resolution never fails hard: unknown names degrade to missing
//! placeholders that keep the tree inspectable and editable.

use super::{ContextFlags, ExpressionNode, NodeId, NodeKind};
use crate::functions::{lookup_function, OperatorKind};
use crate::parser::{infix_to_postfix, lex, Token, TokenKind, UncertaintyDirective};
use crate::registry::NamedExpressionRegistry;
use crate::value::Value;

/// Outcome of building one named expression.
#[derive(Debug, Clone)]
pub struct BuiltExpression {
    pub root: NodeId,
    /// Parsing status report: either the all-clear or a description of what
    /// went wrong / looked suspicious. Attached to the expression, never
    /// thrown.
    pub parse_report: String,
}

pub struct TreeBuilder<'a> {
    registry: &'a mut NamedExpressionRegistry,
    nu_switch: bool,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(registry: &'a mut NamedExpressionRegistry, nu_switch: bool) -> Self {
        Self {
            registry,
            nu_switch,
        }
    }

    /// Parses `formula` and builds its tree, returning the root and the parse
    /// status report. A formula that fails to lex or convert produces a tree
    /// rooted in a parse-error sentinel instead of an error.
    pub fn build(
        &mut self,
        name: &str,
        formula: &str,
        contexts: ContextFlags,
    ) -> BuiltExpression {
        let tokens = match lex(formula) {
            Ok(tokens) => tokens,
            Err(err) => return self.parse_failure(name, contexts, &err.to_string()),
        };
        let postfix = match infix_to_postfix(&tokens) {
            Ok(postfix) => postfix,
            Err(err) => return self.parse_failure(name, contexts, &err.to_string()),
        };

        let mut path: Vec<NodeId> = Vec::new();
        let mut root: Option<NodeId> = None;
        let mut orphans = 0usize;

        for token in postfix.tokens.iter().rev() {
            while let Some(&cursor) = path.last() {
                if self.slot_open(cursor) {
                    break;
                }
                path.pop();
            }

            let new_id = self.node_for_token(token);
            match path.last() {
                Some(&cursor) => {
                    self.registry.node_mut(cursor).children.insert(0, new_id);
                }
                None => {
                    if root.is_none() {
                        root = Some(new_id);
                    } else {
                        orphans += 1;
                    }
                }
            }
            path.push(new_id);
        }

        let mut root = match root {
            Some(root) => root,
            None => self
                .registry
                .alloc(ExpressionNode::named(NodeKind::Blank, name)),
        };

        // A formula that is nothing but a reference resolves to a shared
        // registered node; wrap it so this expression can carry its own name
        // without renaming the node it borrowed.
        if self.registry.is_registered_root(root) {
            let target = self.registry.node(root);
            let wrapper = if target.contexts.summary {
                NodeKind::SummaryVariable {
                    target: target.name.clone(),
                    index: None,
                }
            } else {
                NodeKind::SpotVariable {
                    target: target.name.clone(),
                }
            };
            root = self.registry.alloc(ExpressionNode::new(wrapper));
        }

        {
            let node = self.registry.node_mut(root);
            node.name = name.to_string();
            node.contexts = contexts;
            node.is_root = true;
        }

        let mut report = String::from("Expression parses OK.");
        for (function, observed) in &postfix.observed_arg_counts {
            if let Some(spec) = lookup_function(function) {
                if *observed != spec.arity() {
                    report.push_str(&format!(
                        "\nFunction {:?} called with {} argument(s); the table declares {}.",
                        spec.name,
                        observed,
                        spec.arity()
                    ));
                }
            }
        }
        if orphans > 0 {
            report.push_str(&format!(
                "\n{orphans} operand(s) were left over after the tree was built."
            ));
        }

        BuiltExpression {
            root,
            parse_report: report,
        }
    }

    fn parse_failure(
        &mut self,
        name: &str,
        contexts: ContextFlags,
        message: &str,
    ) -> BuiltExpression {
        let mut node =
            ExpressionNode::named(NodeKind::ParseError(message.to_string()), name);
        node.contexts = contexts;
        node.is_root = true;
        BuiltExpression {
            root: self.registry.alloc(node),
            parse_report: format!("Parse error: {message}"),
        }
    }

    /// Can the cursor accept another child? Registered roots are references,
    /// not structural nodes, and leaves never take children.
    fn slot_open(&self, id: NodeId) -> bool {
        if self.registry.is_registered_root(id) {
            return false;
        }
        let node = self.registry.node(id);
        match node.kind {
            NodeKind::Operator(_) | NodeKind::Function(_) => {
                node.children.len() < node.arity()
            }
            _ => false,
        }
    }

    fn node_for_token(&mut self, token: &Token) -> NodeId {
        match &token.kind {
            TokenKind::Number(lexeme) => match lexeme.parse::<f64>() {
                Ok(value) => self
                    .registry
                    .alloc(ExpressionNode::new(NodeKind::Constant(Value::Number(value)))),
                Err(_) => self
                    .registry
                    .alloc(ExpressionNode::new(NodeKind::Missing(lexeme.clone()))),
            },
            TokenKind::Ident(name) => {
                if let Some(spec) = lookup_function(name) {
                    self.registry
                        .alloc(ExpressionNode::new(NodeKind::Function(spec)))
                } else if let Some(shared) = self.registry.lookup(name) {
                    shared
                } else {
                    self.registry
                        .alloc(ExpressionNode::new(NodeKind::Missing(name.clone())))
                }
            }
            TokenKind::Reference { name, directive } => {
                self.resolve_reference(name, *directive)
            }
            kind if kind.is_operator() => {
                let op = operator_for(kind);
                self.registry
                    .alloc(ExpressionNode::new(NodeKind::Operator(op)))
            }
            other => self.registry.alloc(ExpressionNode::new(NodeKind::Missing(
                format!("{other:?}"),
            ))),
        }
    }

    /// The named-reference resolution cases. The registry may hand back
    /// another tree (shared), a lightweight variable wrapper, or a missing
    /// placeholder; it never errors.
    fn resolve_reference(
        &mut self,
        name: &str,
        directive: UncertaintyDirective,
    ) -> NodeId {
        let trimmed = name.trim();
        let Some(target_id) = self.registry.lookup(trimmed) else {
            // Unknown name: a trailing digit suffix may index into a
            // multi-valued summary expression, 1-based.
            if let Some((base, index)) = split_trailing_index(trimmed) {
                if let Some(base_id) = self.registry.lookup(&base) {
                    let target = self.registry.node(base_id).name.clone();
                    let mut node = ExpressionNode::new(NodeKind::SummaryVariable {
                        target,
                        index: Some(index - 1),
                    });
                    node.directive = directive;
                    return self.registry.alloc(node);
                }
            }
            let source = format!("[{}\"{name}\"]", directive.prefix());
            return self
                .registry
                .alloc(ExpressionNode::new(NodeKind::Missing(source)));
        };

        let target = self.registry.node(target_id);
        let is_ratio_over_species = target.ratio_of_interest.is_some()
            && target
                .children
                .first()
                .map(|&c| matches!(self.registry.node(c).kind, NodeKind::SpeciesLeaf(_)))
                .unwrap_or(false);

        if is_ratio_over_species && self.nu_switch && directive == UncertaintyDirective::None {
            // Full recomputation path: substitute the ratio tree itself. An
            // uncertainty directive always reads the precomputed ratio, since
            // the recomputation path carries no directive slot.
            return target_id;
        }
        if is_ratio_over_species {
            // Precomputed-ratio path: carry only the species pair.
            let (numerator, denominator) = self.species_pair(target_id);
            let mut node = ExpressionNode::new(NodeKind::RatioVariable {
                numerator,
                denominator,
            });
            node.directive = directive;
            return self.registry.alloc(node);
        }

        match &target.kind {
            NodeKind::SpeciesLeaf(_)
            | NodeKind::SpotFieldLeaf(_)
            | NodeKind::RatioVariable { .. }
            | NodeKind::SummaryVariable { .. } => target_id,
            _ if target.contexts.summary => {
                let mut node = ExpressionNode::new(NodeKind::SummaryVariable {
                    target: target.name.clone(),
                    index: None,
                });
                node.directive = directive;
                self.registry.alloc(node)
            }
            _ => {
                let mut node = ExpressionNode::new(NodeKind::SpotVariable {
                    target: target.name.clone(),
                });
                node.directive = directive;
                self.registry.alloc(node)
            }
        }
    }

    fn species_pair(&self, ratio_id: NodeId) -> (String, String) {
        let node = self.registry.node(ratio_id);
        let species = |child: Option<&NodeId>| {
            child.and_then(|&c| match &self.registry.node(c).kind {
                NodeKind::SpeciesLeaf(s) => Some(s.clone()),
                _ => None,
            })
        };
        let numerator = species(node.children.first());
        let denominator = species(node.children.get(1));
        match (numerator, denominator) {
            (Some(n), Some(d)) => (n, d),
            _ => {
                // Fall back to the ratio's own name.
                let name = node
                    .ratio_of_interest
                    .clone()
                    .unwrap_or_else(|| node.name.clone());
                match name.split_once('/') {
                    Some((n, d)) => (n.to_string(), d.to_string()),
                    None => (name.clone(), name),
                }
            }
        }
    }
}

fn operator_for(kind: &TokenKind) -> OperatorKind {
    match kind {
        TokenKind::Plus => OperatorKind::Add,
        TokenKind::Minus => OperatorKind::Subtract,
        TokenKind::Star => OperatorKind::Multiply,
        TokenKind::Slash => OperatorKind::Divide,
        TokenKind::Caret => OperatorKind::Power,
        TokenKind::Eq => OperatorKind::Equal,
        TokenKind::Ne => OperatorKind::NotEqual,
        TokenKind::Lt => OperatorKind::Less,
        TokenKind::Le => OperatorKind::LessEqual,
        TokenKind::Gt => OperatorKind::Greater,
        TokenKind::Ge => OperatorKind::GreaterEqual,
        other => unreachable!("not an operator token: {other:?}"),
    }
}

/// Splits a trailing 1-based index from a name, e.g. `"WtdMeanA 2"` into
/// (`"WtdMeanA"`, 2).
fn split_trailing_index(name: &str) -> Option<(String, usize)> {
    let digits_start = name
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|p| p + name[p..].chars().next().map_or(1, char::len_utf8))?;
    if digits_start >= name.len() {
        return None;
    }
    let (base, digits) = name.split_at(digits_start);
    let base = base.trim_end();
    if base.is_empty() {
        return None;
    }
    let index: usize = digits.parse().ok()?;
    if index == 0 {
        return None;
    }
    Some((base.to_string(), index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_trailing_index_variants() {
        assert_eq!(
            split_trailing_index("WtdMeanA 2"),
            Some(("WtdMeanA".to_string(), 2))
        );
        assert_eq!(
            split_trailing_index("Mean12"),
            Some(("Mean".to_string(), 12))
        );
        assert_eq!(split_trailing_index("NoIndex"), None);
        assert_eq!(split_trailing_index("123"), None);
        assert_eq!(split_trailing_index("Zero 0"), None);
    }
}
