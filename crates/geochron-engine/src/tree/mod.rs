//! Expression tree model: nodes, health checks, dependency ordering, cycle
//! detection, and infix re-rendering.
//!
//! Nodes live in a single arena owned by the
//! [`NamedExpressionRegistry`](crate::registry::NamedExpressionRegistry);
//! parent/child structure is expressed as [`NodeId`] indices. A child that is
//! itself a registered named expression is shared by index (several parents
//! may point at the same subtree), so "ownership" questions never arise.

pub mod builder;

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::CycleError;
use crate::functions::{FunctionSpec, OperatorKind};
use crate::parser::UncertaintyDirective;
use crate::registry::NamedExpressionRegistry;
use crate::value::Value;

/// Index of a node in the registry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Calculation contexts an expression participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFlags {
    pub reference_materials: bool,
    pub unknowns: bool,
    pub summary: bool,
    pub concentration_reference_materials: bool,
}

impl Default for ContextFlags {
    fn default() -> Self {
        Self {
            reference_materials: true,
            unknowns: true,
            summary: false,
            concentration_reference_materials: false,
        }
    }
}

/// Closed set of node variants; dispatch is by pattern match throughout.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Binary arithmetic or comparison operator.
    Operator(OperatorKind),
    /// Built-in function from the registered table.
    Function(&'static FunctionSpec),
    /// Literal or registered constant value.
    Constant(Value),
    /// Unresolved reference; the string is the source text as written, so
    /// re-rendering reproduces the original form.
    Missing(String),
    /// Sentinel root for a formula that failed to parse.
    ParseError(String),
    /// Raw mass-station species; evaluates to total counts per second.
    SpeciesLeaf(String),
    /// Named per-spot scalar field (e.g. acquisition hours).
    SpotFieldLeaf(String),
    /// Precomputed isotopic ratio lookup (the non-recomputing path).
    RatioVariable { numerator: String, denominator: String },
    /// Reference to one slot of a summary expression's result row.
    SummaryVariable { target: String, index: Option<usize> },
    /// Reference to the per-spot results of another named expression.
    SpotVariable { target: String },
    /// Placeholder operation for an empty or still-being-edited expression.
    Blank,
}

#[derive(Debug, Clone)]
pub struct ExpressionNode {
    pub name: String,
    pub kind: NodeKind,
    pub children: SmallVec<[NodeId; 2]>,
    pub contexts: ContextFlags,
    pub is_root: bool,
    pub directive: UncertaintyDirective,
    /// Set on the seeded ratio expressions ("206/238" and friends); feeds the
    /// transitive ratios-of-interest computation.
    pub ratio_of_interest: Option<String>,
}

impl ExpressionNode {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            name: String::new(),
            kind,
            children: SmallVec::new(),
            contexts: ContextFlags::default(),
            is_root: false,
            directive: UncertaintyDirective::None,
            ratio_of_interest: None,
        }
    }

    pub fn named(kind: NodeKind, name: impl Into<String>) -> Self {
        let mut node = Self::new(kind);
        node.name = name.into();
        node
    }

    /// Declared operand count for this node's operation.
    pub fn arity(&self) -> usize {
        match &self.kind {
            NodeKind::Operator(_) => 2,
            NodeKind::Function(spec) => spec.arity(),
            _ => 0,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, NodeKind::Constant(_))
    }
}

/// Recursive health check: the operation is meaningful, every operand slot is
/// filled, no missing-reference placeholder survives anywhere below, and
/// variable references still resolve against the registry.
pub fn is_healthy(registry: &NamedExpressionRegistry, id: NodeId) -> bool {
    let mut in_progress = HashSet::new();
    healthy_inner(registry, id, &mut in_progress)
}

fn healthy_inner(
    registry: &NamedExpressionRegistry,
    id: NodeId,
    in_progress: &mut HashSet<NodeId>,
) -> bool {
    if !in_progress.insert(id) {
        // Revisiting a node on the current path means a cycle.
        return false;
    }
    let node = registry.node(id);
    let result = match &node.kind {
        NodeKind::Missing(_) | NodeKind::ParseError(_) | NodeKind::Blank => false,
        NodeKind::SummaryVariable { target, .. } | NodeKind::SpotVariable { target } => {
            registry.lookup(target).is_some()
        }
        _ => {
            node.children.len() == node.arity()
                && node
                    .children
                    .iter()
                    .all(|&child| healthy_inner(registry, child, in_progress))
        }
    };
    in_progress.remove(&id);
    result
}

/// Human-readable defect list for one expression; empty issues mean healthy.
pub fn audit_report(registry: &NamedExpressionRegistry, id: NodeId) -> String {
    let node = registry.node(id);
    let mut issues = Vec::new();
    let mut visited = HashSet::new();
    collect_issues(registry, id, &mut issues, &mut visited);
    if issues.is_empty() {
        format!("Expression {:?} is healthy.", node.name)
    } else {
        let mut report = format!("Expression {:?} is not healthy:", node.name);
        for issue in issues {
            report.push_str("\n  - ");
            report.push_str(&issue);
        }
        report
    }
}

fn collect_issues(
    registry: &NamedExpressionRegistry,
    id: NodeId,
    issues: &mut Vec<String>,
    visited: &mut HashSet<NodeId>,
) {
    if !visited.insert(id) {
        return;
    }
    let node = registry.node(id);
    match &node.kind {
        NodeKind::Missing(text) => issues.push(format!("missing expression {text}")),
        NodeKind::ParseError(message) => issues.push(format!("parse error: {message}")),
        NodeKind::Blank => issues.push("expression is blank".to_string()),
        NodeKind::Operator(op) => {
            if node.children.len() != 2 {
                issues.push(format!(
                    "operator {:?} expects 2 operands, found {}",
                    op.symbol(),
                    node.children.len()
                ));
            }
        }
        NodeKind::Function(spec) => {
            if node.children.len() != spec.arity() {
                issues.push(format!(
                    "function {:?} expects {} argument(s), found {}",
                    spec.name,
                    spec.arity(),
                    node.children.len()
                ));
            }
        }
        NodeKind::SummaryVariable { target, .. } | NodeKind::SpotVariable { target } => {
            if registry.lookup(target).is_none() {
                issues.push(format!("reference to unregistered expression {target:?}"));
            }
        }
        _ => {}
    }
    for &child in node.children.iter() {
        collect_issues(registry, child, issues, visited);
    }
}

/// Transitive set of raw-ratio names this node depends on.
pub fn ratios_of_interest(registry: &NamedExpressionRegistry, id: NodeId) -> BTreeSet<String> {
    let mut ratios = BTreeSet::new();
    let mut visited = HashSet::new();
    collect_ratios(registry, id, &mut ratios, &mut visited);
    ratios
}

fn collect_ratios(
    registry: &NamedExpressionRegistry,
    id: NodeId,
    ratios: &mut BTreeSet<String>,
    visited: &mut HashSet<NodeId>,
) {
    if !visited.insert(id) {
        return;
    }
    let node = registry.node(id);
    if let Some(ratio) = &node.ratio_of_interest {
        ratios.insert(ratio.clone());
    }
    match &node.kind {
        NodeKind::RatioVariable {
            numerator,
            denominator,
        } => {
            ratios.insert(format!("{numerator}/{denominator}"));
        }
        NodeKind::SummaryVariable { target, .. } | NodeKind::SpotVariable { target } => {
            if let Some(target_id) = registry.lookup(target) {
                collect_ratios(registry, target_id, ratios, visited);
            }
        }
        _ => {}
    }
    for &child in node.children.iter() {
        collect_ratios(registry, child, ratios, visited);
    }
}

/// Does expression `id` (transitively, via its children and named references)
/// use `target` as a component? Tested by index equality and by
/// case-insensitive name equality.
pub fn uses_expression(
    registry: &NamedExpressionRegistry,
    id: NodeId,
    target: NodeId,
) -> bool {
    let target_name = registry.node(target).name.to_lowercase();
    let mut visited = HashSet::new();
    uses_inner(registry, id, target, &target_name, &mut visited)
}

fn uses_inner(
    registry: &NamedExpressionRegistry,
    id: NodeId,
    target: NodeId,
    target_name: &str,
    visited: &mut HashSet<NodeId>,
) -> bool {
    if !visited.insert(id) {
        return false;
    }
    let node = registry.node(id);

    let referenced_name = match &node.kind {
        NodeKind::SummaryVariable { target, .. } | NodeKind::SpotVariable { target } => {
            Some(target.to_lowercase())
        }
        _ => None,
    };
    if let Some(name) = referenced_name {
        if !target_name.is_empty() && name == target_name {
            return true;
        }
        if let Some(referenced_id) = registry.lookup(&name) {
            if referenced_id == target
                || uses_inner(registry, referenced_id, target, target_name, visited)
            {
                return true;
            }
        }
    }

    for &child in node.children.iter() {
        if child == target {
            return true;
        }
        let child_name = &registry.node(child).name;
        if !target_name.is_empty() && child_name.to_lowercase() == *target_name {
            return true;
        }
        if uses_inner(registry, child, target, target_name, visited) {
            return true;
        }
    }
    false
}

/// The legacy partial-order comparator: unhealthy expressions last, constant
/// leaves first, ratio-of-interest carriers next, then component-before-user;
/// every remaining tie resolves to "after".
pub fn compare_expressions(
    registry: &NamedExpressionRegistry,
    a: NodeId,
    b: NodeId,
) -> Ordering {
    let a_healthy = is_healthy(registry, a);
    let b_healthy = is_healthy(registry, b);
    if a_healthy != b_healthy {
        return if a_healthy {
            Ordering::Less
        } else {
            Ordering::Greater
        };
    }

    let a_constant = registry.node(a).is_constant();
    let b_constant = registry.node(b).is_constant();
    if a_constant != b_constant {
        return if a_constant {
            Ordering::Less
        } else {
            Ordering::Greater
        };
    }

    let a_ratios = !ratios_of_interest(registry, a).is_empty();
    let b_ratios = !ratios_of_interest(registry, b).is_empty();
    if a_ratios != b_ratios {
        return if a_ratios {
            Ordering::Less
        } else {
            Ordering::Greater
        };
    }

    if uses_expression(registry, b, a) {
        return Ordering::Less;
    }
    if uses_expression(registry, a, b) {
        return Ordering::Greater;
    }
    Ordering::Greater
}

/// Orders root expressions for evaluation.
///
/// Insertion sort under the partial-order comparator (it is not a total
/// order, so the std sorts do not apply), followed by a repair sweep that
/// moves any still-misplaced dependency ahead of its user. The registry must
/// already have passed [`detect_cycles`], which bounds the sweep.
pub fn order_expressions(
    registry: &NamedExpressionRegistry,
    roots: &[NodeId],
) -> Vec<NodeId> {
    let mut ordered: Vec<NodeId> = Vec::with_capacity(roots.len());
    for &id in roots {
        let mut position = ordered.len();
        while position > 0
            && compare_expressions(registry, id, ordered[position - 1]) == Ordering::Less
        {
            position -= 1;
        }
        ordered.insert(position, id);
    }

    let cap = ordered.len() * ordered.len() + 1;
    for _ in 0..cap {
        let mut moved = false;
        'sweep: for user in 0..ordered.len() {
            for dependency in (user + 1)..ordered.len() {
                if uses_expression(registry, ordered[user], ordered[dependency]) {
                    let id = ordered.remove(dependency);
                    ordered.insert(user, id);
                    moved = true;
                    break 'sweep;
                }
            }
        }
        if !moved {
            break;
        }
    }
    ordered
}

/// Rejects cyclic reference structures before ordering/evaluation.
pub fn detect_cycles(
    registry: &NamedExpressionRegistry,
    roots: &[NodeId],
) -> Result<(), CycleError> {
    let mut state: HashMap<NodeId, VisitState> = HashMap::new();
    let mut path: Vec<NodeId> = Vec::new();
    for &root in roots {
        if let Some(cycle) = visit(registry, root, &mut state, &mut path) {
            return Err(CycleError { path: cycle });
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    InProgress,
    Done,
}

fn visit(
    registry: &NamedExpressionRegistry,
    id: NodeId,
    state: &mut HashMap<NodeId, VisitState>,
    path: &mut Vec<NodeId>,
) -> Option<Vec<String>> {
    match state.get(&id) {
        Some(VisitState::Done) => return None,
        Some(VisitState::InProgress) => {
            let start = path.iter().position(|&p| p == id).unwrap_or(0);
            let mut names: Vec<String> = path[start..]
                .iter()
                .map(|&p| describe(registry, p))
                .collect();
            names.push(describe(registry, id));
            return Some(names);
        }
        None => {}
    }

    state.insert(id, VisitState::InProgress);
    path.push(id);

    let node = registry.node(id);
    let mut targets: Vec<NodeId> = node.children.iter().copied().collect();
    if let NodeKind::SummaryVariable { target, .. } | NodeKind::SpotVariable { target } =
        &node.kind
    {
        if let Some(target_id) = registry.lookup(target) {
            targets.push(target_id);
        }
    }
    for next in targets {
        if let Some(cycle) = visit(registry, next, state, path) {
            return Some(cycle);
        }
    }

    path.pop();
    state.insert(id, VisitState::Done);
    None
}

fn describe(registry: &NamedExpressionRegistry, id: NodeId) -> String {
    let node = registry.node(id);
    if node.name.is_empty() {
        match &node.kind {
            NodeKind::SummaryVariable { target, .. } | NodeKind::SpotVariable { target } => {
                target.clone()
            }
            other => format!("{other:?}"),
        }
    } else {
        node.name.clone()
    }
}

/// Renders a built tree back to the infix dialect.
///
/// Binary operations are fully parenthesized and the synthetic
/// `-1 * x` produced by implicit unary negation renders back as `-x`, so
/// re-lexing and re-converting the output reproduces the original postfix
/// stream token for token.
pub fn to_infix(registry: &NamedExpressionRegistry, id: NodeId) -> String {
    render(registry, id, true)
}

fn render(registry: &NamedExpressionRegistry, id: NodeId, top: bool) -> String {
    let node = registry.node(id);
    if !top && registry.is_registered_root(id) {
        return match &node.kind {
            NodeKind::Constant(_) => node.name.clone(),
            _ => format!("[\"{}\"]", node.name),
        };
    }

    match &node.kind {
        NodeKind::Operator(op) => {
            if *op == OperatorKind::Multiply && node.children.len() == 2 {
                let lhs = registry.node(node.children[0]);
                let lhs_is_neg_one = !registry.is_registered_root(node.children[0])
                    && matches!(lhs.kind, NodeKind::Constant(Value::Number(n)) if n == -1.0);
                if lhs_is_neg_one {
                    return format!("-{}", render(registry, node.children[1], false));
                }
            }
            if node.children.len() == 2 {
                format!(
                    "({} {} {})",
                    render(registry, node.children[0], false),
                    op.symbol(),
                    render(registry, node.children[1], false)
                )
            } else {
                // Unhealthy tree; render what exists.
                let parts: Vec<String> = node
                    .children
                    .iter()
                    .map(|&c| render(registry, c, false))
                    .collect();
                format!("({})", parts.join(op.symbol()))
            }
        }
        NodeKind::Function(spec) => {
            let args: Vec<String> = node
                .children
                .iter()
                .map(|&c| render(registry, c, false))
                .collect();
            format!("{}({})", spec.name, args.join(", "))
        }
        NodeKind::Constant(value) => value.to_string(),
        NodeKind::Missing(text) => text.clone(),
        NodeKind::ParseError(_) => String::new(),
        NodeKind::SpeciesLeaf(species) => format!("[\"{species}\"]"),
        NodeKind::SpotFieldLeaf(field) => format!("[\"{field}\"]"),
        NodeKind::RatioVariable {
            numerator,
            denominator,
        } => format!(
            "[{}\"{numerator}/{denominator}\"]",
            node.directive.prefix()
        ),
        NodeKind::SummaryVariable { target, index } => match index {
            Some(i) => format!("[{}\"{target} {}\"]", node.directive.prefix(), i + 1),
            None => format!("[{}\"{target}\"]", node.directive.prefix()),
        },
        NodeKind::SpotVariable { target } => {
            format!("[{}\"{target}\"]", node.directive.prefix())
        }
        NodeKind::Blank => String::new(),
    }
}
