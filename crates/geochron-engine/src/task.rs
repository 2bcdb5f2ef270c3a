//! Task configuration and the evaluation/ordering driver.
//!
//! A [`Task`] owns one frozen registry built from its [`TaskDefinition`]:
//! physical constants, the species and ratio expressions derived from the
//! nominal-mass configuration, then the custom formula expressions. Editing
//! an expression re-parses it against the same registry; evaluation takes
//! `&self` and so can never race a mutation.

use serde::{Deserialize, Serialize};

use crate::constants::PHYSICAL_CONSTANTS;
use crate::error::EngineError;
use crate::eval::{
    evaluate_expression, EvalContext, EvaluationResult, PriorResults, Spot,
};
use crate::parser::{infix_to_postfix, lex, TokenKind, UncertaintyDirective};
use crate::registry::NamedExpressionRegistry;
use crate::tree::builder::TreeBuilder;
use crate::tree::{
    audit_report, detect_cycles, is_healthy, order_expressions, to_infix, ContextFlags,
    ExpressionNode, NodeId, NodeKind,
};
use crate::value::Value;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantDefinition {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionDefinition {
    pub name: String,
    pub formula: String,
    #[serde(default)]
    pub contexts: ContextFlags,
}

/// Serializable task configuration: the seed for a registry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    /// The NU switch: when set, ratio references recompute from raw species
    /// data instead of reusing the precomputed ratio values.
    #[serde(default)]
    pub normalize_ratio_uncertainties: bool,
    #[serde(default)]
    pub nominal_masses: Vec<String>,
    #[serde(default)]
    pub ratio_names: Vec<String>,
    #[serde(default)]
    pub constants: Vec<ConstantDefinition>,
    #[serde(default)]
    pub expressions: Vec<ExpressionDefinition>,
}

impl TaskDefinition {
    /// Loads a task definition from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// A parsed custom expression and its parsing status report.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    pub name: String,
    pub formula: String,
    pub root: NodeId,
    pub parse_report: String,
}

/// Spots partitioned into the calculation contexts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpotCollection {
    #[serde(default)]
    pub reference_materials: Vec<Spot>,
    #[serde(default)]
    pub unknowns: Vec<Spot>,
    #[serde(default)]
    pub concentration_reference_materials: Vec<Spot>,
}

/// Evaluated results for one spot group, in evaluation order.
#[derive(Debug, Clone, Default)]
pub struct GroupResults {
    results: PriorResults,
    order: Vec<String>,
}

impl GroupResults {
    pub fn get(&self, name: &str) -> Option<&EvaluationResult> {
        self.results.get(&name.to_lowercase())
    }

    /// Expression names in the order they were evaluated.
    pub fn names(&self) -> &[String] {
        &self.order
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskResults {
    pub reference_materials: GroupResults,
    pub unknowns: GroupResults,
    pub concentration_reference_materials: GroupResults,
}

/// Outcome of round-trip validating one expression.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundTripReport {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

pub struct Task {
    name: String,
    nu_switch: bool,
    registry: NamedExpressionRegistry,
    expressions: Vec<CompiledExpression>,
    ordered: Vec<NodeId>,
}

impl Task {
    /// Builds the registry from a definition: physical constants, declared
    /// constants, the hours field, species, ratio expressions, then custom
    /// expressions in declaration order. Rejects duplicate names and cyclic
    /// reference structures.
    pub fn build(definition: TaskDefinition) -> Result<Task, EngineError> {
        let mut registry = NamedExpressionRegistry::new();

        for (name, value) in PHYSICAL_CONSTANTS {
            let mut node =
                ExpressionNode::named(NodeKind::Constant(Value::Number(value)), name);
            node.contexts = seeded_contexts();
            let id = registry.alloc(node);
            registry.register_root(id)?;
        }
        for constant in &definition.constants {
            let mut node = ExpressionNode::named(
                NodeKind::Constant(Value::Number(constant.value)),
                constant.name.clone(),
            );
            node.contexts = seeded_contexts();
            let id = registry.alloc(node);
            registry.register_root(id)?;
        }

        let mut hours_node =
            ExpressionNode::named(NodeKind::SpotFieldLeaf("hours".to_string()), "Hours");
        hours_node.contexts = seeded_contexts();
        let hours = registry.alloc(hours_node);
        registry.register_root(hours)?;

        for mass in &definition.nominal_masses {
            let mut node =
                ExpressionNode::named(NodeKind::SpeciesLeaf(mass.clone()), mass.clone());
            node.contexts = seeded_contexts();
            let id = registry.alloc(node);
            registry.register_root(id)?;
        }

        for ratio in &definition.ratio_names {
            seed_ratio(&mut registry, ratio)?;
        }

        let nu_switch = definition.normalize_ratio_uncertainties;
        let mut expressions = Vec::with_capacity(definition.expressions.len());
        for def in &definition.expressions {
            if registry.lookup(&def.name).is_some() {
                return Err(EngineError::DuplicateExpressionName(def.name.clone()));
            }
            let built =
                TreeBuilder::new(&mut registry, nu_switch).build(&def.name, &def.formula, def.contexts);
            registry.register_root(built.root)?;
            expressions.push(CompiledExpression {
                name: def.name.clone(),
                formula: def.formula.clone(),
                root: built.root,
                parse_report: built.parse_report,
            });
        }

        // Second pass: a formula may reference an expression declared after
        // it; those resolved as missing placeholders the first time around
        // and re-parse cleanly now.
        for (index, def) in definition.expressions.iter().enumerate() {
            if is_healthy(&registry, expressions[index].root) {
                continue;
            }
            let built =
                TreeBuilder::new(&mut registry, nu_switch).build(&def.name, &def.formula, def.contexts);
            registry.replace_root(built.root);
            expressions[index].root = built.root;
            expressions[index].parse_report = built.parse_report;
        }

        detect_cycles(&registry, registry.roots())?;
        let ordered = order_expressions(&registry, registry.roots());

        Ok(Task {
            name: definition.name,
            nu_switch,
            registry,
            expressions,
            ordered,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &NamedExpressionRegistry {
        &self.registry
    }

    pub fn expressions(&self) -> &[CompiledExpression] {
        &self.expressions
    }

    pub fn expression(&self, name: &str) -> Option<&CompiledExpression> {
        self.expressions
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Root-expression names in evaluation order.
    pub fn evaluation_order(&self) -> Vec<&str> {
        self.ordered
            .iter()
            .map(|&id| self.registry.node(id).name.as_str())
            .collect()
    }

    /// Adds or replaces a custom expression, re-parsing its formula. A cycle
    /// introduced by the edit is rejected and the previous state restored.
    pub fn set_expression(&mut self, def: ExpressionDefinition) -> Result<(), EngineError> {
        let previous = self.registry.lookup(&def.name);
        let built = TreeBuilder::new(&mut self.registry, self.nu_switch).build(
            &def.name,
            &def.formula,
            def.contexts,
        );
        self.registry.replace_root(built.root);

        if let Err(cycle) = detect_cycles(&self.registry, self.registry.roots()) {
            match previous {
                Some(old) => self.registry.replace_root(old),
                None => {
                    self.registry.remove_root(&def.name);
                }
            }
            return Err(cycle.into());
        }

        let compiled = CompiledExpression {
            name: def.name.clone(),
            formula: def.formula.clone(),
            root: built.root,
            parse_report: built.parse_report,
        };
        match self
            .expressions
            .iter_mut()
            .find(|e| e.name.eq_ignore_ascii_case(&def.name))
        {
            Some(slot) => *slot = compiled,
            None => self.expressions.push(compiled),
        }

        self.ordered = order_expressions(&self.registry, self.registry.roots());
        Ok(())
    }

    /// Removes a custom expression from the registry. References to it from
    /// other expressions degrade to tolerated unknowns, surfaced by audit.
    pub fn remove_expression(&mut self, name: &str) -> bool {
        let removed = self.registry.remove_root(name).is_some();
        if removed {
            self.expressions
                .retain(|e| !e.name.eq_ignore_ascii_case(name));
            self.ordered = order_expressions(&self.registry, self.registry.roots());
        }
        removed
    }

    pub fn is_expression_healthy(&self, name: &str) -> Option<bool> {
        let id = self.registry.lookup(name)?;
        Some(is_healthy(&self.registry, id))
    }

    /// Health audit across the custom expressions: tree defects plus anything
    /// the parser flagged (failed parses, suspicious argument counts).
    pub fn audit(&self) -> String {
        let mut report = String::new();
        for expression in &self.expressions {
            if !report.is_empty() {
                report.push('\n');
            }
            report.push_str(&audit_report(&self.registry, expression.root));
            for line in expression.parse_report.lines() {
                if line != "Expression parses OK." {
                    report.push('\n');
                    report.push_str(line);
                }
            }
        }
        report
    }

    /// Evaluates every applicable root expression for each spot group, in
    /// dependency order, collecting `[value, one_sigma]` rows per expression.
    ///
    /// Reference materials reduce first; their summary results (calibration
    /// values) are visible to the unknown and concentration groups.
    pub fn evaluate(&self, spots: &SpotCollection) -> Result<TaskResults, EngineError> {
        let empty = PriorResults::default();
        let reference_materials =
            self.evaluate_group(&spots.reference_materials, |c| c.reference_materials, &empty)?;

        let mut calibration = PriorResults::default();
        for (key, result) in reference_materials.results.iter() {
            if result.summary {
                calibration.insert(key.clone(), result.clone());
            }
        }

        Ok(TaskResults {
            unknowns: self.evaluate_group(&spots.unknowns, |c| c.unknowns, &calibration)?,
            concentration_reference_materials: self.evaluate_group(
                &spots.concentration_reference_materials,
                |c| c.concentration_reference_materials,
                &calibration,
            )?,
            reference_materials,
        })
    }

    fn evaluate_group(
        &self,
        spots: &[Spot],
        select: fn(&ContextFlags) -> bool,
        seed: &PriorResults,
    ) -> Result<GroupResults, EngineError> {
        let mut prior = seed.clone();
        let mut order = Vec::new();
        if spots.is_empty() {
            return Ok(GroupResults {
                results: prior,
                order,
            });
        }

        for &root in &self.ordered {
            let node = self.registry.node(root);
            if node.name.is_empty() || !select(&node.contexts) {
                continue;
            }
            let ctx = EvalContext {
                registry: &self.registry,
                spots,
                prior: &prior,
            };
            let result = evaluate_expression(&ctx, root)?;
            order.push(node.name.clone());
            prior.insert(node.name.to_lowercase(), result);
        }

        Ok(GroupResults {
            results: prior,
            order,
        })
    }

    /// Re-renders every healthy custom expression to infix, re-parses it, and
    /// compares the postfix streams. Runs across expressions in parallel when
    /// the `parallel` feature is enabled; each expression is read-only here.
    pub fn validate_round_trip(&self) -> Vec<RoundTripReport> {
        #[cfg(feature = "parallel")]
        let iter = self.expressions.par_iter();
        #[cfg(not(feature = "parallel"))]
        let iter = self.expressions.iter();

        iter.map(|expression| self.round_trip_one(expression)).collect()
    }

    fn round_trip_one(&self, expression: &CompiledExpression) -> RoundTripReport {
        if !is_healthy(&self.registry, expression.root) {
            return RoundTripReport {
                name: expression.name.clone(),
                ok: true,
                detail: "skipped: expression is not healthy".to_string(),
            };
        }

        let rendered = to_infix(&self.registry, expression.root);
        let original = match fingerprint_postfix(&expression.formula) {
            Some(fp) => fp,
            None => {
                return RoundTripReport {
                    name: expression.name.clone(),
                    ok: false,
                    detail: "original formula no longer parses".to_string(),
                };
            }
        };
        let reparsed = match fingerprint_postfix(&rendered) {
            Some(fp) => fp,
            None => {
                return RoundTripReport {
                    name: expression.name.clone(),
                    ok: false,
                    detail: format!("re-rendered formula {rendered:?} does not parse"),
                };
            }
        };

        if original == reparsed {
            RoundTripReport {
                name: expression.name.clone(),
                ok: true,
                detail: String::new(),
            }
        } else {
            RoundTripReport {
                name: expression.name.clone(),
                ok: false,
                detail: format!(
                    "postfix mismatch between {:?} and re-rendered {rendered:?}",
                    expression.formula
                ),
            }
        }
    }
}

/// Seeded roots (constants, species, ratios, fields) apply in every
/// calculation context.
fn seeded_contexts() -> ContextFlags {
    ContextFlags {
        reference_materials: true,
        unknowns: true,
        summary: false,
        concentration_reference_materials: true,
    }
}

fn seed_ratio(
    registry: &mut NamedExpressionRegistry,
    ratio: &str,
) -> Result<(), EngineError> {
    let Some((numerator, denominator)) = ratio.split_once('/') else {
        return Err(EngineError::InvalidRatioName(ratio.to_string()));
    };

    let numerator_id = match registry.lookup(numerator) {
        Some(id) => id,
        None => registry.alloc(ExpressionNode::named(
            NodeKind::SpeciesLeaf(numerator.to_string()),
            numerator,
        )),
    };
    let denominator_id = match registry.lookup(denominator) {
        Some(id) => id,
        None => registry.alloc(ExpressionNode::named(
            NodeKind::SpeciesLeaf(denominator.to_string()),
            denominator,
        )),
    };

    let mut node = ExpressionNode::named(
        NodeKind::Operator(crate::functions::OperatorKind::Divide),
        ratio,
    );
    node.contexts = seeded_contexts();
    node.children.push(numerator_id);
    node.children.push(denominator_id);
    node.ratio_of_interest = Some(ratio.to_string());
    let id = registry.alloc(node);
    registry.register_root(id)
}

/// Token fingerprint for postfix-stream comparison: numbers compare by value,
/// names case-insensitively. A bare constant ident and an undirected bracket
/// reference are the same operand, so both normalize to `Reference`.
#[derive(Debug, Clone, PartialEq)]
enum TokenFingerprint {
    Number(u64),
    Function(String),
    Reference(String, UncertaintyDirective),
    Operator(&'static str),
}

fn fingerprint_postfix(formula: &str) -> Option<Vec<TokenFingerprint>> {
    let tokens = lex(formula).ok()?;
    let postfix = infix_to_postfix(&tokens).ok()?;
    let mut fingerprints = Vec::with_capacity(postfix.tokens.len());
    for token in &postfix.tokens {
        let fp = match &token.kind {
            TokenKind::Number(lexeme) => TokenFingerprint::Number(lexeme.parse::<f64>().ok()?.to_bits()),
            TokenKind::Ident(name) => {
                let lower = name.to_lowercase();
                if crate::functions::lookup_function(name).is_some() {
                    TokenFingerprint::Function(lower)
                } else {
                    TokenFingerprint::Reference(lower, UncertaintyDirective::None)
                }
            }
            TokenKind::Reference { name, directive } => {
                TokenFingerprint::Reference(name.to_lowercase(), *directive)
            }
            TokenKind::Plus => TokenFingerprint::Operator("+"),
            TokenKind::Minus => TokenFingerprint::Operator("-"),
            TokenKind::Star => TokenFingerprint::Operator("*"),
            TokenKind::Slash => TokenFingerprint::Operator("/"),
            TokenKind::Caret => TokenFingerprint::Operator("^"),
            TokenKind::Eq => TokenFingerprint::Operator("=="),
            TokenKind::Ne => TokenFingerprint::Operator("<>"),
            TokenKind::Lt => TokenFingerprint::Operator("<"),
            TokenKind::Le => TokenFingerprint::Operator("<="),
            TokenKind::Gt => TokenFingerprint::Operator(">"),
            TokenKind::Ge => TokenFingerprint::Operator(">="),
            _ => return None,
        };
        fingerprints.push(fp);
    }
    Some(fingerprints)
}
