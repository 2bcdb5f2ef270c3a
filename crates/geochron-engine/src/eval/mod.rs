//! Per-spot expression evaluation.
//!
//! Evaluation is synchronous recursive descent over the arena. Every node
//! produces either one `(value, one-sigma)` row per spot or a single summary
//! row; operators broadcast summary operands across the spot collection.
//! Placeholder nodes (blank, missing, parse error) evaluate to `{0, 0}` rows
//! so half-edited expressions never abort an interactive pass. Hard errors
//! are reserved for data-integrity failures: a species, field, or ratio the
//! spots simply do not carry.

use std::collections::HashMap;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::functions::OperatorKind;
use crate::parser::UncertaintyDirective;
use crate::registry::NamedExpressionRegistry;
use crate::tree::{NodeId, NodeKind};
use crate::value::Value;

/// A precomputed isotopic ratio carried by a spot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RatioValue {
    pub value: f64,
    pub one_sigma_abs: f64,
}

/// One analysis spot: the engine's view of the raw data provider.
///
/// `total_cps` is keyed by species (nominal mass station) name; `ratios` by
/// ratio name (`"206/238"`); `fields` carries any additional named scalars.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Spot {
    pub name: String,
    #[serde(default)]
    pub hours: f64,
    #[serde(default)]
    pub total_cps: HashMap<String, f64>,
    #[serde(default)]
    pub ratios: HashMap<String, RatioValue>,
    #[serde(default)]
    pub fields: HashMap<String, f64>,
}

/// Evaluated output of one root expression over one spot group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// True when the expression aggregated over the whole group: `rows` then
    /// holds a single (possibly wider) row instead of one per spot.
    pub summary: bool,
    pub rows: Vec<Vec<Value>>,
}

impl EvaluationResult {
    pub fn value(&self, spot: usize) -> Value {
        let row = if self.summary { 0 } else { spot };
        self.rows
            .get(row)
            .and_then(|r| r.first())
            .copied()
            .unwrap_or(Value::Blank)
    }

    pub fn sigma(&self, spot: usize) -> f64 {
        let row = if self.summary { 0 } else { spot };
        self.rows
            .get(row)
            .and_then(|r| r.get(1))
            .map(|v| v.as_number())
            .unwrap_or(0.0)
    }
}

/// Results of already-evaluated expressions, keyed by lowercased name.
pub type PriorResults = AHashMap<String, EvaluationResult>;

/// Read-only context threaded through evaluation: the frozen registry, the
/// spot group being reduced, and the results of every expression that sorted
/// earlier in the dependency order.
pub struct EvalContext<'a> {
    pub registry: &'a NamedExpressionRegistry,
    pub spots: &'a [Spot],
    pub prior: &'a PriorResults,
}

impl<'a> EvalContext<'a> {
    pub fn spot_count(&self) -> usize {
        self.spots.len()
    }
}

/// Intermediate node output: one row per spot, or one summary row.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    PerSpot(Vec<(Value, f64)>),
    Summary(Vec<Value>),
}

impl NodeOutput {
    /// Normalizes to per-spot rows, broadcasting a summary row.
    pub fn per_spot(self, spot_count: usize) -> Vec<(Value, f64)> {
        match self {
            NodeOutput::PerSpot(rows) => rows,
            NodeOutput::Summary(row) => {
                let value = row.first().copied().unwrap_or(Value::Blank);
                let sigma = row.get(1).map(|v| v.as_number()).unwrap_or(0.0);
                vec![(value, sigma); spot_count]
            }
        }
    }
}

/// Evaluates a root expression, producing the `[value, one_sigma]` rows the
/// output consumer receives.
pub fn evaluate_expression(
    ctx: &EvalContext<'_>,
    root: NodeId,
) -> Result<EvaluationResult, EngineError> {
    match eval_node(ctx, root)? {
        NodeOutput::PerSpot(rows) => Ok(EvaluationResult {
            summary: false,
            rows: rows
                .into_iter()
                .map(|(value, sigma)| vec![value, Value::Number(sigma)])
                .collect(),
        }),
        NodeOutput::Summary(row) => Ok(EvaluationResult {
            summary: true,
            rows: vec![row],
        }),
    }
}

fn zero_rows(n: usize) -> NodeOutput {
    NodeOutput::PerSpot(vec![(Value::Number(0.0), 0.0); n])
}

/// Recursive evaluation of one node.
pub fn eval_node(ctx: &EvalContext<'_>, id: NodeId) -> Result<NodeOutput, EngineError> {
    let n = ctx.spot_count();
    let node = ctx.registry.node(id);
    match &node.kind {
        NodeKind::Constant(value) => Ok(NodeOutput::PerSpot(vec![(*value, 0.0); n])),

        // Placeholders evaluate, they never abort an interactive pass.
        NodeKind::Blank | NodeKind::Missing(_) | NodeKind::ParseError(_) => Ok(zero_rows(n)),

        NodeKind::SpeciesLeaf(species) => {
            let mut rows = Vec::with_capacity(n);
            for spot in ctx.spots {
                let cps = spot.total_cps.get(species).copied().ok_or_else(|| {
                    EngineError::UnknownSpecies {
                        species: species.clone(),
                        spot: spot.name.clone(),
                    }
                })?;
                rows.push((Value::Number(cps), 0.0));
            }
            Ok(NodeOutput::PerSpot(rows))
        }

        NodeKind::SpotFieldLeaf(field) => {
            let mut rows = Vec::with_capacity(n);
            for spot in ctx.spots {
                let value = if field.eq_ignore_ascii_case("hours") {
                    spot.hours
                } else {
                    spot.fields.get(field).copied().ok_or_else(|| {
                        EngineError::UnknownField {
                            field: field.clone(),
                            spot: spot.name.clone(),
                        }
                    })?
                };
                rows.push((Value::Number(value), 0.0));
            }
            Ok(NodeOutput::PerSpot(rows))
        }

        NodeKind::RatioVariable {
            numerator,
            denominator,
        } => {
            let ratio_name = format!("{numerator}/{denominator}");
            let mut rows = Vec::with_capacity(n);
            for spot in ctx.spots {
                let ratio = spot.ratios.get(&ratio_name).copied().ok_or_else(|| {
                    EngineError::UnknownRatio {
                        ratio: ratio_name.clone(),
                        spot: spot.name.clone(),
                    }
                })?;
                rows.push(apply_directive(
                    node.directive,
                    Value::Number(ratio.value),
                    ratio.one_sigma_abs,
                ));
            }
            Ok(NodeOutput::PerSpot(rows))
        }

        NodeKind::SpotVariable { target } => {
            match ctx.prior.get(&target.to_lowercase()) {
                Some(result) => {
                    let mut rows = Vec::with_capacity(n);
                    for spot in 0..n {
                        rows.push(apply_directive(
                            node.directive,
                            result.value(spot),
                            result.sigma(spot),
                        ));
                    }
                    Ok(NodeOutput::PerSpot(rows))
                }
                // Not evaluated yet (or since removed): tolerate.
                None => Ok(zero_rows(n)),
            }
        }

        NodeKind::SummaryVariable { target, index } => {
            match ctx.prior.get(&target.to_lowercase()) {
                Some(result) => {
                    let row = result.rows.first();
                    let slot = index.unwrap_or(0);
                    let value = row
                        .and_then(|r| r.get(slot))
                        .copied()
                        .unwrap_or(Value::Number(0.0));
                    // Only the leading slot has a paired uncertainty.
                    let sigma = if slot == 0 {
                        row.and_then(|r| r.get(1))
                            .map(|v| v.as_number())
                            .unwrap_or(0.0)
                    } else {
                        0.0
                    };
                    let (value, sigma) = apply_directive(node.directive, value, sigma);
                    Ok(NodeOutput::PerSpot(vec![(value, sigma); n]))
                }
                None => Ok(zero_rows(n)),
            }
        }

        NodeKind::Operator(op) => {
            if node.children.len() != 2 {
                return Ok(zero_rows(n));
            }
            let lhs = eval_node(ctx, node.children[0])?.per_spot(n);
            let rhs = eval_node(ctx, node.children[1])?.per_spot(n);
            let rows = lhs
                .into_iter()
                .zip(rhs)
                .map(|(l, r)| combine(*op, l, r))
                .collect();
            Ok(NodeOutput::PerSpot(rows))
        }

        NodeKind::Function(spec) => {
            if node.children.len() < spec.min_args || node.children.len() > spec.max_args {
                return Ok(zero_rows(n));
            }
            (spec.implementation)(ctx, &node.children)
        }
    }
}

/// Applies an uncertainty directive to a `(value, sigma)` pair: `±` replaces
/// the value with the absolute one-sigma, `%` with the percent one-sigma.
fn apply_directive(
    directive: UncertaintyDirective,
    value: Value,
    sigma: f64,
) -> (Value, f64) {
    match directive {
        UncertaintyDirective::None => (value, sigma),
        UncertaintyDirective::Absolute => (Value::Number(sigma), 0.0),
        UncertaintyDirective::Percent => {
            let v = value.as_number();
            let percent = if v == 0.0 { 0.0 } else { 100.0 * sigma / v.abs() };
            (Value::Number(percent), 0.0)
        }
    }
}

/// Binary operator application with first-order (uncorrelated) uncertainty
/// propagation; comparisons yield booleans with zero sigma.
fn combine(op: OperatorKind, lhs: (Value, f64), rhs: (Value, f64)) -> (Value, f64) {
    let (lv, ls) = lhs;
    let (rv, rs) = rhs;
    let a = lv.as_number();
    let b = rv.as_number();

    if op.is_comparison() {
        let result = match op {
            OperatorKind::Equal => a == b,
            OperatorKind::NotEqual => a != b,
            OperatorKind::Less => a < b,
            OperatorKind::LessEqual => a <= b,
            OperatorKind::Greater => a > b,
            OperatorKind::GreaterEqual => a >= b,
            _ => unreachable!(),
        };
        return (Value::Bool(result), 0.0);
    }

    let (value, sigma) = match op {
        OperatorKind::Add => (a + b, ls.hypot(rs)),
        OperatorKind::Subtract => (a - b, ls.hypot(rs)),
        OperatorKind::Multiply => (a * b, (b * ls).hypot(a * rs)),
        OperatorKind::Divide => {
            let v = a / b;
            (v, (ls / b).hypot(a * rs / (b * b)))
        }
        OperatorKind::Power => {
            let v = a.powf(b);
            let d_base = b * a.powf(b - 1.0) * ls;
            let d_exp = if rs == 0.0 { 0.0 } else { v * a.ln() * rs };
            (v, d_base.hypot(d_exp))
        }
        _ => unreachable!(),
    };
    let sigma = if sigma.is_finite() { sigma.abs() } else { 0.0 };
    (Value::Number(value), sigma)
}

/// Evaluates a child expression and splits it into parallel value/sigma
/// columns; the workhorse input shape for the statistics functions.
pub(crate) fn numeric_columns(
    ctx: &EvalContext<'_>,
    id: NodeId,
) -> Result<(Vec<f64>, Vec<f64>), EngineError> {
    let rows = eval_node(ctx, id)?.per_spot(ctx.spot_count());
    let mut values = Vec::with_capacity(rows.len());
    let mut sigmas = Vec::with_capacity(rows.len());
    for (value, sigma) in rows {
        values.push(value.as_number());
        sigmas.push(sigma);
    }
    Ok((values, sigmas))
}

/// Evaluates a child expression down to a single scalar (first row).
pub(crate) fn scalar_arg(ctx: &EvalContext<'_>, id: NodeId) -> Result<f64, EngineError> {
    let out = eval_node(ctx, id)?;
    let value = match out {
        NodeOutput::PerSpot(rows) => rows.first().map(|(v, _)| v.as_number()),
        NodeOutput::Summary(row) => row.first().map(|v| v.as_number()),
    };
    Ok(value.unwrap_or(0.0))
}
