use crate::error::EngineError;
use crate::eval::{eval_node, numeric_columns, EvalContext, NodeOutput};
use crate::functions::FunctionSpec;
use crate::stats;
use crate::tree::NodeId;
use crate::value::Value;

fn per_spot_unary(
    ctx: &EvalContext<'_>,
    child: NodeId,
    f: fn(f64) -> f64,
    derivative: fn(f64) -> f64,
) -> Result<NodeOutput, EngineError> {
    let rows = eval_node(ctx, child)?.per_spot(ctx.spot_count());
    Ok(NodeOutput::PerSpot(
        rows.into_iter()
            .map(|(value, sigma)| {
                let x = value.as_number();
                let propagated = (derivative(x) * sigma).abs();
                (
                    Value::Number(f(x)),
                    if propagated.is_finite() { propagated } else { 0.0 },
                )
            })
            .collect(),
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "ln",
        min_args: 1,
        max_args: 1,
        summary: false,
        implementation: ln,
    }
}

fn ln(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    per_spot_unary(ctx, args[0], f64::ln, |x| 1.0 / x)
}

inventory::submit! {
    FunctionSpec {
        name: "sqrt",
        min_args: 1,
        max_args: 1,
        summary: false,
        implementation: sqrt,
    }
}

fn sqrt(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    per_spot_unary(ctx, args[0], f64::sqrt, |x| 0.5 / x.sqrt())
}

inventory::submit! {
    FunctionSpec {
        name: "exp",
        min_args: 1,
        max_args: 1,
        summary: false,
        implementation: exp,
    }
}

fn exp(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    per_spot_unary(ctx, args[0], f64::exp, f64::exp)
}

inventory::submit! {
    FunctionSpec {
        name: "abs",
        min_args: 1,
        max_args: 1,
        summary: false,
        implementation: abs,
    }
}

fn abs(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    per_spot_unary(ctx, args[0], f64::abs, |_| 1.0)
}

inventory::submit! {
    FunctionSpec {
        name: "max",
        min_args: 2,
        max_args: 2,
        summary: false,
        implementation: max,
    }
}

fn max(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    per_spot_pick(ctx, args, |a, b| a >= b)
}

inventory::submit! {
    FunctionSpec {
        name: "min",
        min_args: 2,
        max_args: 2,
        summary: false,
        implementation: min,
    }
}

fn min(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    per_spot_pick(ctx, args, |a, b| a <= b)
}

fn per_spot_pick(
    ctx: &EvalContext<'_>,
    args: &[NodeId],
    keep_first: fn(f64, f64) -> bool,
) -> Result<NodeOutput, EngineError> {
    let n = ctx.spot_count();
    let lhs = eval_node(ctx, args[0])?.per_spot(n);
    let rhs = eval_node(ctx, args[1])?.per_spot(n);
    Ok(NodeOutput::PerSpot(
        lhs.into_iter()
            .zip(rhs)
            .map(|(l, r)| {
                if keep_first(l.0.as_number(), r.0.as_number()) {
                    l
                } else {
                    r
                }
            })
            .collect(),
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "totalCps",
        min_args: 1,
        max_args: 1,
        summary: false,
        implementation: total_cps,
    }
}

/// Explicit accessor for the total counts-per-second of a species reference;
/// the species leaf itself already evaluates to that quantity, so this is a
/// pass-through that exists for the inherited vocabulary.
fn total_cps(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    eval_node(ctx, args[0])
}

inventory::submit! {
    FunctionSpec {
        name: "sum",
        min_args: 1,
        max_args: 1,
        summary: true,
        implementation: sum,
    }
}

fn sum(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    let (values, sigmas) = numeric_columns(ctx, args[0])?;
    let total: f64 = values.iter().sum();
    let sigma = quadrature(&sigmas);
    Ok(NodeOutput::Summary(vec![
        Value::Number(total),
        Value::Number(sigma),
    ]))
}

inventory::submit! {
    FunctionSpec {
        name: "count",
        min_args: 1,
        max_args: 1,
        summary: true,
        implementation: count,
    }
}

fn count(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    let (values, _) = numeric_columns(ctx, args[0])?;
    Ok(NodeOutput::Summary(vec![Value::Number(values.len() as f64)]))
}

inventory::submit! {
    FunctionSpec {
        name: "average",
        min_args: 1,
        max_args: 1,
        summary: true,
        implementation: average,
    }
}

fn average(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    let (values, sigmas) = numeric_columns(ctx, args[0])?;
    if values.is_empty() {
        return Ok(NodeOutput::Summary(vec![Value::Number(0.0), Value::Number(0.0)]));
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sigma = quadrature(&sigmas) / n;
    Ok(NodeOutput::Summary(vec![
        Value::Number(mean),
        Value::Number(sigma),
    ]))
}

inventory::submit! {
    FunctionSpec {
        name: "median",
        min_args: 1,
        max_args: 1,
        summary: true,
        implementation: median,
    }
}

fn median(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    let (values, _) = numeric_columns(ctx, args[0])?;
    let m = stats::median(&values).unwrap_or(0.0);
    Ok(NodeOutput::Summary(vec![Value::Number(m)]))
}

fn quadrature(sigmas: &[f64]) -> f64 {
    sigmas.iter().map(|s| s * s).sum::<f64>().sqrt()
}
