use crate::error::EngineError;
use crate::eval::{eval_node, EvalContext, NodeOutput};
use crate::functions::FunctionSpec;
use crate::tree::NodeId;
use crate::value::Value;

inventory::submit! {
    FunctionSpec {
        name: "if",
        min_args: 3,
        max_args: 3,
        summary: false,
        implementation: if_fn,
    }
}

fn if_fn(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    let n = ctx.spot_count();
    let condition = eval_node(ctx, args[0])?.per_spot(n);
    let when_true = eval_node(ctx, args[1])?.per_spot(n);
    let when_false = eval_node(ctx, args[2])?.per_spot(n);
    Ok(NodeOutput::PerSpot(
        condition
            .into_iter()
            .zip(when_true.into_iter().zip(when_false))
            .map(|((cond, _), (t, f))| if cond.is_truthy() { t } else { f })
            .collect(),
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "and",
        min_args: 2,
        max_args: 2,
        summary: false,
        implementation: and,
    }
}

fn and(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    binary_logic(ctx, args, |a, b| a && b)
}

inventory::submit! {
    FunctionSpec {
        name: "or",
        min_args: 2,
        max_args: 2,
        summary: false,
        implementation: or,
    }
}

fn or(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    binary_logic(ctx, args, |a, b| a || b)
}

fn binary_logic(
    ctx: &EvalContext<'_>,
    args: &[NodeId],
    op: fn(bool, bool) -> bool,
) -> Result<NodeOutput, EngineError> {
    let n = ctx.spot_count();
    let lhs = eval_node(ctx, args[0])?.per_spot(n);
    let rhs = eval_node(ctx, args[1])?.per_spot(n);
    Ok(NodeOutput::PerSpot(
        lhs.into_iter()
            .zip(rhs)
            .map(|((l, _), (r, _))| (Value::Bool(op(l.is_truthy(), r.is_truthy())), 0.0))
            .collect(),
    ))
}

inventory::submit! {
    FunctionSpec {
        name: "not",
        min_args: 1,
        max_args: 1,
        summary: false,
        implementation: not,
    }
}

fn not(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    let rows = eval_node(ctx, args[0])?.per_spot(ctx.spot_count());
    Ok(NodeOutput::PerSpot(
        rows.into_iter()
            .map(|(value, _)| (Value::Bool(!value.is_truthy()), 0.0))
            .collect(),
    ))
}
