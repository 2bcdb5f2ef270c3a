use crate::constants::{LAMBDA_235, LAMBDA_238, URANIUM_238_235_RATIO};
use crate::error::EngineError;
use crate::eval::{eval_node, EvalContext, NodeOutput};
use crate::functions::FunctionSpec;
use crate::tree::NodeId;
use crate::value::Value;

inventory::submit! {
    FunctionSpec {
        name: "agePb76",
        min_args: 1,
        max_args: 1,
        summary: false,
        implementation: age_pb76_fn,
    }
}

/// Radiogenic 207Pb/206Pb age, per spot. The argument supplies the measured
/// 207/206 ratio with its one-sigma; the uncertainty maps through the slope
/// of the ratio-age curve.
fn age_pb76_fn(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    let rows = eval_node(ctx, args[0])?.per_spot(ctx.spot_count());
    Ok(NodeOutput::PerSpot(
        rows.into_iter()
            .map(|(value, sigma)| {
                let ratio = value.as_number();
                match age_pb76(ratio) {
                    Some(age) => {
                        let slope = pb76_ratio_slope(age);
                        let age_sigma = if slope != 0.0 && sigma.is_finite() {
                            (sigma / slope).abs()
                        } else {
                            0.0
                        };
                        (Value::Number(age), age_sigma)
                    }
                    None => (Value::Number(0.0), 0.0),
                }
            })
            .collect(),
    ))
}

/// 207Pb/206Pb ratio on the concordia curve at age `t` (years).
fn pb76_ratio(t: f64) -> f64 {
    ((LAMBDA_235 * t).exp() - 1.0) / (URANIUM_238_235_RATIO * ((LAMBDA_238 * t).exp() - 1.0))
}

fn pb76_ratio_slope(t: f64) -> f64 {
    let e235 = (LAMBDA_235 * t).exp();
    let e238 = (LAMBDA_238 * t).exp();
    let denominator = URANIUM_238_235_RATIO * (e238 - 1.0);
    let numerator = e235 - 1.0;
    (LAMBDA_235 * e235 * denominator
        - numerator * URANIUM_238_235_RATIO * LAMBDA_238 * e238)
        / (denominator * denominator)
}

/// Newton solve of the 207/206 ratio for age. Ratios at or below the zero-age
/// limit have no positive solution and yield `None`.
pub(crate) fn age_pb76(ratio: f64) -> Option<f64> {
    if !ratio.is_finite() {
        return None;
    }
    // t -> 0 limit of the ratio curve.
    let zero_age_ratio = LAMBDA_235 / (URANIUM_238_235_RATIO * LAMBDA_238);
    if ratio <= zero_age_ratio {
        return None;
    }

    let mut t = 1.0e9;
    for _ in 0..100 {
        let f = pb76_ratio(t) - ratio;
        let slope = pb76_ratio_slope(t);
        if slope == 0.0 || !slope.is_finite() {
            return None;
        }
        let dt = f / slope;
        t -= dt;
        if t <= 0.0 {
            t = 1.0;
        }
        if dt.abs() < 1e-3 {
            return Some(t);
        }
    }
    Some(t)
}

inventory::submit! {
    FunctionSpec {
        name: "concordiaTW",
        min_args: 2,
        max_args: 2,
        summary: false,
        implementation: concordia_tw_fn,
    }
}

/// Tera-Wasserburg concordia age, per spot. Arguments are the 238U/206Pb and
/// 207Pb/206Pb ratios with their one-sigma uncertainties; each spot's age
/// minimizes the error-weighted squared distance to the concordia curve.
fn concordia_tw_fn(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    let n = ctx.spot_count();
    let xs = eval_node(ctx, args[0])?.per_spot(n);
    let ys = eval_node(ctx, args[1])?.per_spot(n);
    Ok(NodeOutput::PerSpot(
        xs.into_iter()
            .zip(ys)
            .map(|((xv, xs1), (yv, ys1))| {
                match concordia_tw(xv.as_number(), xs1, yv.as_number(), ys1) {
                    Some((age, sigma)) => (Value::Number(age), sigma),
                    None => (Value::Number(0.0), 0.0),
                }
            })
            .collect(),
    ))
}

fn tw_x(t: f64) -> f64 {
    1.0 / ((LAMBDA_238 * t).exp() - 1.0)
}

/// One-parameter Newton minimization of the weighted squared distance to the
/// Tera-Wasserburg curve `(x(t), y(t))`. Returns the age and the curvature
/// based one-sigma.
pub(crate) fn concordia_tw(
    x: f64,
    sigma_x: f64,
    y: f64,
    sigma_y: f64,
) -> Option<(f64, f64)> {
    if !x.is_finite() || !y.is_finite() || x <= 0.0 {
        return None;
    }
    let wx = if sigma_x > 0.0 { sigma_x } else { 1.0 };
    let wy = if sigma_y > 0.0 { sigma_y } else { 1.0 };

    let misfit = |t: f64| -> f64 {
        let dx = (tw_x(t) - x) / wx;
        let dy = (pb76_ratio(t) - y) / wy;
        dx * dx + dy * dy
    };

    // Project the x coordinate onto the curve for a starting age.
    let mut t = ((1.0 + 1.0 / x).ln() / LAMBDA_238).clamp(1.0e3, 4.6e9);

    for _ in 0..100 {
        let h = (t * 1e-6).max(1.0);
        let s0 = misfit(t);
        let plus = misfit(t + h);
        let minus = misfit(t - h);
        let first = (plus - minus) / (2.0 * h);
        let second = (plus - 2.0 * s0 + minus) / (h * h);
        let dt = if second > 0.0 && second.is_finite() {
            -first / second
        } else {
            -first.signum() * 0.05 * t
        };
        t = (t + dt).clamp(1.0e3, 4.6e9);
        if dt.abs() < 1.0 {
            break;
        }
    }

    let h = (t * 1e-6).max(1.0);
    let second = (misfit(t + h) - 2.0 * misfit(t) + misfit(t - h)) / (h * h);
    let sigma_t = if second > 0.0 && second.is_finite() {
        (2.0 / second).sqrt()
    } else {
        0.0
    };
    Some((t, sigma_t))
}
