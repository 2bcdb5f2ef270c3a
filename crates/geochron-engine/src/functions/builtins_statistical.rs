use crate::error::EngineError;
use crate::eval::{numeric_columns, scalar_arg, EvalContext, NodeOutput};
use crate::functions::FunctionSpec;
use crate::stats::{self, tukey_biweight, wtd_lin_corr, Matrix};
use crate::tree::NodeId;
use crate::value::Value;

inventory::submit! {
    FunctionSpec {
        name: "sqWtdAv",
        min_args: 1,
        max_args: 1,
        summary: true,
        implementation: sq_wtd_av,
    }
}

/// Weighted average of the argument's per-spot values under their one-sigma
/// uncertainties, with the standard single-point outlier rejection. Returns
/// `[mean, sigma_mean, mswd, probability]`.
fn sq_wtd_av(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    let (values, sigmas) = numeric_columns(ctx, args[0])?;
    let sig_rho = Matrix::diagonal_sigmas(&sigmas);
    let result = wtd_lin_corr(&values, &sig_rho, None);
    if result.bad {
        return Ok(NodeOutput::Summary(vec![Value::Number(0.0); 4]));
    }
    Ok(NodeOutput::Summary(vec![
        Value::Number(result.intercept),
        Value::Number(result.sigma_intercept),
        Value::Number(result.mswd),
        Value::Number(result.probability),
    ]))
}

inventory::submit! {
    FunctionSpec {
        name: "sqBiweight",
        min_args: 2,
        max_args: 2,
        summary: true,
        implementation: sq_biweight,
    }
}

/// Tukey's biweight robust mean of the first argument with the given tuning
/// constant. Returns `[mean, sigma]`.
fn sq_biweight(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    let (values, _) = numeric_columns(ctx, args[0])?;
    let tuning = scalar_arg(ctx, args[1])?;
    match tukey_biweight(&values, tuning) {
        Ok(result) => Ok(NodeOutput::Summary(vec![
            Value::Number(result.mean),
            Value::Number(result.sigma),
        ])),
        Err(_) => Ok(NodeOutput::Summary(vec![Value::Number(0.0); 2])),
    }
}

inventory::submit! {
    FunctionSpec {
        name: "robReg",
        min_args: 2,
        max_args: 2,
        summary: true,
        implementation: rob_reg,
    }
}

/// Robust regression of y (second argument) on x (first argument):
/// Theil-Sen slope with a median intercept. Returns
/// `[slope, sigma_slope, intercept, sigma_intercept]`.
fn rob_reg(ctx: &EvalContext<'_>, args: &[NodeId]) -> Result<NodeOutput, EngineError> {
    let (x, _) = numeric_columns(ctx, args[0])?;
    let (y, _) = numeric_columns(ctx, args[1])?;
    match theil_sen(&x, &y) {
        Some(fit) => Ok(NodeOutput::Summary(vec![
            Value::Number(fit.slope),
            Value::Number(fit.sigma_slope),
            Value::Number(fit.intercept),
            Value::Number(fit.sigma_intercept),
        ])),
        None => Ok(NodeOutput::Summary(vec![Value::Number(0.0); 4])),
    }
}

struct TheilSenFit {
    slope: f64,
    sigma_slope: f64,
    intercept: f64,
    sigma_intercept: f64,
}

/// Median-of-pairwise-slopes regression; scale estimates come from the MAD
/// of the pairwise slopes / per-point intercepts (1.4826 is the MAD-to-sigma
/// factor for a normal distribution).
fn theil_sen(x: &[f64], y: &[f64]) -> Option<TheilSenFit> {
    const MAD_TO_SIGMA: f64 = 1.4826;

    let n = x.len();
    if n < 2 || y.len() != n {
        return None;
    }

    let mut slopes = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[j] - x[i];
            if dx != 0.0 {
                slopes.push((y[j] - y[i]) / dx);
            }
        }
    }
    let slope = stats::median(&slopes)?;

    let intercepts: Vec<f64> = x.iter().zip(y).map(|(xi, yi)| yi - slope * xi).collect();
    let intercept = stats::median(&intercepts)?;

    let mad = |values: &[f64], center: f64| -> f64 {
        let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
        stats::median(&deviations).unwrap_or(0.0)
    };
    let sigma_slope = MAD_TO_SIGMA * mad(&slopes, slope);
    let sigma_intercept = MAD_TO_SIGMA * mad(&intercepts, intercept);

    Some(TheilSenFit {
        slope,
        sigma_slope,
        intercept,
        sigma_intercept,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theil_sen_recovers_a_clean_line() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [3.0, 5.0, 7.0, 9.0, 11.0];
        let fit = theil_sen(&x, &y).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!((fit.intercept - 1.0).abs() < 1e-12);
        assert!(fit.sigma_slope.abs() < 1e-12);
    }

    #[test]
    fn theil_sen_shrugs_off_an_outlier() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let mut y: Vec<f64> = x.iter().map(|xi| 2.0 * xi + 1.0).collect();
        y[3] = 100.0;
        let fit = theil_sen(&x, &y).unwrap();
        assert!((fit.slope - 2.0).abs() < 0.5, "slope = {}", fit.slope);
    }

    #[test]
    fn theil_sen_needs_two_points() {
        assert!(theil_sen(&[1.0], &[2.0]).is_none());
    }
}
