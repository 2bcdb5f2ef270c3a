//! Weighted linear regression and the self-pruning fit driver.
//!
//! `weighted_linear_corr` is the closed-form generalized least squares fit
//! under a full covariance matrix. `wtd_lin_corr` wraps it (or the weighted
//! mean, when no abscissa is supplied) with the single-point-deletion outlier
//! rejection loop used throughout the reduction: each pass trial-deletes every
//! point, and the best candidate is accepted only when it slashes the MSWD
//! past a size-dependent tolerance and leaves a plausible fit behind.

use serde::{Deserialize, Serialize};

use super::fisher_probability;
use super::matrix::Matrix;
use super::weighted_mean::wtd_av_corr;

/// Result of the closed-form GLS fit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WeightedLinearCorrResult {
    pub bad: bool,
    pub slope: f64,
    pub intercept: f64,
    pub sigma_slope: f64,
    pub sigma_intercept: f64,
    pub covariance_slope_intercept: f64,
    pub mswd: f64,
    pub probability: f64,
}

impl WeightedLinearCorrResult {
    fn bad() -> Self {
        Self {
            bad: true,
            ..Self::default()
        }
    }
}

/// Generalized least squares line fit of `y` against `x` under the sigma-rho
/// matrix `sigma_rho_y` (diagonal = one-sigma, off-diagonal = correlation).
///
/// Builds the covariance matrix, inverts it, and solves the 2x2 normal
/// equations; the inverse Fisher information supplies the parameter
/// uncertainties and their covariance. MSWD is the weighted residual sum of
/// squares over n-2 and the probability is the F approximation to the
/// chi-square test.
pub fn weighted_linear_corr(y: &[f64], x: &[f64], sigma_rho_y: &Matrix) -> WeightedLinearCorrResult {
    let n = y.len();
    if n < 3 || x.len() != n || sigma_rho_y.dimension() != n {
        return WeightedLinearCorrResult::bad();
    }

    let omega_inv = match sigma_rho_y.correlations_to_covariances().invert() {
        Some(inv) => inv,
        None => return WeightedLinearCorrResult::bad(),
    };

    let mut s = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for i in 0..n {
        for j in 0..n {
            let w = omega_inv.get(i, j);
            s += w;
            sx += w * x[j];
            sy += w * y[j];
            sxx += w * x[i] * x[j];
            sxy += w * x[i] * y[j];
        }
    }

    // Fisher information [[s, sx], [sx, sxx]]; its determinant gates the fit.
    let det = s * sxx - sx * sx;
    if det == 0.0 || !det.is_finite() {
        return WeightedLinearCorrResult::bad();
    }

    let slope = (s * sxy - sx * sy) / det;
    let intercept = (sxx * sy - sx * sxy) / det;
    let var_slope = s / det;
    let var_intercept = sxx / det;
    let covariance_slope_intercept = -sx / det;
    if var_slope < 0.0 || var_intercept < 0.0 {
        return WeightedLinearCorrResult::bad();
    }

    let mut wrss = 0.0;
    for i in 0..n {
        for j in 0..n {
            let ri = y[i] - (intercept + slope * x[i]);
            let rj = y[j] - (intercept + slope * x[j]);
            wrss += omega_inv.get(i, j) * ri * rj;
        }
    }
    let mswd = wrss / (n as f64 - 2.0);

    let result = WeightedLinearCorrResult {
        bad: false,
        slope,
        intercept,
        sigma_slope: var_slope.sqrt(),
        sigma_intercept: var_intercept.sqrt(),
        covariance_slope_intercept,
        mswd,
        probability: fisher_probability(mswd, n as f64 - 2.0),
    };
    if !result.slope.is_finite() || !result.intercept.is_finite() || !result.mswd.is_finite() {
        return WeightedLinearCorrResult::bad();
    }
    result
}

/// Result of [`wtd_lin_corr`]. In weighted-average mode the slope fields stay
/// zero. `rejected_index` is the original index of the last accepted deletion,
/// `None` when no point was removed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WtdLinCorrResult {
    pub bad: bool,
    pub intercept: f64,
    pub sigma_intercept: f64,
    pub slope: f64,
    pub sigma_slope: f64,
    pub mswd: f64,
    pub probability: f64,
    pub rejected_index: Option<usize>,
    pub deletions: usize,
}

impl WtdLinCorrResult {
    fn bad() -> Self {
        Self {
            bad: true,
            ..Self::default()
        }
    }
}

/// MSWD-improvement tolerance for accepting a deletion, by point count.
fn mswd_ratio_tolerance(n: usize) -> f64 {
    const TABLE: [f64; 6] = [0.0, 0.1, 0.15, 0.2, 0.2, 0.25];
    if n > 7 {
        0.3
    } else if n >= 2 {
        TABLE[n - 2]
    } else {
        0.0
    }
}

#[derive(Clone)]
struct FitState {
    y: Vec<f64>,
    x: Option<Vec<f64>>,
    sig_rho: Matrix,
    // Original position of each surviving point.
    indices: Vec<usize>,
}

#[derive(Clone, Copy)]
struct Fit {
    intercept: f64,
    sigma_intercept: f64,
    slope: f64,
    sigma_slope: f64,
    mswd: f64,
    probability: f64,
}

fn fit(state: &FitState) -> Option<Fit> {
    match &state.x {
        Some(x) => {
            let f = weighted_linear_corr(&state.y, x, &state.sig_rho);
            if f.bad {
                return None;
            }
            Some(Fit {
                intercept: f.intercept,
                sigma_intercept: f.sigma_intercept,
                slope: f.slope,
                sigma_slope: f.sigma_slope,
                mswd: f.mswd,
                probability: f.probability,
            })
        }
        None => {
            let cov = state.sig_rho.correlations_to_covariances();
            let f = wtd_av_corr(&state.y, &cov);
            if f.bad {
                return None;
            }
            Some(Fit {
                intercept: f.mean,
                sigma_intercept: f.sigma_mean,
                slope: 0.0,
                sigma_slope: 0.0,
                mswd: f.mswd,
                probability: f.probability,
            })
        }
    }
}

/// Weighted fit with automatic single-point deletion.
///
/// Regression mode when `x` is a parallel abscissa vector; weighted-average
/// mode otherwise (including a length mismatch, which the legacy treated as
/// "no abscissa"). `sig_rho` carries one-sigma uncertainties on its diagonal
/// and correlation coefficients off it.
///
/// Deletion policy: nothing is removed when the full-data fit probability
/// already exceeds 0.1. Otherwise each pass trial-deletes every surviving
/// point and accepts the lowest-MSWD candidate only if its MSWD over the
/// current MSWD beats the size tolerance and its own probability exceeds 0.1.
/// At most `1 + (n - k) / 8` points are removed (k = 2 for regression, 1 for
/// averaging). When the final probability is below 0.05 both uncertainties
/// are expanded by sqrt(MSWD).
pub fn wtd_lin_corr(y: &[f64], sig_rho: &Matrix, x: Option<&[f64]>) -> WtdLinCorrResult {
    let n = y.len();
    if n == 0 || sig_rho.dimension() != n {
        return WtdLinCorrResult::bad();
    }

    let x = x.filter(|x| x.len() == n);
    let k = if x.is_some() { 2 } else { 1 };
    let max_rej = 1 + (n - k.min(n)) / 8;
    let tolerance = mswd_ratio_tolerance(n);

    let mut state = FitState {
        y: y.to_vec(),
        x: x.map(|x| x.to_vec()),
        sig_rho: sig_rho.clone(),
        indices: (0..n).collect(),
    };
    let mut current = match fit(&state) {
        Some(f) => f,
        None => return WtdLinCorrResult::bad(),
    };

    let mut deletions = 0;
    let mut rejected_index = None;

    while deletions < max_rej && current.probability <= 0.1 {
        let mut best: Option<(usize, Fit)> = None;
        for candidate in 0..state.y.len() {
            let (y2, sig2, x2) =
                delete_point(candidate, &state.y, &state.sig_rho, state.x.as_deref());
            let trial_state = FitState {
                y: y2,
                x: x2,
                sig_rho: sig2,
                indices: Vec::new(),
            };
            if let Some(trial) = fit(&trial_state) {
                let better = match &best {
                    Some((_, b)) => trial.mswd < b.mswd,
                    None => true,
                };
                if better {
                    best = Some((candidate, trial));
                }
            }
        }

        let accepted = match best {
            Some((candidate, trial))
                if current.mswd > 0.0
                    && trial.mswd / current.mswd < tolerance
                    && trial.probability > 0.1 =>
            {
                Some((candidate, trial))
            }
            _ => None,
        };

        match accepted {
            Some((candidate, trial)) => {
                let (y2, sig2, x2) =
                    delete_point(candidate, &state.y, &state.sig_rho, state.x.as_deref());
                rejected_index = Some(state.indices[candidate]);
                state.indices.remove(candidate);
                state.y = y2;
                state.sig_rho = sig2;
                state.x = x2;
                current = trial;
                deletions += 1;
            }
            None => break,
        }
    }

    let mut result = WtdLinCorrResult {
        bad: false,
        intercept: current.intercept,
        sigma_intercept: current.sigma_intercept,
        slope: current.slope,
        sigma_slope: current.sigma_slope,
        mswd: current.mswd,
        probability: current.probability,
        rejected_index,
        deletions,
    };

    // Error expansion for poor fits.
    if result.probability < 0.05 && result.mswd > 0.0 {
        let expand = result.mswd.sqrt();
        result.sigma_intercept *= expand;
        result.sigma_slope *= expand;
    }
    result
}

/// Removes the point at `rej` from the vectors and the sigma-rho matrix,
/// preserving relative order: entries before the rejection index copy
/// straight across, entries after shift down by one. The off-diagonal pair
/// that would bridge the removed point's former neighbours is zeroed rather
/// than shifted, because those points were never assigned a correlation of
/// their own.
pub fn delete_point(
    rej: usize,
    y: &[f64],
    sig_rho: &Matrix,
    x: Option<&[f64]>,
) -> (Vec<f64>, Matrix, Option<Vec<f64>>) {
    let n = y.len();
    debug_assert!(rej < n);
    let m = n - 1;

    let map = |i: usize| if i < rej { i } else { i + 1 };

    let mut y2 = Vec::with_capacity(m);
    for i in 0..m {
        y2.push(y[map(i)]);
    }
    let x2 = x.map(|x| {
        let mut x2 = Vec::with_capacity(m);
        for i in 0..m {
            x2.push(x[map(i)]);
        }
        x2
    });

    let mut sig2 = Matrix::zeros(m);
    for i in 0..m {
        for j in 0..m {
            sig2.set(i, j, sig_rho.get(map(i), map(j)));
        }
    }
    if rej >= 1 && rej <= m - 1 {
        sig2.set(rej - 1, rej, 0.0);
        sig2.set(rej, rej - 1, 0.0);
    }

    (y2, sig2, x2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_line_has_zero_mswd() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [3.0, 5.0, 7.0, 9.0];
        let sig = Matrix::diagonal_sigmas(&[0.1, 0.1, 0.1, 0.1]);
        let f = weighted_linear_corr(&y, &x, &sig);
        assert!(!f.bad);
        assert!((f.slope - 2.0).abs() < 1e-9);
        assert!((f.intercept - 1.0).abs() < 1e-9);
        assert!(f.mswd.abs() < 1e-9);
        assert!(f.probability > 0.99);
    }

    #[test]
    fn regression_uncertainties_match_unweighted_formulas() {
        // With equal sigmas the GLS solution collapses to ordinary least
        // squares: var(slope) = sigma^2 / sum((x - xbar)^2).
        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let y = [0.1, 0.9, 2.1, 2.9, 4.1];
        let sigma = 0.1;
        let sig = Matrix::diagonal_sigmas(&[sigma; 5]);
        let f = weighted_linear_corr(&y, &x, &sig);
        assert!(!f.bad);
        let ssx: f64 = x.iter().map(|xi| (xi - 2.0) * (xi - 2.0)).sum();
        assert!((f.sigma_slope - sigma / ssx.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn too_few_points_is_bad() {
        let sig = Matrix::diagonal_sigmas(&[0.1, 0.1]);
        assert!(weighted_linear_corr(&[1.0, 2.0], &[0.0, 1.0], &sig).bad);
    }

    #[test]
    fn delete_point_shifts_and_zeroes_bridge() {
        let y = [1.0, 2.0, 3.0, 4.0];
        let mut sig = Matrix::diagonal_sigmas(&[0.1, 0.2, 0.3, 0.4]);
        // Banded correlations between neighbours.
        for i in 0..3 {
            sig.set(i, i + 1, 0.5);
            sig.set(i + 1, i, 0.5);
        }
        let (y2, sig2, _) = delete_point(1, &y, &sig, None);
        assert_eq!(y2, vec![1.0, 3.0, 4.0]);
        assert_eq!(sig2.get(0, 0), 0.1);
        assert_eq!(sig2.get(1, 1), 0.3);
        assert_eq!(sig2.get(2, 2), 0.4);
        // The pair that bridged the removed point is zeroed...
        assert_eq!(sig2.get(0, 1), 0.0);
        assert_eq!(sig2.get(1, 0), 0.0);
        // ...while the correlation beyond it shifts down intact.
        assert_eq!(sig2.get(1, 2), 0.5);
    }

    #[test]
    fn deletion_cap_honoured_for_nine_point_average() {
        // n = 9, averaging (k = 1): at most 1 + (9 - 1) / 8 = 2 deletions.
        let mut y = vec![10.0, 10.1, 9.9, 10.05, 9.95, 10.02, 9.98, 10.01];
        y.push(50.0);
        let sig = Matrix::diagonal_sigmas(&[0.1; 9]);
        let result = wtd_lin_corr(&y, &sig, None);
        assert!(!result.bad);
        assert!(result.deletions <= 2, "deletions = {}", result.deletions);
        // The gross outlier is the point that goes.
        assert_eq!(result.rejected_index, Some(8));
        assert!((result.intercept - 10.0).abs() < 0.1);
    }

    #[test]
    fn consistent_data_keeps_every_point() {
        let y = [10.0, 10.05, 9.95, 10.02];
        let sig = Matrix::diagonal_sigmas(&[0.1; 4]);
        let result = wtd_lin_corr(&y, &sig, None);
        assert!(!result.bad);
        assert_eq!(result.deletions, 0);
        assert_eq!(result.rejected_index, None);
    }

    #[test]
    fn length_mismatch_falls_back_to_average_mode() {
        let y = [10.0, 10.05, 9.95, 10.02];
        let sig = Matrix::diagonal_sigmas(&[0.1; 4]);
        let x = [1.0, 2.0];
        let result = wtd_lin_corr(&y, &sig, Some(&x));
        assert!(!result.bad);
        assert_eq!(result.slope, 0.0);
        assert!((result.intercept - 10.005).abs() < 1e-9);
    }
}
