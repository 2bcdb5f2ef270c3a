//! Weighted mean with full covariance.

use serde::{Deserialize, Serialize};

use super::matrix::Matrix;
use super::fisher_probability;

/// Result of [`wtd_av_corr`]. `bad` means the mean could not be computed
/// (singular covariance or non-positive weight sum); all other fields are
/// zeroed in that case and must not be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WtdAvCorrResult {
    pub bad: bool,
    pub mean: f64,
    pub sigma_mean: f64,
    pub mswd: f64,
    pub probability: f64,
}

impl WtdAvCorrResult {
    fn bad() -> Self {
        Self {
            bad: true,
            ..Self::default()
        }
    }
}

/// Weighted mean of `values` under the variance-covariance matrix `var_cov`.
///
/// mean  = sum_ij W_ij (v_i + v_j) / (2 sum_ij W_ij)  with W the inverse of
/// `var_cov`; sigma = sqrt(1 / sum_ij W_ij); MSWD is the weighted residual
/// sum of squares over n-1; probability comes from the F approximation to
/// chi-square. A single value is returned as-is with MSWD 0 and
/// probability 0 (the n > 1 guard).
pub fn wtd_av_corr(values: &[f64], var_cov: &Matrix) -> WtdAvCorrResult {
    let n = values.len();
    if n == 0 || var_cov.dimension() != n {
        return WtdAvCorrResult::bad();
    }

    if n == 1 {
        return WtdAvCorrResult {
            bad: false,
            mean: values[0],
            sigma_mean: var_cov.get(0, 0).max(0.0).sqrt(),
            mswd: 0.0,
            probability: 0.0,
        };
    }

    let omega_inv = match var_cov.invert() {
        Some(inv) => inv,
        None => return WtdAvCorrResult::bad(),
    };

    let denom = omega_inv.total();
    if !(denom > 0.0) || !denom.is_finite() {
        return WtdAvCorrResult::bad();
    }

    let mut numer = 0.0;
    for i in 0..n {
        for j in 0..n {
            numer += omega_inv.get(i, j) * (values[i] + values[j]);
        }
    }
    let mean = numer / (2.0 * denom);
    let sigma_mean = (1.0 / denom).sqrt();

    let mut wrss = 0.0;
    for i in 0..n {
        for j in 0..n {
            wrss += omega_inv.get(i, j) * (values[i] - mean) * (values[j] - mean);
        }
    }
    let mswd = wrss / (n as f64 - 1.0);
    if !mean.is_finite() || !sigma_mean.is_finite() || !mswd.is_finite() {
        return WtdAvCorrResult::bad();
    }

    WtdAvCorrResult {
        bad: false,
        mean,
        sigma_mean,
        mswd,
        probability: fisher_probability(mswd, n as f64 - 1.0),
    }
}
