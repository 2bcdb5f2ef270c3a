//! Numeric statistics kernel.
//!
//! Pure functions over plain slices and small matrices. Nothing here touches
//! expressions or spots; the worksheet-style functions in
//! [`crate::functions`] call into this layer.

pub mod bigsqrt;
pub mod biweight;
pub mod matrix;
pub mod regression;
pub mod weighted_mean;

pub use bigsqrt::BigDecimal;
pub use biweight::{tukey_biweight, TukeyBiweightResult};
pub use matrix::Matrix;
pub use regression::{delete_point, wtd_lin_corr, WeightedLinearCorrResult, WtdLinCorrResult};
pub use weighted_mean::{wtd_av_corr, WtdAvCorrResult};

use statrs::distribution::{ContinuousCDF, FisherSnedecor};

/// Effectively-infinite second degree of freedom: an F test against it
/// approximates the chi-square test of the reduced statistic.
const CHI_SQUARE_APPROX_DF2: f64 = 1e9;

/// Fit probability of an MSWD with `df` degrees of freedom:
/// `1 - F_cdf(mswd; df, 1e9)`.
pub fn fisher_probability(mswd: f64, df: f64) -> f64 {
    if !mswd.is_finite() || df < 1.0 {
        return 0.0;
    }
    if mswd <= 0.0 {
        return 1.0;
    }
    let dist = match FisherSnedecor::new(df, CHI_SQUARE_APPROX_DF2) {
        Ok(d) => d,
        Err(_) => return 0.0,
    };
    let mut p = 1.0 - dist.cdf(mswd);
    // Clamp minor floating error.
    if p < 0.0 && p > -1e-12 {
        p = 0.0;
    } else if p > 1.0 && p < 1.0 + 1e-12 {
        p = 1.0;
    }
    p
}

/// Sample median. Returns `None` for an empty slice.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_of_perfect_fit_is_one() {
        assert_eq!(fisher_probability(0.0, 3.0), 1.0);
    }

    #[test]
    fn probability_decreases_with_mswd() {
        let p1 = fisher_probability(1.0, 5.0);
        let p2 = fisher_probability(3.0, 5.0);
        assert!(p1 > p2);
        assert!(p2 > 0.0);
    }

    #[test]
    fn probability_near_half_for_mswd_one_large_n() {
        // For MSWD = 1 the upper tail of the reference distribution sits close
        // to one half once there are plenty of degrees of freedom.
        let p = fisher_probability(1.0, 50.0);
        assert!(p > 0.4 && p < 0.6, "p = {p}");
    }

    #[test]
    fn median_odd_even_empty() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }
}
