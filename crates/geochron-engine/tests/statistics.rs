use geochron_engine::stats::{
    tukey_biweight, wtd_av_corr, wtd_lin_corr, BigDecimal, Matrix,
};

#[test]
fn weighted_average_of_consistent_scatter() {
    // Four measurements with unit-free variances of 0.1 and no correlations.
    let y = [10.0, 10.2, 9.8, 10.1];
    let mut cov = Matrix::zeros(4);
    for i in 0..4 {
        cov.set(i, i, 0.1);
    }
    let result = wtd_av_corr(&y, &cov);
    assert!(!result.bad);
    assert!((result.mean - 10.025).abs() < 1e-9);
    assert!(result.mswd < 0.5, "mswd = {}", result.mswd);
    assert!(result.probability > 0.1, "probability = {}", result.probability);
}

#[test]
fn weighted_average_single_value_boundary() {
    let cov = Matrix::from_rows(1, vec![0.04]);
    let result = wtd_av_corr(&[42.0], &cov);
    assert!(!result.bad);
    assert_eq!(result.mean, 42.0);
    assert_eq!(result.mswd, 0.0);
    assert_eq!(result.probability, 0.0);
}

#[test]
fn deletion_count_never_exceeds_the_cap() {
    // n = 9 in averaging mode (k = 1): the cap is 1 + (9 - 1) / 8 = 2.
    let y = [10.0, 10.1, 9.9, 10.05, 9.95, 10.02, 9.98, 10.01, 50.0];
    let sig_rho = Matrix::diagonal_sigmas(&[0.1; 9]);
    let result = wtd_lin_corr(&y, &sig_rho, None);
    assert!(!result.bad);
    assert!(result.deletions <= 2, "deletions = {}", result.deletions);
}

#[test]
fn biweight_agrees_with_mean_on_clean_symmetric_data() {
    let values = [9.6, 9.8, 10.0, 10.2, 10.4];
    let arithmetic = values.iter().sum::<f64>() / values.len() as f64;
    let result = tukey_biweight(&values, 9.0).unwrap();
    assert!((result.mean - arithmetic).abs() < 1e-9);
    assert!(result.iterations < 101, "iterations = {}", result.iterations);
}

#[test]
fn babylonian_sqrt_of_two_to_34_digits() {
    let root = BigDecimal::from_integer(2).sqrt_babylonian(34).unwrap();
    assert_eq!(root.to_string(), "1.414213562373095048801688724209698");
}
