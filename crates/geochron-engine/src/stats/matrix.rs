//! Dense square matrices for the weighted-fit kernel.
//!
//! The fits work with two closely related representations:
//!
//! - a *sigma-rho* matrix, whose diagonal holds one-sigma uncertainties and
//!   whose off-diagonal entries hold correlation coefficients, and
//! - a *variance-covariance* matrix derived from it.
//!
//! Inversion is Gauss-Jordan with partial pivoting; a singular matrix yields
//! `None` and callers flag their result `bad` rather than erroring.

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    n: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * n],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n);
        for i in 0..n {
            m.set(i, i, 1.0);
        }
        m
    }

    /// Builds an n-by-n matrix from row-major data. Panics in debug builds if
    /// the length is not a perfect square of `n`.
    pub fn from_rows(n: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), n * n);
        Self { n, data }
    }

    /// Diagonal sigma-rho matrix: per-point one-sigma uncertainties and no
    /// correlations.
    pub fn diagonal_sigmas(sigmas: &[f64]) -> Self {
        let mut m = Self::zeros(sigmas.len());
        for (i, s) in sigmas.iter().enumerate() {
            m.set(i, i, *s);
        }
        m
    }

    pub fn dimension(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.n + col] = value;
    }

    /// Converts a sigma-rho matrix (diagonal = one-sigma, off-diagonal =
    /// correlation coefficient) into a variance-covariance matrix.
    pub fn correlations_to_covariances(&self) -> Matrix {
        let n = self.n;
        let mut cov = Matrix::zeros(n);
        for i in 0..n {
            let si = self.get(i, i);
            cov.set(i, i, si * si);
        }
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    let rho = self.get(i, j);
                    cov.set(i, j, rho * self.get(i, i) * self.get(j, j));
                }
            }
        }
        cov
    }

    /// Gauss-Jordan inversion with partial pivoting. Returns `None` when the
    /// matrix is singular (or numerically indistinguishable from singular).
    pub fn invert(&self) -> Option<Matrix> {
        let n = self.n;
        if n == 0 {
            return None;
        }

        let mut a = self.clone();
        let mut inv = Matrix::identity(n);

        for col in 0..n {
            // Pivot on the largest remaining entry in this column.
            let mut pivot_row = col;
            let mut pivot_abs = a.get(col, col).abs();
            for row in (col + 1)..n {
                let candidate = a.get(row, col).abs();
                if candidate > pivot_abs {
                    pivot_row = row;
                    pivot_abs = candidate;
                }
            }
            if pivot_abs == 0.0 || !pivot_abs.is_finite() {
                return None;
            }
            if pivot_row != col {
                a.swap_rows(col, pivot_row);
                inv.swap_rows(col, pivot_row);
            }

            let pivot = a.get(col, col);
            for j in 0..n {
                a.set(col, j, a.get(col, j) / pivot);
                inv.set(col, j, inv.get(col, j) / pivot);
            }

            for row in 0..n {
                if row == col {
                    continue;
                }
                let factor = a.get(row, col);
                if factor == 0.0 {
                    continue;
                }
                for j in 0..n {
                    a.set(row, j, a.get(row, j) - factor * a.get(col, j));
                    inv.set(row, j, inv.get(row, j) - factor * inv.get(col, j));
                }
            }
        }

        if inv.data.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(inv)
    }

    /// Sum of every entry.
    pub fn total(&self) -> f64 {
        self.data.iter().sum()
    }

    fn swap_rows(&mut self, r1: usize, r2: usize) {
        if r1 == r2 {
            return;
        }
        for j in 0..self.n {
            let tmp = self.get(r1, j);
            self.set(r1, j, self.get(r2, j));
            self.set(r2, j, tmp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invert_identity() {
        let m = Matrix::identity(3);
        assert_eq!(m.invert().unwrap(), Matrix::identity(3));
    }

    #[test]
    fn invert_2x2() {
        let m = Matrix::from_rows(2, vec![4.0, 7.0, 2.0, 6.0]);
        let inv = m.invert().unwrap();
        // Determinant is 10.
        assert!((inv.get(0, 0) - 0.6).abs() < 1e-12);
        assert!((inv.get(0, 1) + 0.7).abs() < 1e-12);
        assert!((inv.get(1, 0) + 0.2).abs() < 1e-12);
        assert!((inv.get(1, 1) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn singular_matrix_is_none() {
        let m = Matrix::from_rows(2, vec![1.0, 2.0, 2.0, 4.0]);
        assert!(m.invert().is_none());
    }

    #[test]
    fn correlations_to_covariances_diagonal_and_off_diagonal() {
        let mut sig_rho = Matrix::diagonal_sigmas(&[0.1, 0.2]);
        sig_rho.set(0, 1, 0.5);
        sig_rho.set(1, 0, 0.5);
        let cov = sig_rho.correlations_to_covariances();
        assert!((cov.get(0, 0) - 0.01).abs() < 1e-15);
        assert!((cov.get(1, 1) - 0.04).abs() < 1e-15);
        assert!((cov.get(0, 1) - 0.5 * 0.1 * 0.2).abs() < 1e-15);
        assert_eq!(cov.get(0, 1), cov.get(1, 0));
    }
}
