//! Linear least squares and pseudo-inverse.
//!
//! Both the trust-region step and the covariance estimate need to solve small
//! systems that may be rank-deficient (a decay constant that drifted far outside
//! the time window leaves its amplitudes unidentifiable).
//!
//! Implementation choices:
//! - We use SVD so tall and rank-deficient matrices are both handled.
//!   (Nalgebra's `QR::solve` is intended for square systems and will panic for
//!   non-square matrices.)
//! - Parameter counts are tiny (a few dozen at most), so SVD cost is irrelevant.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Moore–Penrose pseudo-inverse with singular values below `rcond * σ_max` dropped.
///
/// Returns `None` when every singular value is dropped or the result is not finite.
pub fn pseudo_inverse(m: &DMatrix<f64>, rcond: f64) -> Option<DMatrix<f64>> {
    let svd = m.clone().svd(true, true);
    let sigma_max = svd.singular_values.iter().copied().fold(0.0, f64::max);
    if !(sigma_max > 0.0) || !sigma_max.is_finite() {
        return None;
    }
    let eps = rcond * sigma_max;
    let pinv = svd.pseudo_inverse(eps).ok()?;
    pinv.iter().all(|v| v.is_finite()).then_some(pinv)
}

/// Numerical rank: count of singular values above `rcond * σ_max`.
pub fn rank(m: &DMatrix<f64>, rcond: f64) -> usize {
    let sv = m.singular_values();
    let sigma_max = sv.iter().copied().fold(0.0, f64::max);
    sv.iter().filter(|&&s| s > rcond * sigma_max).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn pseudo_inverse_of_invertible_matrix_is_inverse() {
        let m = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);
        let p = pseudo_inverse(&m, 1e-12).unwrap();
        let id = &m * &p;
        assert!((id[(0, 0)] - 1.0).abs() < 1e-12);
        assert!(id[(0, 1)].abs() < 1e-12);
    }

    #[test]
    fn rank_detects_collinear_columns() {
        let m = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 2.0, 4.0, 3.0, 6.0]);
        assert_eq!(rank(&m, 1e-10), 1);
        assert!(pseudo_inverse(&DMatrix::zeros(2, 2), 1e-12).is_none());
    }
}
