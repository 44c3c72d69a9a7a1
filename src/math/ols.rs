//! Weighted least squares solver.
//!
//! Every calibration fit reduces to small regression problems of the form:
//!
//! ```text
//! minimize Σ w_i (D_i - x_i^T β)^2
//! ```
//!
//! The model is linear in β once the shape parameter (exponent or asymptote) is
//! fixed, so we solve β once per grid candidate.
//!
//! Implementation choices:
//! - Rows are scaled by `sqrt(w_i)` by the caller, turning the problem into
//!   ordinary least squares.
//! - SVD handles tall design matrices (more rows than columns) and the nearly
//!   collinear columns that appear when the exponent approaches 1 or the
//!   asymptote moves far above the data.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit D = 2x + 3x^2 on x = [0.5, 1, 2]
        let x = DMatrix::from_row_slice(3, 2, &[0.5, 0.25, 1.0, 1.0, 2.0, 4.0]);
        let y = DVector::from_row_slice(&[1.75, 5.0, 16.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }
}
