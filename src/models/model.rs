//! Model evaluation for the power and rational dose forms.
//!
//! The fitter relies on three primitive operations:
//! - build a design row for a given netOD and shape parameter (for OLS)
//! - predict `D(x)` given betas and shape (residuals, lookups)
//! - the slope `dD/dx` (root finding, uncertainty propagation)

use crate::domain::ModelKind;
use crate::math::{saturating, saturating_slope, signed_pow, signed_pow_slope};

/// Fill a design row for the given model kind.
///
/// Neither form has an intercept: zero netOD is zero dose.
///
/// # Panics
/// Panics if `out` is shorter than `model.beta_len()`.
pub fn fill_design_row(model: ModelKind, x: f64, shape: f64, out: &mut [f64]) {
    match model {
        ModelKind::Power => {
            out[0] = x;
            out[1] = signed_pow(x, shape);
        }
        ModelKind::Rational => {
            out[0] = saturating(x, shape);
            out[1] = x;
        }
    }
}

/// Predict dose at netOD `x`.
pub fn predict(model: ModelKind, x: f64, betas: &[f64], shape: f64) -> f64 {
    match model {
        ModelKind::Power => betas[0] * x + betas[1] * signed_pow(x, shape),
        ModelKind::Rational => betas[0] * saturating(x, shape) + betas[1] * x,
    }
}

/// Derivative `dD/dx` at netOD `x`.
pub fn slope(model: ModelKind, x: f64, betas: &[f64], shape: f64) -> f64 {
    match model {
        ModelKind::Power => betas[0] + betas[1] * signed_pow_slope(x, shape),
        ModelKind::Rational => betas[0] * saturating_slope(x, shape) + betas[1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predict_matches_design_row() {
        let betas = [8.0, 30.0];
        let mut row = [0.0; 2];
        for kind in ModelKind::ALL {
            let shape = match kind {
                ModelKind::Power => 2.5,
                ModelKind::Rational => 1.4,
            };
            for &x in &[0.0, 0.1, 0.45, 0.9] {
                fill_design_row(kind, x, shape, &mut row);
                let from_row = betas[0] * row[0] + betas[1] * row[1];
                assert!((from_row - predict(kind, x, &betas, shape)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn rational_form_saturates() {
        // Response x(D) approaches c: doses grow without bound as x -> c.
        let betas = [5.0, 0.0];
        let near = predict(ModelKind::Rational, 0.999, &betas, 1.0);
        let far = predict(ModelKind::Rational, 0.5, &betas, 1.0);
        assert!(near > 100.0 * far);
        assert!(slope(ModelKind::Rational, 0.5, &betas, 1.0) > 0.0);
    }
}
