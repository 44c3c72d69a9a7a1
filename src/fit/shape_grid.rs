//! Shape-parameter grid generation.
//!
//! Both dose forms are fitted with a deterministic grid search over their one
//! nonlinear parameter (power exponent `n`, rational asymptote `c`).
//!
//! Why grid search?
//! - It avoids local minima issues common in nonlinear optimization.
//! - It is deterministic given the same inputs.
//! - With one nonlinear parameter a modest grid is cheap.

use crate::error::DoseError;

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, DoseError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(DoseError::InvalidConfig(format!(
            "invalid grid range: min={min}, max={max} (must be finite, >0, and max>min)"
        )));
    }
    if steps < 2 {
        return Err(DoseError::InvalidConfig("grid steps must be >= 2".to_string()));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    // Pin the endpoint so `max` is hit exactly.
    if let Some(last) = out.last_mut() {
        *last = max;
    }
    Ok(out)
}

/// Power exponents `n ∈ (1, n_max]`.
///
/// `n = 1` is excluded: the power column would duplicate the linear column.
pub fn power_exponent_grid(n_max: f64, steps: usize) -> Result<Vec<f64>, DoseError> {
    let values = log_space(1.0, n_max, steps + 1)?;
    Ok(values.into_iter().skip(1).collect())
}

/// Rational asymptotes `c ∈ [x_max·ratio_min, x_max·ratio_max]`.
///
/// Every candidate lies strictly above the largest observed netOD so the
/// basis never reaches its pole on the data.
pub fn rational_asymptote_grid(
    x_max: f64,
    ratio_min: f64,
    ratio_max: f64,
    steps: usize,
) -> Result<Vec<f64>, DoseError> {
    if !(x_max.is_finite() && x_max > 0.0) {
        return Err(DoseError::InsufficientData(format!(
            "rational form needs a positive maximum netOD, got {x_max}"
        )));
    }
    if !(ratio_min.is_finite() && ratio_min > 1.0) {
        return Err(DoseError::InvalidConfig(format!(
            "rational asymptote ratio must be > 1, got {ratio_min}"
        )));
    }
    log_space(x_max * ratio_min, x_max * ratio_max, steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_space_includes_endpoints() {
        let v = log_space(0.1, 10.0, 5).unwrap();
        assert!((v[0] - 0.1).abs() < 1e-12);
        assert_eq!(v[v.len() - 1], 10.0);
    }

    #[test]
    fn power_grid_excludes_linear_exponent() {
        let grid = power_exponent_grid(4.0, 10).unwrap();
        assert_eq!(grid.len(), 10);
        assert!(grid.iter().all(|&n| n > 1.0 && n <= 4.0));
        assert_eq!(*grid.last().unwrap(), 4.0);
    }

    #[test]
    fn rational_grid_stays_above_data() {
        let grid = rational_asymptote_grid(0.8, 1.05, 10.0, 12).unwrap();
        assert!(grid.iter().all(|&c| c > 0.8));
        assert!(rational_asymptote_grid(0.0, 1.05, 10.0, 12).is_err());
        assert!(rational_asymptote_grid(0.8, 1.0, 10.0, 12).is_err());
    }
}
