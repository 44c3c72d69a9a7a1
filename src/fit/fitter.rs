//! Low-level fitting routines for a single functional form.
//!
//! Given:
//! - netOD values `x_i`
//! - delivered doses `D_i`
//! - weights `w_i`
//! - a list of candidate shape parameters (exponent or asymptote)
//!
//! we solve, for each candidate:
//! - a weighted OLS problem to find the best `(a, b)` coefficients
//! - the resulting SSE
//!
//! and return the best (lowest SSE) candidate whose curve is monotonic over the
//! observed netOD range.

use log::debug;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::domain::{CalibrationPoint, ModelKind, RobustKind, ValueRange};
use crate::error::DoseError;
use crate::math::solve_least_squares;
use crate::models::{fill_design_row, predict, slope};

/// Fitting options that affect how each form is calibrated.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Robust fitting mode (outlier downweighting).
    pub robust: RobustKind,
    /// Number of IRLS reweight iterations.
    pub robust_iters: usize,
    /// Huber tuning constant.
    pub robust_k: f64,
}

/// Best fit for a single functional form.
#[derive(Debug, Clone)]
pub struct ModelFit {
    pub model: ModelKind,
    pub betas: Vec<f64>,
    pub shape: f64,
    pub sse: f64,
    pub rmse: f64,
}

#[derive(Debug, Clone)]
struct Candidate {
    idx: usize,
    shape: f64,
    betas: Vec<f64>,
    sse: f64,
}

/// Fit a single functional form over a shape grid.
pub fn fit_model(
    model: ModelKind,
    points: &[CalibrationPoint],
    shape_grid: &[f64],
    opts: &FitOptions,
) -> Result<ModelFit, DoseError> {
    if points.is_empty() {
        return Err(DoseError::InsufficientData("no calibration points to fit".to_string()));
    }
    if shape_grid.is_empty() {
        return Err(DoseError::InvalidConfig(format!(
            "shape grid for the {} form is empty",
            model.display_name()
        )));
    }

    // Extract raw arrays once. We keep these immutable and derive the working
    // weight vector from them (for robust reweighting).
    let netods: Vec<f64> = points.iter().map(|p| p.netod).collect();
    let doses: Vec<f64> = points.iter().map(|p| p.dose).collect();
    let w_base: Vec<f64> = points.iter().map(|p| p.weight).collect();
    let Some(range) = ValueRange::of(&netods) else {
        return Err(DoseError::InsufficientData("no finite netOD values".to_string()));
    };

    let n = netods.len();
    let mut w_work = w_base.clone();
    let mut best: Option<Candidate> = None;

    // Robust fitting is a small, fixed number of outer iterations:
    //
    // - start with base weights
    // - fit by shape grid search + weighted OLS
    // - compute residuals
    // - update weights (Huber) and repeat
    let n_refits = match opts.robust {
        RobustKind::None => 1,
        RobustKind::Huber => opts.robust_iters.saturating_add(1).max(1),
    };

    for pass in 0..n_refits {
        let candidate = fit_once(model, shape_grid, &netods, &doses, &w_work, range)?;
        debug!(
            "{} pass {pass}: shape={:.6} betas={:?} sse={:.6e}",
            model.display_name(),
            candidate.shape,
            candidate.betas,
            candidate.sse
        );
        best = Some(candidate.clone());

        if opts.robust == RobustKind::None {
            break;
        }

        let residuals = compute_residuals(model, &netods, &doses, &candidate.betas, candidate.shape);
        w_work = huber_reweight(&w_base, &residuals, opts.robust_k);
    }

    let Some(best) = best else {
        return Err(DoseError::FitConvergence(format!(
            "no valid fit candidates for the {} form",
            model.display_name()
        )));
    };

    let rmse = (best.sse / n as f64).sqrt();
    Ok(ModelFit {
        model,
        betas: best.betas,
        shape: best.shape,
        sse: best.sse,
        rmse,
    })
}

fn fit_once(
    model: ModelKind,
    shape_grid: &[f64],
    netods: &[f64],
    doses: &[f64],
    w: &[f64],
    range: ValueRange,
) -> Result<Candidate, DoseError> {
    // Evaluate each shape candidate independently (parallel).
    let candidates: Vec<Candidate> = shape_grid
        .par_iter()
        .enumerate()
        .filter_map(|(idx, &shape)| {
            evaluate_candidate(model, shape, netods, doses, w, range).map(|(betas, sse)| Candidate {
                idx,
                shape,
                betas,
                sse,
            })
        })
        .collect();

    if candidates.is_empty() {
        return Err(DoseError::FitConvergence(format!(
            "no monotonic {} curve fits the calibration points",
            model.display_name()
        )));
    }

    // Deterministic selection: pick the minimum SSE; break ties by original grid index.
    let mut best = &candidates[0];
    for c in &candidates[1..] {
        if c.sse < best.sse || (c.sse == best.sse && c.idx < best.idx) {
            best = c;
        }
    }

    Ok(best.clone())
}

fn evaluate_candidate(
    model: ModelKind,
    shape: f64,
    netods: &[f64],
    doses: &[f64],
    w: &[f64],
    range: ValueRange,
) -> Option<(Vec<f64>, f64)> {
    if !shape.is_finite() {
        return None;
    }
    if netods.iter().chain(doses.iter()).any(|v| !v.is_finite()) {
        return None;
    }
    if w.iter().any(|v| !v.is_finite() || *v <= 0.0) {
        return None;
    }

    let n = netods.len();
    let p = model.beta_len();

    // Build weighted design matrix X_w and weighted observation vector D_w.
    let mut xw = DMatrix::<f64>::zeros(n, p);
    let mut yw = DVector::<f64>::zeros(n);
    let mut row = vec![0.0; p];

    for i in 0..n {
        fill_design_row(model, netods[i], shape, &mut row);
        if row.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let sw = w[i].sqrt();
        for j in 0..p {
            xw[(i, j)] = row[j] * sw;
        }
        yw[i] = doses[i] * sw;
    }

    let beta = solve_least_squares(&xw, &yw)?;
    let betas: Vec<f64> = beta.iter().copied().collect();

    if violates_monotone(model, &betas, shape, range) {
        return None;
    }

    // Weighted SSE using the unweighted model prediction.
    let mut sse = 0.0;
    for i in 0..n {
        let d_fit = predict(model, netods[i], &betas, shape);
        let r = doses[i] - d_fit;
        sse += w[i] * r * r;
    }

    if sse.is_finite() {
        Some((betas, sse))
    } else {
        None
    }
}

/// True when the dose curve decreases (or is non-finite) anywhere on `range`.
///
/// Both slopes are monotone on the range: the power slope `a + b·n·|x|^(n-1)`
/// in `|x|`, the rational slope `a·c/(c-x)² + b` in `x`. Their extremes sit at
/// the range ends or, for power, at zero, so checking those points is exact.
fn violates_monotone(model: ModelKind, betas: &[f64], shape: f64, range: ValueRange) -> bool {
    // Tolerance: allow tiny numerical noise without rejecting.
    let eps = 1e-9_f64;

    let mut at = vec![range.min, range.max];
    if model == ModelKind::Power && range.min < 0.0 && range.max > 0.0 {
        at.push(0.0);
    }

    at.into_iter().any(|x| {
        let d = predict(model, x, betas, shape);
        let s = slope(model, x, betas, shape);
        !d.is_finite() || !s.is_finite() || s < -eps
    })
}

fn compute_residuals(model: ModelKind, netods: &[f64], doses: &[f64], betas: &[f64], shape: f64) -> Vec<f64> {
    netods
        .iter()
        .zip(doses.iter())
        .map(|(&x, &d)| d - predict(model, x, betas, shape))
        .collect()
}

fn huber_reweight(w_base: &[f64], residuals: &[f64], k: f64) -> Vec<f64> {
    // Scale via MAD (median absolute deviation). This keeps weighting robust and
    // deterministic (no RNG).
    let mut abs: Vec<f64> = residuals.iter().map(|r| r.abs()).filter(|v| v.is_finite()).collect();
    let mad = median_mut(&mut abs).unwrap_or(0.0);
    let scale = (mad / 0.6745).max(1e-12);
    let cutoff = (k.max(1e-6)) * scale;

    let min_factor = 1e-3;
    w_base
        .iter()
        .zip(residuals.iter())
        .map(|(&w0, &r)| {
            let ar = r.abs();
            let factor = if ar <= cutoff || !ar.is_finite() { 1.0 } else { cutoff / ar };
            (w0 * factor).max(w0 * min_factor)
        })
        .collect()
}

fn median_mut(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> FitOptions {
        FitOptions {
            robust: RobustKind::None,
            robust_iters: 0,
            robust_k: 1.5,
        }
    }

    fn synthetic(model: ModelKind, betas: &[f64], shape: f64, netods: &[f64]) -> Vec<CalibrationPoint> {
        netods
            .iter()
            .map(|&x| CalibrationPoint::new(predict(model, x, betas, shape), x))
            .collect()
    }

    #[test]
    fn fit_model_selects_correct_exponent_from_grid() {
        let true_betas = [6.0, 25.0];
        let netods: Vec<f64> = (0..12).map(|i| i as f64 * 0.06).collect();
        let points = synthetic(ModelKind::Power, &true_betas, 2.5, &netods);

        let grid = vec![1.5, 2.0, 2.5, 3.0];
        let fit = fit_model(ModelKind::Power, &points, &grid, &plain()).unwrap();

        assert!((fit.shape - 2.5).abs() < 1e-12);
        for (a, b) in fit.betas.iter().zip(true_betas.iter()) {
            assert!((a - b).abs() < 1e-8, "beta {a} vs {b}");
        }
        assert!(fit.sse < 1e-16);
    }

    #[test]
    fn fit_model_recovers_rational_asymptote() {
        let true_betas = [3.0, 2.0];
        let netods: Vec<f64> = (0..10).map(|i| 0.05 + i as f64 * 0.07).collect();
        let points = synthetic(ModelKind::Rational, &true_betas, 1.2, &netods);

        let grid = vec![0.9, 1.2, 1.8];
        let fit = fit_model(ModelKind::Rational, &points, &grid, &plain()).unwrap();
        assert!((fit.shape - 1.2).abs() < 1e-12);
        assert!((fit.betas[0] - 3.0).abs() < 1e-8);
        assert!((fit.betas[1] - 2.0).abs() < 1e-8);
    }

    #[test]
    fn decreasing_data_has_no_acceptable_candidate() {
        let points: Vec<CalibrationPoint> = [(0.0, 0.0), (4.0, 0.2), (3.0, 0.4), (1.0, 0.6), (0.5, 0.8)]
            .iter()
            .map(|&(d, x)| CalibrationPoint::new(d, x))
            .collect();
        let err = fit_model(ModelKind::Power, &points, &[2.0, 3.0], &plain()).unwrap_err();
        assert!(matches!(err, DoseError::FitConvergence(_)));
    }

    #[test]
    fn dip_at_low_netod_is_rejected() {
        // D = -0.05x + 30x² dips below zero just above x = 0, well inside one
        // grid spacing of any coarse sampling of the range.
        let netods: Vec<f64> = (0..=10).map(|i| i as f64 * 0.1).collect();
        let points = synthetic(ModelKind::Power, &[-0.05, 30.0], 2.0, &netods);
        let err = fit_model(ModelKind::Power, &points, &[2.0], &plain()).unwrap_err();
        assert!(matches!(err, DoseError::FitConvergence(_)));

        let shifted = synthetic(ModelKind::Power, &[0.05, 30.0], 2.0, &netods);
        assert!(fit_model(ModelKind::Power, &shifted, &[2.0], &plain()).is_ok());
    }

    #[test]
    fn slope_is_checked_at_zero_inside_a_signed_range() {
        // a < 0 with b > 0: the power slope is smallest at x = 0.
        let range = ValueRange { min: -0.2, max: 0.8 };
        assert!(violates_monotone(ModelKind::Power, &[-0.01, 30.0], 2.0, range));
        assert!(!violates_monotone(ModelKind::Power, &[0.01, 30.0], 2.0, range));
    }

    #[test]
    fn rational_slope_sign_is_checked_at_the_ends() {
        // a > 0, b < 0: the rational slope is smallest at range.min.
        let range = ValueRange { min: 0.0, max: 0.5 };
        assert!(violates_monotone(ModelKind::Rational, &[1.0, -2.0], 1.0, range));
        assert!(!violates_monotone(ModelKind::Rational, &[3.0, -2.0], 1.0, range));
    }

    #[test]
    fn huber_downweights_outlier() {
        let true_betas = [6.0, 25.0];
        let netods: Vec<f64> = (1..15).map(|i| i as f64 * 0.05).collect();
        let mut points = synthetic(ModelKind::Power, &true_betas, 2.0, &netods);
        points[6].dose += 4.0;

        let grid = vec![2.0];
        let ols = fit_model(ModelKind::Power, &points, &grid, &plain()).unwrap();
        let robust = fit_model(
            ModelKind::Power,
            &points,
            &grid,
            &FitOptions {
                robust: RobustKind::Huber,
                robust_iters: 5,
                robust_k: 1.5,
            },
        )
        .unwrap();

        let err_ols = (ols.betas[1] - 25.0).abs();
        let err_robust = (robust.betas[1] - 25.0).abs();
        assert!(err_robust < err_ols, "robust {err_robust} vs ols {err_ols}");
    }
}
