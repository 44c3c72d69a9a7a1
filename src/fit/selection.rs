//! Functional-form selection (power vs rational) using BIC with guardrails.
//!
//! The tool fits each enabled form and computes:
//! - SSE / RMSE
//! - BIC = n * ln(SSE/n) + k * ln(n)
//!
//! Selection rules:
//! 1. Reject underdetermined inputs: at least `k + 1` points and `k + 1`
//!    distinct doses, where `k` counts every free parameter
//! 2. Choose the form with minimum BIC
//! 3. If ΔBIC < 2 between the best and an earlier (simpler) form, pick the earlier one

use log::debug;

use crate::domain::{CalibrationPoint, CurveParams, FitConfig, FitQuality, FitResult, ModelKind, ModelSpec, ValueRange};
use crate::error::DoseError;
use crate::fit::fitter::{fit_model, FitOptions, ModelFit};
use crate::fit::shape_grid::{power_exponent_grid, rational_asymptote_grid};
use crate::models::predict;

/// Output of fitting + selection.
#[derive(Debug, Clone)]
pub struct FitSelection {
    pub best: FitResult,
    /// Fits for all attempted forms (after guardrails).
    pub fits: Vec<FitResult>,
    /// Any forms that were skipped and why (for diagnostics).
    pub skipped: Vec<(ModelKind, String)>,
}

/// Fit every requested form and select the best one.
pub fn fit_and_select(points: &[CalibrationPoint], config: &FitConfig) -> Result<FitSelection, DoseError> {
    let model_kinds: Vec<ModelKind> = match config.model_spec {
        ModelSpec::Power => vec![ModelKind::Power],
        ModelSpec::Rational => vec![ModelKind::Rational],
        ModelSpec::All | ModelSpec::Auto => ModelKind::ALL.to_vec(),
    };
    let single = model_kinds.len() == 1;

    validate_points(points, &model_kinds)?;

    let n = points.len();
    let netods: Vec<f64> = points.iter().map(|p| p.netod).collect();
    let Some(range) = ValueRange::of(&netods) else {
        return Err(DoseError::InsufficientData("no finite netOD values".to_string()));
    };
    let distinct = distinct_doses(points);

    let opts = FitOptions {
        robust: config.robust,
        robust_iters: config.robust_iters,
        robust_k: config.robust_k,
    };

    let mut fits = Vec::new();
    let mut skipped = Vec::new();

    for kind in model_kinds {
        let k = kind.param_count();
        let need = kind.min_distinct_doses();
        if distinct < need {
            skipped.push((
                kind,
                format!("underdetermined: {distinct} distinct doses < k+1={need}"),
            ));
            continue;
        }

        let grid = match kind {
            ModelKind::Power => power_exponent_grid(config.power_n_max, config.power_steps),
            ModelKind::Rational => rational_asymptote_grid(
                range.max,
                config.rational_ratio_min,
                config.rational_ratio_max,
                config.rational_steps,
            ),
        };
        let grid = match grid {
            Ok(g) => g,
            Err(e @ DoseError::InvalidConfig(_)) => return Err(e),
            Err(e) if single => return Err(e),
            Err(e) => {
                skipped.push((kind, e.to_string()));
                continue;
            }
        };

        match fit_model(kind, points, &grid, &opts) {
            Ok(fit) => {
                debug!("{} fit: sse={:.6e} shape={:.6}", kind.display_name(), fit.sse, fit.shape);
                fits.push(to_fit_result(fit, n, k, distinct));
            }
            Err(e) if single => return Err(e),
            Err(e) => skipped.push((kind, e.to_string())),
        }
    }

    if fits.is_empty() {
        let reasons: Vec<String> = skipped
            .iter()
            .map(|(kind, reason)| format!("{}: {reason}", kind.display_name()))
            .collect();
        return Err(DoseError::FitConvergence(format!(
            "no functional form could be fitted ({})",
            reasons.join("; ")
        )));
    }

    // If the caller requested a single form, it's already the best.
    let best = if single { fits[0].clone() } else { select_by_bic(&fits) };

    Ok(FitSelection { best, fits, skipped })
}

fn validate_points(points: &[CalibrationPoint], kinds: &[ModelKind]) -> Result<(), DoseError> {
    let need = kinds.iter().map(|k| k.min_distinct_doses()).min().unwrap_or(0);
    if points.len() < need {
        return Err(DoseError::InsufficientData(format!(
            "{} calibration points supplied, at least {need} required",
            points.len()
        )));
    }
    for (i, p) in points.iter().enumerate() {
        if !(p.dose.is_finite() && p.netod.is_finite()) {
            return Err(DoseError::InsufficientData(format!(
                "calibration point {i} is not finite (dose={}, netOD={})",
                p.dose, p.netod
            )));
        }
        if !(p.weight.is_finite() && p.weight > 0.0) {
            return Err(DoseError::InsufficientData(format!(
                "calibration point {i} has invalid weight {}",
                p.weight
            )));
        }
    }

    let distinct = distinct_doses(points);
    if distinct < need {
        return Err(DoseError::FitConvergence(format!(
            "only {distinct} distinct doses supplied, at least {need} required"
        )));
    }
    Ok(())
}

/// Number of distinct dose levels (relative tolerance 1e-12).
pub fn distinct_doses(points: &[CalibrationPoint]) -> usize {
    let mut doses: Vec<f64> = points.iter().map(|p| p.dose).filter(|d| d.is_finite()).collect();
    doses.sort_by(|a, b| a.total_cmp(b));
    doses.dedup_by(|a, b| (*a - *b).abs() <= 1e-12 * b.abs().max(1.0));
    doses.len()
}

fn to_fit_result(fit: ModelFit, n: usize, k: usize, n_distinct_doses: usize) -> FitResult {
    let bic = bic(n, fit.sse, k);

    FitResult {
        model: CurveParams {
            kind: fit.model,
            display_name: fit.model.display_name().to_string(),
            betas: fit.betas,
            shape: fit.shape,
        },
        quality: FitQuality {
            sse: fit.sse,
            rmse: fit.rmse,
            bic,
            n,
            n_distinct_doses,
        },
    }
}

fn bic(n: usize, sse: f64, k: usize) -> f64 {
    let n_f = n as f64;
    let sse_per = (sse / n_f).max(1e-12);
    n_f * sse_per.ln() + (k as f64) * n_f.ln()
}

fn select_by_bic(fits: &[FitResult]) -> FitResult {
    // Find minimum BIC.
    let mut best = &fits[0];
    for f in &fits[1..] {
        if f.quality.bic < best.quality.bic {
            best = f;
        }
    }

    let best_bic = best.quality.bic;

    // Prefer the earlier form if within 2 BIC points.
    for kind in ModelKind::ALL {
        if let Some(f) = fits.iter().find(|f| f.model.kind == kind) {
            if f.quality.bic <= best_bic + 2.0 {
                return f.clone();
            }
        }
    }

    best.clone()
}

/// Fitted doses on a netOD grid.
pub fn fitted_grid(fit: &CurveParams, netods: &[f64]) -> Vec<f64> {
    netods
        .iter()
        .map(|&x| predict(fit.kind, x, &fit.betas, fit.shape))
        .collect()
}
