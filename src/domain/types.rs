//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting and dose lookup
//! - written into calibration bundles
//! - reported by the CLI

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Scanner colour channel.
///
/// Every calibration and every dose computation is performed for one channel;
/// channels are never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Red, Channel::Green, Channel::Blue];

    pub fn display_name(self) -> &'static str {
        match self {
            Channel::Red => "RED",
            Channel::Green => "GREEN",
            Channel::Blue => "BLUE",
        }
    }

    /// Column name used by the CSV scan format.
    pub fn column_name(self) -> &'static str {
        match self {
            Channel::Red => "red",
            Channel::Green => "green",
            Channel::Blue => "blue",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Which functional form(s) to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelSpec {
    /// Fit every form and pick by BIC.
    Auto,
    Power,
    Rational,
    /// Same as `Auto`; kept so diagnostics can ask for every fit explicitly.
    All,
}

/// Concrete fitted functional form, netOD `x` → dose `D`.
///
/// Both forms pass through the origin and are linear in `(a, b)` once the
/// shape parameter is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// `D = a·x + b·x^n`
    Power,
    /// `D = a·x/(c − x) + b·x`, response saturates at `x = c`.
    Rational,
}

impl ModelKind {
    /// Order used for tie-breaking during selection (simplest first).
    pub const ALL: [ModelKind; 2] = [ModelKind::Power, ModelKind::Rational];

    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Power => "power",
            ModelKind::Rational => "rational",
        }
    }

    /// Number of linear coefficients.
    pub fn beta_len(self) -> usize {
        2
    }

    /// Total free parameters (linear coefficients + shape parameter).
    pub fn param_count(self) -> usize {
        self.beta_len() + 1
    }

    /// Minimum number of distinct doses needed to fit this form.
    pub fn min_distinct_doses(self) -> usize {
        self.param_count() + 1
    }

    /// Render the fitted equation.
    pub fn formula(self, betas: &[f64], shape: f64) -> String {
        let a = betas.first().copied().unwrap_or(f64::NAN);
        let b = betas.get(1).copied().unwrap_or(f64::NAN);
        match self {
            ModelKind::Power => format!("D = {a:.4}*netOD + {b:.4}*netOD^{shape:.4}"),
            ModelKind::Rational => {
                format!("D = {a:.4}*netOD/({shape:.4} - netOD) + {b:.4}*netOD")
            }
        }
    }
}

/// Outlier-robust fitting mode.
///
/// When enabled, the fitter iteratively reweights calibration points based on
/// residuals (Huber IRLS), so a single badly scanned strip cannot bend the curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RobustKind {
    /// Ordinary weighted least squares.
    None,
    /// Huber M-estimator via iterative reweighted least squares.
    Huber,
}

/// What a lookup does inside the extrapolation margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RangeMode {
    /// Evaluate the fitted curve beyond the calibrated boundary.
    Extrapolate,
    /// Return the value at the calibrated boundary.
    Clamp,
}

/// Range handling for curve lookups.
///
/// The calibrated boundaries themselves are always accepted. With `margin = 0`
/// anything beyond them fails with `OutOfRange`; with a positive margin the
/// lookup succeeds up to `margin` beyond a boundary according to `mode`, and a
/// warning is logged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangePolicy {
    pub margin: f64,
    pub mode: RangeMode,
}

impl RangePolicy {
    pub const STRICT: RangePolicy = RangePolicy {
        margin: 0.0,
        mode: RangeMode::Clamp,
    };
}

impl Default for RangePolicy {
    fn default() -> Self {
        Self::STRICT
    }
}

/// Closed interval of observed values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    /// Range of the finite values in `values`.
    pub fn of(values: &[f64]) -> Option<Self> {
        let mut it = values.iter().copied().filter(|v| v.is_finite());
        let first = it.next()?;
        let (min, max) = it.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
        Some(Self { min, max })
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

/// One known-dose measurement used for fitting.
///
/// Points are always held by a `Calibration`, which supplies their lot
/// identifier and channel; a point never moves between calibrations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    /// Delivered dose (Gy).
    pub dose: f64,
    pub netod: f64,
    /// Observation weight (higher means more influence).
    pub weight: f64,
}

impl CalibrationPoint {
    pub fn new(dose: f64, netod: f64) -> Self {
        Self {
            dose,
            netod,
            weight: 1.0,
        }
    }

    /// Weight a point by the inverse variance of its netOD.
    pub fn with_netod_sigma(dose: f64, netod: f64, sigma: f64) -> Self {
        let weight = if sigma.is_finite() && sigma > 0.0 {
            1.0 / (sigma * sigma)
        } else {
            1.0
        };
        Self { dose, netod, weight }
    }
}

/// Fit quality diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    pub sse: f64,
    pub rmse: f64,
    pub bic: f64,
    pub n: usize,
    pub n_distinct_doses: usize,
}

/// Fitted parameters of one functional form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveParams {
    pub kind: ModelKind,
    pub display_name: String,
    /// Linear coefficients `[a, b]`.
    pub betas: Vec<f64>,
    /// Exponent `n` (power) or asymptote `c` (rational).
    pub shape: f64,
}

/// Fit output for a single functional form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub model: CurveParams,
    pub quality: FitQuality,
}

/// Curve-fitting configuration.
///
/// Built explicitly by callers (the CLI derives it from flags); nothing is
/// read from process-wide state.
#[derive(Debug, Clone, PartialEq)]
pub struct FitConfig {
    pub model_spec: ModelSpec,

    /// Largest exponent `n` tried for the power form (grid starts just above 1).
    pub power_n_max: f64,
    pub power_steps: usize,

    /// Rational asymptote grid, as multiples of the largest observed netOD.
    pub rational_ratio_min: f64,
    pub rational_ratio_max: f64,
    pub rational_steps: usize,

    /// Robust fitting mode.
    pub robust: RobustKind,
    /// Number of IRLS reweight iterations (0 disables reweighting even if robust!=none).
    pub robust_iters: usize,
    /// Huber tuning constant (larger = less downweighting).
    pub robust_k: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            model_spec: ModelSpec::Auto,
            power_n_max: 6.0,
            power_steps: 60,
            rational_ratio_min: 1.02,
            rational_ratio_max: 20.0,
            rational_steps: 60,
            robust: RobustKind::None,
            robust_iters: 3,
            robust_k: 1.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_range_ignores_non_finite() {
        let r = ValueRange::of(&[0.4, f64::NAN, -0.1, 1.2, f64::INFINITY]).unwrap();
        assert_eq!(r.min, -0.1);
        assert_eq!(r.max, 1.2);
        assert!(r.contains(1.2));
        assert!(!r.contains(1.2000001));
        assert!(ValueRange::of(&[f64::NAN]).is_none());
    }

    #[test]
    fn netod_sigma_becomes_inverse_variance_weight() {
        let p = CalibrationPoint::with_netod_sigma(2.0, 0.3, 0.01);
        assert!((p.weight - 10_000.0).abs() < 1e-6);
        let p = CalibrationPoint::with_netod_sigma(2.0, 0.3, 0.0);
        assert_eq!(p.weight, 1.0);
    }

    #[test]
    fn channel_serializes_uppercase() {
        let s = serde_json::to_string(&Channel::Green).unwrap();
        assert_eq!(s, "\"GREEN\"");
        assert_eq!(Channel::Blue.to_string(), "BLUE");
    }
}
