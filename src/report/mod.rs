//! Reporting utilities: calibration residuals and formatted terminal output.

pub mod format;

pub use format::*;

use crate::calib::Calibration;
use crate::domain::CalibrationPoint;
use crate::error::DoseError;

/// Fitted dose and residual for one calibration point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointResidual {
    pub point: CalibrationPoint,
    pub dose_fit: f64,
    /// Delivered minus fitted dose (Gy).
    pub residual: f64,
}

/// Fitted values and residuals for every calibration point.
pub fn compute_residuals(calibration: &Calibration) -> Result<Vec<PointResidual>, DoseError> {
    let curve = calibration.curve()?;
    let mut out = Vec::with_capacity(calibration.points().len());
    for p in calibration.points() {
        let dose_fit = curve.evaluate(p.netod);
        if !dose_fit.is_finite() {
            return Err(DoseError::FitConvergence(format!(
                "non-finite fitted dose at netOD {} (lot {}, channel {})",
                p.netod,
                calibration.lot(),
                calibration.channel()
            )));
        }
        out.push(PointResidual {
            point: *p,
            dose_fit,
            residual: p.dose - dose_fit,
        });
    }
    Ok(out)
}

/// The `n` points with the largest absolute residual, largest first.
pub fn worst_points(residuals: &[PointResidual], n: usize) -> Vec<PointResidual> {
    let mut sorted = residuals.to_vec();
    sorted.sort_by(|a, b| b.residual.abs().total_cmp(&a.residual.abs()));
    sorted.truncate(n);
    sorted
}
