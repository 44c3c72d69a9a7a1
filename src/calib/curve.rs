//! A fitted dose-response curve bound to its calibrated range.
//!
//! The fitted function maps netOD `x` to dose `D(x)`, so:
//!
//! - `inverse(netOD) → dose` is closed form (evaluate `D`)
//! - `forward(dose) → netOD` is solved numerically on the calibrated netOD range
//!
//! Lookups outside the calibrated range are rejected unless a `RangePolicy`
//! grants a margin.

use log::warn;

use crate::domain::{Channel, CurveParams, RangeMode, RangePolicy, ValueRange};
use crate::error::DoseError;
use crate::math::{solve_bracketed, RootFailure, RootOptions};
use crate::models::{predict, slope};

/// Curve failure without calibration context.
///
/// `Calibration` attaches its lot and channel via [`CurveError::with_context`].
#[derive(Debug, Clone, PartialEq)]
pub enum CurveError {
    OutOfRange {
        quantity: &'static str,
        value: f64,
        range: ValueRange,
        margin: f64,
    },
    Solver(String),
}

impl CurveError {
    pub fn with_context(self, lot: &str, channel: Channel) -> DoseError {
        match self {
            CurveError::OutOfRange {
                quantity,
                value,
                range,
                margin,
            } => DoseError::OutOfRange {
                quantity,
                value,
                min: range.min,
                max: range.max,
                margin,
                lot: lot.to_string(),
                channel,
            },
            CurveError::Solver(msg) => {
                DoseError::FitConvergence(format!("lot {lot} channel {channel}: {msg}"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurveModel {
    pub params: CurveParams,
    /// NetOD values observed during fitting.
    pub netod_range: ValueRange,
    /// Fitted doses at the ends of `netod_range`.
    pub dose_range: ValueRange,
}

impl CurveModel {
    pub fn new(params: CurveParams, netod_range: ValueRange) -> Self {
        let d0 = predict(params.kind, netod_range.min, &params.betas, params.shape);
        let d1 = predict(params.kind, netod_range.max, &params.betas, params.shape);
        Self {
            params,
            netod_range,
            dose_range: ValueRange {
                min: d0.min(d1),
                max: d0.max(d1),
            },
        }
    }

    /// Evaluate `D(x)` with no range checks.
    pub fn evaluate(&self, netod: f64) -> f64 {
        predict(self.params.kind, netod, &self.params.betas, self.params.shape)
    }

    /// Slope `dD/dx` at `netod`.
    pub fn slope(&self, netod: f64) -> f64 {
        slope(self.params.kind, netod, &self.params.betas, self.params.shape)
    }

    /// NetOD → dose.
    ///
    /// The calibrated boundaries are inclusive. Within `policy.margin` beyond a
    /// boundary the result is clamped or extrapolated per `policy.mode`.
    pub fn inverse(&self, netod: f64, policy: RangePolicy) -> Result<f64, CurveError> {
        let range = self.netod_range;
        let out_of_range = || CurveError::OutOfRange {
            quantity: "netOD",
            value: netod,
            range,
            margin: policy.margin,
        };

        if !netod.is_finite() {
            return Err(out_of_range());
        }
        if range.contains(netod) {
            return Ok(self.evaluate(netod));
        }
        if netod < range.min - policy.margin || netod > range.max + policy.margin {
            return Err(out_of_range());
        }

        let dose = match policy.mode {
            RangeMode::Clamp => {
                let bound = netod.clamp(range.min, range.max);
                warn!("netOD {netod} outside [{}, {}], clamped to {bound}", range.min, range.max);
                self.evaluate(bound)
            }
            RangeMode::Extrapolate => {
                warn!("netOD {netod} outside [{}, {}], extrapolating", range.min, range.max);
                self.evaluate(netod)
            }
        };
        if dose.is_finite() {
            Ok(dose)
        } else {
            Err(out_of_range())
        }
    }

    /// Dose → netOD, solved on the calibrated netOD range.
    pub fn forward(&self, dose: f64) -> Result<f64, CurveError> {
        if !(dose.is_finite() && self.dose_range.contains(dose)) {
            return Err(CurveError::OutOfRange {
                quantity: "dose",
                value: dose,
                range: self.dose_range,
                margin: 0.0,
            });
        }

        solve_bracketed(
            |x| self.evaluate(x),
            |x| self.slope(x),
            dose,
            self.netod_range.min,
            self.netod_range.max,
            RootOptions::default(),
        )
        .map_err(|e| match e {
            RootFailure::NotBracketed => {
                CurveError::Solver(format!("dose {dose} is not bracketed by the calibrated netOD range"))
            }
            RootFailure::NoConvergence { last } => CurveError::Solver(format!(
                "netOD search for dose {dose} stopped at {last} without converging"
            )),
        })
    }

    /// `n` evenly spaced `(netOD, dose)` samples across the calibrated range.
    pub fn samples(&self, n: usize) -> Vec<(f64, f64)> {
        let n = n.max(2);
        (0..n)
            .map(|i| {
                let u = i as f64 / (n as f64 - 1.0);
                let x = self.netod_range.min + u * self.netod_range.width();
                (x, self.evaluate(x))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModelKind;

    fn power_curve() -> CurveModel {
        CurveModel::new(
            CurveParams {
                kind: ModelKind::Power,
                display_name: "power".to_string(),
                betas: vec![8.0, 30.0],
                shape: 2.6,
            },
            ValueRange { min: 0.0, max: 0.6 },
        )
    }

    #[test]
    fn boundaries_are_inclusive_and_epsilon_beyond_fails() {
        let c = power_curve();
        assert_eq!(c.inverse(0.0, RangePolicy::STRICT).unwrap(), c.dose_range.min);
        assert_eq!(c.inverse(0.6, RangePolicy::STRICT).unwrap(), c.dose_range.max);
        assert!(matches!(
            c.inverse(0.6 + 1e-9, RangePolicy::STRICT),
            Err(CurveError::OutOfRange { .. })
        ));
        assert!(matches!(
            c.inverse(-1e-9, RangePolicy::STRICT),
            Err(CurveError::OutOfRange { .. })
        ));
    }

    #[test]
    fn margin_policies_clamp_or_extrapolate() {
        let c = power_curve();
        let clamp = RangePolicy {
            margin: 0.05,
            mode: RangeMode::Clamp,
        };
        let extrapolate = RangePolicy {
            margin: 0.05,
            mode: RangeMode::Extrapolate,
        };
        assert_eq!(c.inverse(0.62, clamp).unwrap(), c.dose_range.max);
        assert!(c.inverse(0.62, extrapolate).unwrap() > c.dose_range.max);
        assert!(c.inverse(0.66, clamp).is_err());
    }

    #[test]
    fn forward_inverts_inverse() {
        let c = power_curve();
        for &d in &[0.0, 0.5, 2.0, 5.0, c.dose_range.max] {
            let x = c.forward(d).unwrap();
            let back = c.inverse(x, RangePolicy::STRICT).unwrap();
            assert!((back - d).abs() < 1e-9, "dose {d} -> {x} -> {back}");
        }
        assert!(c.forward(c.dose_range.max + 0.1).is_err());
    }

    #[test]
    fn out_of_range_carries_context() {
        let err = power_curve()
            .inverse(2.0, RangePolicy::STRICT)
            .unwrap_err()
            .with_context("A1", Channel::Red);
        match err {
            DoseError::OutOfRange { value, lot, channel, .. } => {
                assert_eq!(value, 2.0);
                assert_eq!(lot, "A1");
                assert_eq!(channel, Channel::Red);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
