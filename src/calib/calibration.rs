//! Per-(lot, channel) calibration: points in, fitted curve out.
//!
//! Lifecycle:
//!
//! 1. build from matched dose / netOD sequences (`Calibration::new`)
//! 2. `fit()` selects and stores a curve; the calibration is frozen afterwards
//! 3. `dose()` looks up netOD values; `save()` / `load()` persist the fitted state

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;

use crate::calib::curve::CurveModel;
use crate::domain::{CalibrationPoint, Channel, FitConfig, FitQuality, FitResult, ModelKind, RangePolicy, ValueRange};
use crate::error::DoseError;
use crate::fit::fit_and_select;

#[derive(Debug, Clone, PartialEq)]
struct Fitted {
    curve: CurveModel,
    quality: FitQuality,
    /// Every form that was fitted, including the selected one.
    candidates: Vec<FitResult>,
    /// Forms not fitted and why; empty for loaded bundles.
    skipped: Vec<(ModelKind, String)>,
}

/// Measured points plus a (possibly not yet) fitted curve for one lot and channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    lot: String,
    channel: Channel,
    date: Option<NaiveDate>,
    points: Vec<CalibrationPoint>,
    range_policy: RangePolicy,
    fitted: Option<Fitted>,
}

/// Plotting tuples: measured points and the fitted curve sampled on its range.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveSamples {
    pub doses: Vec<f64>,
    pub netods: Vec<f64>,
    /// `(netOD, dose)` along the fitted curve.
    pub fitted: Vec<(f64, f64)>,
}

impl Calibration {
    /// Build from matched dose and netOD sequences (unit weights).
    pub fn new(lot: impl Into<String>, channel: Channel, doses: &[f64], netods: &[f64]) -> Result<Self, DoseError> {
        if doses.len() != netods.len() {
            return Err(DoseError::InsufficientData(format!(
                "{} doses but {} netOD values",
                doses.len(),
                netods.len()
            )));
        }
        let points = doses
            .iter()
            .zip(netods.iter())
            .map(|(&d, &x)| CalibrationPoint::new(d, x))
            .collect();
        Ok(Self::from_points(lot, channel, points))
    }

    pub fn from_points(lot: impl Into<String>, channel: Channel, points: Vec<CalibrationPoint>) -> Self {
        Self {
            lot: lot.into(),
            channel,
            date: None,
            points,
            range_policy: RangePolicy::STRICT,
            fitted: None,
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Set the lookup range policy. Lookup configuration only; not persisted.
    pub fn with_range_policy(mut self, policy: RangePolicy) -> Result<Self, DoseError> {
        if !(policy.margin.is_finite() && policy.margin >= 0.0) {
            return Err(DoseError::InvalidConfig(format!(
                "extrapolation margin must be finite and >= 0, got {}",
                policy.margin
            )));
        }
        self.range_policy = policy;
        Ok(self)
    }

    /// Fit the curve. Fails if already fitted.
    pub fn fit(&mut self, config: &FitConfig) -> Result<&FitQuality, DoseError> {
        if self.fitted.is_some() {
            return Err(DoseError::CalibrationFrozen {
                lot: self.lot.clone(),
                channel: self.channel,
            });
        }

        let selection = fit_and_select(&self.points, config)?;
        let netods: Vec<f64> = self.points.iter().map(|p| p.netod).collect();
        let netod_range = ValueRange::of(&netods)
            .ok_or_else(|| DoseError::InsufficientData("no finite netOD values".to_string()))?;

        let fitted = Fitted {
            curve: CurveModel::new(selection.best.model.clone(), netod_range),
            quality: selection.best.quality,
            candidates: selection.fits,
            skipped: selection.skipped,
        };
        Ok(&self.fitted.insert(fitted).quality)
    }

    /// Rebuild an already fitted calibration (used by bundle loading).
    pub(crate) fn from_fitted(
        lot: String,
        channel: Channel,
        date: Option<NaiveDate>,
        points: Vec<CalibrationPoint>,
        curve: CurveModel,
        quality: FitQuality,
    ) -> Self {
        let candidates = vec![FitResult {
            model: curve.params.clone(),
            quality,
        }];
        Self {
            lot,
            channel,
            date,
            points,
            range_policy: RangePolicy::STRICT,
            fitted: Some(Fitted {
                curve,
                quality,
                candidates,
                skipped: Vec::new(),
            }),
        }
    }

    pub fn lot(&self) -> &str {
        &self.lot
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn range_policy(&self) -> RangePolicy {
        self.range_policy
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn fitted(&self) -> Result<&Fitted, DoseError> {
        self.fitted.as_ref().ok_or_else(|| DoseError::CalibrationNotFitted {
            lot: self.lot.clone(),
            channel: self.channel,
        })
    }

    pub fn curve(&self) -> Result<&CurveModel, DoseError> {
        Ok(&self.fitted()?.curve)
    }

    pub fn quality(&self) -> Result<&FitQuality, DoseError> {
        Ok(&self.fitted()?.quality)
    }

    /// All fitted forms, selected one included.
    pub fn candidates(&self) -> Result<&[FitResult], DoseError> {
        Ok(&self.fitted()?.candidates)
    }

    /// Forms that were not fitted, with the reason.
    pub fn skipped(&self) -> Result<&[(ModelKind, String)], DoseError> {
        Ok(&self.fitted()?.skipped)
    }

    /// Dose (Gy) for a netOD value.
    pub fn dose(&self, netod: f64) -> Result<f64, DoseError> {
        self.curve()?
            .inverse(netod, self.range_policy)
            .map_err(|e| e.with_context(&self.lot, self.channel))
    }

    /// Dose for every value in `netods`; fails on the first bad value.
    pub fn doses(&self, netods: &[f64]) -> Result<Vec<f64>, DoseError> {
        netods.iter().map(|&x| self.dose(x)).collect()
    }

    /// Dose and its standard error, `σ_D = |dD/dx|·σ_netOD`.
    pub fn dose_with_uncertainty(&self, netod: f64, netod_sigma: f64) -> Result<(f64, f64), DoseError> {
        let dose = self.dose(netod)?;
        let curve = self.curve()?;
        let x = netod.clamp(curve.netod_range.min, curve.netod_range.max);
        let sigma = curve.slope(x).abs() * netod_sigma.abs();
        Ok((dose, sigma))
    }

    /// NetOD expected for a delivered dose.
    pub fn netod_for_dose(&self, dose: f64) -> Result<f64, DoseError> {
        self.curve()?
            .forward(dose)
            .map_err(|e| e.with_context(&self.lot, self.channel))
    }

    /// Data for plotting consumers.
    pub fn curve_samples(&self, n: usize) -> Result<CurveSamples, DoseError> {
        let curve = self.curve()?;
        Ok(CurveSamples {
            doses: self.points.iter().map(|p| p.dose).collect(),
            netods: self.points.iter().map(|p| p.netod).collect(),
            fitted: curve.samples(n),
        })
    }

    /// Human-readable fitted equation.
    pub fn formula(&self) -> Result<String, DoseError> {
        let params = &self.curve()?.params;
        Ok(params.kind.formula(&params.betas, params.shape))
    }

    /// Write the fitted calibration as a versioned bundle.
    pub fn save(&self, path: &Path) -> Result<(), DoseError> {
        crate::io::bundle::write_bundle(path, self)
    }

    /// Load a calibration bundle written by `save`.
    pub fn load(path: &Path) -> Result<Self, DoseError> {
        crate::io::bundle::read_bundle(path)
    }
}

/// Fitted calibrations keyed by (lot, channel).
#[derive(Debug, Clone, Default)]
pub struct CalibrationSet {
    entries: BTreeMap<(String, Channel), Calibration>,
}

impl CalibrationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a calibration, replacing any previous one for the same key.
    pub fn insert(&mut self, calibration: Calibration) -> Option<Calibration> {
        let key = (calibration.lot.clone(), calibration.channel);
        self.entries.insert(key, calibration)
    }

    /// Fitted calibration for `(lot, channel)`.
    pub fn get(&self, lot: &str, channel: Channel) -> Result<&Calibration, DoseError> {
        let calibration = self
            .entries
            .get(&(lot.to_string(), channel))
            .ok_or_else(|| DoseError::ChannelMismatch {
                lot: lot.to_string(),
                channel,
            })?;
        if !calibration.is_fitted() {
            return Err(DoseError::CalibrationNotFitted {
                lot: lot.to_string(),
                channel,
            });
        }
        Ok(calibration)
    }

    /// Channels with a calibration for `lot`.
    pub fn channels(&self, lot: &str) -> Vec<Channel> {
        self.entries
            .keys()
            .filter(|(l, _)| l == lot)
            .map(|(_, c)| *c)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<Calibration> for CalibrationSet {
    fn from_iter<I: IntoIterator<Item = Calibration>>(iter: I) -> Self {
        let mut set = CalibrationSet::new();
        for c in iter {
            set.insert(c);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RangeMode;

    const DOSES: [f64; 6] = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
    const NETODS: [f64; 6] = [0.0, 0.2, 0.4, 0.6, 0.8, 1.0];

    fn fitted() -> Calibration {
        let mut c = Calibration::new("12345678", Channel::Red, &DOSES, &NETODS).unwrap();
        c.fit(&FitConfig::default()).unwrap();
        c
    }

    #[test]
    fn fit_then_dose_interpolates() {
        let c = fitted();
        let d = c.dose(0.5).unwrap();
        assert!(d > 2.0 && d < 3.0, "dose(0.5) = {d}");
    }

    #[test]
    fn dose_before_fit_fails() {
        let c = Calibration::new("12345678", Channel::Red, &DOSES, &NETODS).unwrap();
        assert!(matches!(c.dose(0.5), Err(DoseError::CalibrationNotFitted { .. })));
    }

    #[test]
    fn refit_is_rejected() {
        let mut c = fitted();
        assert!(matches!(
            c.fit(&FitConfig::default()),
            Err(DoseError::CalibrationFrozen { .. })
        ));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = Calibration::new("1", Channel::Red, &[0.0, 1.0], &[0.0]).unwrap_err();
        assert!(matches!(err, DoseError::InsufficientData(_)));
    }

    #[test]
    fn dose_is_idempotent_and_monotonic() {
        let c = fitted();
        assert_eq!(c.dose(0.37).unwrap(), c.dose(0.37).unwrap());

        let mut prev = f64::NEG_INFINITY;
        for i in 0..=100 {
            let d = c.dose(i as f64 / 100.0).unwrap();
            assert!(d >= prev - 1e-12);
            prev = d;
        }
    }

    #[test]
    fn boundary_lookup_and_epsilon_beyond() {
        let c = fitted();
        let lo = c.dose(0.0).unwrap();
        let hi = c.dose(1.0).unwrap();
        assert!(lo.abs() < 1e-9);
        assert!((hi - 5.0).abs() < 1e-9);
        assert!(matches!(c.dose(1.0 + 1e-9), Err(DoseError::OutOfRange { .. })));
        assert!(matches!(c.dose(-1e-9), Err(DoseError::OutOfRange { .. })));
    }

    #[test]
    fn negative_margin_is_invalid() {
        let c = fitted();
        let err = c
            .with_range_policy(RangePolicy {
                margin: -0.1,
                mode: RangeMode::Clamp,
            })
            .unwrap_err();
        assert!(matches!(err, DoseError::InvalidConfig(_)));
    }

    #[test]
    fn uncertainty_scales_with_slope() {
        let c = fitted();
        let (d, s) = c.dose_with_uncertainty(0.5, 0.01).unwrap();
        assert!(d > 2.0 && d < 3.0);
        // Linear data: slope is 5 Gy per unit netOD.
        assert!((s - 0.05).abs() < 1e-6, "sigma = {s}");
    }

    #[test]
    fn netod_for_dose_round_trips() {
        let c = fitted();
        let x = c.netod_for_dose(3.3).unwrap();
        assert!((c.dose(x).unwrap() - 3.3).abs() < 1e-9);
    }

    #[test]
    fn set_reports_missing_channel() {
        let set: CalibrationSet = [fitted()].into_iter().collect();
        assert!(set.get("12345678", Channel::Red).is_ok());
        assert!(matches!(
            set.get("12345678", Channel::Blue),
            Err(DoseError::ChannelMismatch { .. })
        ));
        assert!(matches!(
            set.get("other", Channel::Red),
            Err(DoseError::ChannelMismatch { .. })
        ));
    }

    #[test]
    fn calibrations_are_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Calibration>();
        assert_send_sync::<CalibrationSet>();
    }
}
