//! Dose reconstruction runs.
//!
//! A run walks `Idle → ScansLoaded → OdExtracted → DoseComputed`, one type per
//! stage. Each transition consumes the previous stage, so once ROIs and
//! channels are chosen they stay fixed for the rest of the run; a different
//! configuration means a new run.
//!
//! Channels are reconstructed independently against the calibration fitted
//! for the run's lot and that channel. They are never averaged.

use log::{debug, info};
use nalgebra::DMatrix;

use crate::calib::{Calibration, CalibrationSet};
use crate::domain::Channel;
use crate::error::DoseError;
use crate::film::{extract, extract_referenced, ExtractionMode, Roi, RoiNetOd, ScanSet};

/// Observable stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Idle,
    ScansLoaded,
    OdExtracted,
    DoseComputed,
}

/// Entry point of a run for one lot.
#[derive(Debug, Clone)]
pub struct DoseReconstructor<'c> {
    calibrations: &'c CalibrationSet,
    lot: String,
}

impl<'c> DoseReconstructor<'c> {
    pub fn new(calibrations: &'c CalibrationSet, lot: impl Into<String>) -> Self {
        Self {
            calibrations,
            lot: lot.into(),
        }
    }

    pub fn stage(&self) -> RunStage {
        RunStage::Idle
    }

    pub fn lot(&self) -> &str {
        &self.lot
    }

    pub fn load<'s>(self, scans: ScanSet<'s>) -> ScansLoaded<'c, 's> {
        debug!(
            "run lot {}: loaded {} scans {:?}",
            self.lot,
            scans.mode().display_name(),
            scans.shape()
        );
        ScansLoaded { run: self, scans }
    }

    /// Load, extract and compute in one call.
    pub fn run(self, scans: ScanSet<'_>, rois: &[Roi], channels: &[Channel]) -> Result<DoseComputed, DoseError> {
        self.load(scans).extract(rois, channels)?.compute()
    }
}

pub struct ScansLoaded<'c, 's> {
    run: DoseReconstructor<'c>,
    scans: ScanSet<'s>,
}

impl<'c, 's> ScansLoaded<'c, 's> {
    pub fn stage(&self) -> RunStage {
        RunStage::ScansLoaded
    }

    pub fn mode(&self) -> ExtractionMode {
        self.scans.mode()
    }

    /// Extract netOD for every (ROI, channel) pair.
    ///
    /// Every requested channel must have a fitted calibration for the lot;
    /// this is checked before any pixel is read.
    pub fn extract(self, rois: &[Roi], channels: &[Channel]) -> Result<OdExtracted<'c>, DoseError> {
        let targets: Vec<(Option<&Roi>, &Roi)> = rois.iter().map(|roi| (None, roi)).collect();
        self.extract_targets(&targets, channels)
    }

    /// Extract netOD for `(reference, roi)` pairs: each ROI on the post scan
    /// is compared with the mean of the pre scan over its reference ROI.
    ///
    /// Pairs are matched by position, so a strip may sit at different pixels
    /// in the two sessions. A single reference against a full-film ROI gives a
    /// whole-image dose map.
    pub fn extract_referenced(
        self,
        pairs: &[(Roi, Roi)],
        channels: &[Channel],
    ) -> Result<OdExtracted<'c>, DoseError> {
        let targets: Vec<(Option<&Roi>, &Roi)> = pairs
            .iter()
            .map(|(reference, roi)| (Some(reference), roi))
            .collect();
        self.extract_targets(&targets, channels)
    }

    fn extract_targets(
        self,
        targets: &[(Option<&Roi>, &Roi)],
        channels: &[Channel],
    ) -> Result<OdExtracted<'c>, DoseError> {
        if targets.is_empty() {
            return Err(DoseError::InsufficientData("no ROI requested".to_string()));
        }
        let mut selected: Vec<Channel> = Vec::with_capacity(channels.len());
        for &ch in channels {
            if !selected.contains(&ch) {
                selected.push(ch);
            }
        }
        if selected.is_empty() {
            return Err(DoseError::InsufficientData("no channel requested".to_string()));
        }
        for &ch in &selected {
            self.run.calibrations.get(&self.run.lot, ch)?;
        }

        let mut netod = Vec::with_capacity(targets.len() * selected.len());
        for &(reference, roi) in targets {
            for r in reference.into_iter().chain(Some(roi)) {
                if r.shape() != self.scans.shape() {
                    return Err(DoseError::InvalidScan(format!(
                        "ROI '{}' is {:?} but the film scans are {:?}",
                        r.name(),
                        r.shape(),
                        self.scans.shape()
                    )));
                }
            }
            for &ch in &selected {
                let od = match reference {
                    Some(reference) => extract_referenced(&self.scans, reference, roi, ch)?,
                    None => extract(&self.scans, roi, ch)?,
                };
                netod.push(od);
            }
        }

        Ok(OdExtracted {
            run: self.run,
            mode: self.scans.mode(),
            shape: self.scans.shape(),
            netod,
        })
    }
}

pub struct OdExtracted<'c> {
    run: DoseReconstructor<'c>,
    mode: ExtractionMode,
    shape: (usize, usize),
    netod: Vec<RoiNetOd>,
}

impl<'c> OdExtracted<'c> {
    pub fn stage(&self) -> RunStage {
        RunStage::OdExtracted
    }

    pub fn netod(&self) -> &[RoiNetOd] {
        &self.netod
    }

    /// Map every extracted netOD through its channel's calibration.
    pub fn compute(self) -> Result<DoseComputed, DoseError> {
        let mut results = Vec::with_capacity(self.netod.len());
        for od in self.netod {
            let calibration = self.run.calibrations.get(&self.run.lot, od.channel)?;
            results.push(reconstruct(calibration, od, self.shape)?);
        }
        info!(
            "Computed dose for lot {} ({} ROI/channel results, {} mode)",
            self.run.lot,
            results.len(),
            self.mode.display_name()
        );
        Ok(DoseComputed {
            lot: self.run.lot,
            mode: self.mode,
            results,
        })
    }
}

fn reconstruct(calibration: &Calibration, od: RoiNetOd, shape: (usize, usize)) -> Result<ChannelDose, DoseError> {
    let dose = calibration.doses(&od.netod)?;
    let (dose_of_netod_of_means, dose_of_netod_of_means_sigma) =
        calibration.dose_with_uncertainty(od.netod_of_means, od.netod_of_means_sigma)?;
    let dose_of_mean_netod = calibration.dose(od.mean_of_netod)?;
    let mean_dose = dose.iter().sum::<f64>() / dose.len() as f64;

    let summary = RoiDose {
        channel: od.channel,
        roi: od.roi.clone(),
        n: od.len(),
        netod_of_means: od.netod_of_means,
        netod_of_means_sigma: od.netod_of_means_sigma,
        mean_of_netod: od.mean_of_netod,
        dose_of_netod_of_means,
        dose_of_netod_of_means_sigma,
        dose_of_mean_netod,
        mean_dose,
    };
    let map = DoseMap {
        channel: od.channel,
        roi: od.roi.clone(),
        shape,
        pixels: od.pixels.clone(),
        dose,
    };
    Ok(ChannelDose { netod: od, map, summary })
}

/// Per-pixel dose over one ROI for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DoseMap {
    pub channel: Channel,
    pub roi: String,
    /// Shape of the full scan.
    pub shape: (usize, usize),
    pub pixels: Vec<(usize, usize)>,
    pub dose: Vec<f64>,
}

impl DoseMap {
    /// Dose at `(row, col)` if the pixel is inside the ROI.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.pixels
            .iter()
            .position(|&p| p == (row, col))
            .map(|i| self.dose[i])
    }

    /// Full-size matrix with `fill` outside the ROI.
    pub fn to_matrix(&self, fill: f64) -> DMatrix<f64> {
        let mut m = DMatrix::from_element(self.shape.0, self.shape.1, fill);
        for (&rc, &d) in self.pixels.iter().zip(&self.dose) {
            m[rc] = d;
        }
        m
    }

    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), f64)> + '_ {
        self.pixels.iter().copied().zip(self.dose.iter().copied())
    }
}

/// Scalar doses for one ROI and channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiDose {
    pub channel: Channel,
    pub roi: String,
    pub n: usize,
    pub netod_of_means: f64,
    pub netod_of_means_sigma: f64,
    pub mean_of_netod: f64,
    /// Dose of the netOD of ROI-mean intensities.
    pub dose_of_netod_of_means: f64,
    pub dose_of_netod_of_means_sigma: f64,
    /// Dose of the mean per-pixel netOD.
    pub dose_of_mean_netod: f64,
    /// Mean of the per-pixel dose map.
    pub mean_dose: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDose {
    pub netod: RoiNetOd,
    pub map: DoseMap,
    pub summary: RoiDose,
}

/// Final stage: results for a fixed (ROIs, channels, mode) configuration.
#[derive(Debug, Clone)]
pub struct DoseComputed {
    lot: String,
    mode: ExtractionMode,
    results: Vec<ChannelDose>,
}

impl DoseComputed {
    pub fn stage(&self) -> RunStage {
        RunStage::DoseComputed
    }

    pub fn lot(&self) -> &str {
        &self.lot
    }

    pub fn mode(&self) -> ExtractionMode {
        self.mode
    }

    /// Results in ROI order, then requested channel order.
    pub fn results(&self) -> &[ChannelDose] {
        &self.results
    }

    pub fn get(&self, roi: &str, channel: Channel) -> Option<&ChannelDose> {
        self.results
            .iter()
            .find(|r| r.summary.roi == roi && r.summary.channel == channel)
    }

    pub fn summaries(&self) -> impl Iterator<Item = &RoiDose> {
        self.results.iter().map(|r| &r.summary)
    }

    pub fn into_results(self) -> Vec<ChannelDose> {
        self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FitConfig;
    use crate::film::{Scan, ScanSetBuilder};

    fn calibrations(channels: &[Channel]) -> CalibrationSet {
        let doses = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let netods = [0.0, 0.2, 0.4, 0.6, 0.8, 1.0];
        channels
            .iter()
            .map(|&ch| {
                let mut c = Calibration::new("L1", ch, &doses, &netods).unwrap();
                c.fit(&FitConfig::default()).unwrap();
                c
            })
            .collect()
    }

    fn film(pre: f64, post: &[f64]) -> (Scan, Scan) {
        let n = post.len();
        let plane = |values: &[f64]| DMatrix::from_row_slice(1, n, values);
        let pre_values = vec![pre; n];
        let pre = Scan::new(
            16,
            vec![(Channel::Red, plane(&pre_values)), (Channel::Green, plane(&pre_values))],
        )
        .unwrap();
        let post = Scan::new(16, vec![(Channel::Red, plane(post)), (Channel::Green, plane(post))]).unwrap();
        (pre, post)
    }

    #[test]
    fn missing_channel_calibration_is_channel_mismatch() {
        let set = calibrations(&[Channel::Red, Channel::Green]);
        let (pre, post) = film(1000.0, &[500.0]);
        let scans = ScanSetBuilder::new()
            .pre(&pre)
            .post(&post)
            .build(ExtractionMode::Simple)
            .unwrap();
        let rois = [Roi::full("film", (1, 1)).unwrap()];
        let err = DoseReconstructor::new(&set, "L1")
            .run(scans, &rois, &[Channel::Blue])
            .unwrap_err();
        assert!(matches!(
            err,
            DoseError::ChannelMismatch {
                channel: Channel::Blue,
                ..
            }
        ));

        // Same channels under another lot are not a match either.
        let err = DoseReconstructor::new(&set, "L2")
            .run(scans, &rois, &[Channel::Red])
            .unwrap_err();
        assert!(matches!(err, DoseError::ChannelMismatch { .. }));
    }

    #[test]
    fn stages_advance_and_channels_stay_separate() {
        let set = calibrations(&[Channel::Red, Channel::Green]);
        let post = 1000.0 / 10f64.powf(0.5);
        let (pre, post) = film(1000.0, &[post, post]);
        let scans = ScanSetBuilder::new()
            .pre(&pre)
            .post(&post)
            .build(ExtractionMode::Simple)
            .unwrap();
        let rois = [Roi::full("film", (1, 2)).unwrap()];

        let run = DoseReconstructor::new(&set, "L1");
        assert_eq!(run.stage(), RunStage::Idle);
        let loaded = run.load(scans);
        assert_eq!(loaded.stage(), RunStage::ScansLoaded);
        let extracted = loaded.extract(&rois, &[Channel::Red, Channel::Green, Channel::Red]).unwrap();
        assert_eq!(extracted.stage(), RunStage::OdExtracted);
        assert_eq!(extracted.netod().len(), 2);
        let done = extracted.compute().unwrap();
        assert_eq!(done.stage(), RunStage::DoseComputed);

        for ch in [Channel::Red, Channel::Green] {
            let r = done.get("film", ch).unwrap();
            assert_eq!(r.summary.n, 2);
            assert!((r.summary.dose_of_netod_of_means - 2.5).abs() < 1e-6);
            assert!((r.summary.dose_of_mean_netod - 2.5).abs() < 1e-6);
            assert!((r.summary.mean_dose - 2.5).abs() < 1e-6);
            assert_eq!(r.map.dose.len(), 2);
        }
        assert!(done.get("film", Channel::Blue).is_none());
    }

    #[test]
    fn referenced_run_maps_the_whole_post_scan() {
        let set = calibrations(&[Channel::Red]);
        // netOD 0.5 maps to 2.5 Gy on the linear calibration.
        let dark = 1000.0 / 10f64.powf(0.5);
        let pre = Scan::from_rows(16, Channel::Red, &[vec![1000.0, 1000.0, 1.0], vec![1000.0, 1000.0, 1.0]]).unwrap();
        let post = Scan::from_rows(16, Channel::Red, &[vec![dark, dark, dark], vec![dark, 1000.0, dark]]).unwrap();
        let scans = ScanSetBuilder::new()
            .pre(&pre)
            .post(&post)
            .build(ExtractionMode::Simple)
            .unwrap();
        let pairs = [(
            Roi::rect("unexposed", 0, 2, 0, 2, (2, 3)).unwrap(),
            Roi::full("film", (2, 3)).unwrap(),
        )];

        let done = DoseReconstructor::new(&set, "L1")
            .load(scans)
            .extract_referenced(&pairs, &[Channel::Red])
            .unwrap()
            .compute()
            .unwrap();
        let r = done.get("film", Channel::Red).unwrap();
        assert_eq!(r.netod.reference.as_deref(), Some("unexposed"));
        assert_eq!(r.map.dose.len(), 6);
        assert!((r.map.get(0, 2).unwrap() - 2.5).abs() < 1e-6);
        assert!(r.map.get(1, 1).unwrap().abs() < 1e-6);
    }

    #[test]
    fn reference_roi_must_fit_the_scans() {
        let set = calibrations(&[Channel::Red]);
        let (pre, post) = film(1000.0, &[500.0]);
        let scans = ScanSetBuilder::new()
            .pre(&pre)
            .post(&post)
            .build(ExtractionMode::Simple)
            .unwrap();
        let pairs = [(Roi::full("ref", (2, 2)).unwrap(), Roi::full("film", (1, 1)).unwrap())];
        let err = DoseReconstructor::new(&set, "L1")
            .load(scans)
            .extract_referenced(&pairs, &[Channel::Red])
            .err()
            .unwrap();
        assert!(matches!(err, DoseError::InvalidScan(_)));
    }

    #[test]
    fn dose_map_densifies_with_fill() {
        let map = DoseMap {
            channel: Channel::Red,
            roi: "spot".to_string(),
            shape: (2, 2),
            pixels: vec![(0, 1), (1, 0)],
            dose: vec![1.5, 2.5],
        };
        let m = map.to_matrix(f64::NAN);
        assert_eq!(m[(0, 1)], 1.5);
        assert_eq!(m[(1, 0)], 2.5);
        assert!(m[(0, 0)].is_nan());
        assert_eq!(map.get(1, 0), Some(2.5));
        assert_eq!(map.get(1, 1), None);
    }

    #[test]
    fn out_of_range_pixel_propagates() {
        let set = calibrations(&[Channel::Red]);
        // netOD 2.0 is far beyond the calibrated [0, 1].
        let (pre, post) = film(1000.0, &[10.0]);
        let scans = ScanSetBuilder::new()
            .pre(&pre)
            .post(&post)
            .build(ExtractionMode::Simple)
            .unwrap();
        let rois = [Roi::full("film", (1, 1)).unwrap()];
        let err = DoseReconstructor::new(&set, "L1")
            .run(scans, &rois, &[Channel::Red])
            .unwrap_err();
        assert!(matches!(err, DoseError::OutOfRange { .. }));
    }

    #[test]
    fn shared_calibrations_serve_concurrent_runs() {
        let set = calibrations(&[Channel::Red, Channel::Green]);
        let (pre, post) = film(1000.0, &[500.0, 400.0]);
        let rois = [Roi::full("film", (1, 2)).unwrap()];

        let means: Vec<f64> = std::thread::scope(|s| {
            let handles: Vec<_> = [Channel::Red, Channel::Green]
                .into_iter()
                .map(|ch| {
                    let (set, pre, post, rois) = (&set, &pre, &post, &rois);
                    s.spawn(move || {
                        let scans = ScanSetBuilder::new().pre(pre).post(post).build_auto().unwrap();
                        let done = DoseReconstructor::new(set, "L1").run(scans, rois, &[ch]).unwrap();
                        done.results()[0].summary.mean_dose
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(means[0], means[1]);
    }
}
