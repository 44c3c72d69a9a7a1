//! Shared workflow logic behind the CLI commands.
//!
//! Each function here runs one workflow end to end and returns its outputs:
//! - fit: points CSV -> calibration -> curve fit
//! - dose: bundles + scans + ROIs -> typestate reconstruction
//! - sample: synthetic curve -> points CSV + scan pair
//!
//! The caller decides what to print and export.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::info;

use crate::calib::{Calibration, CalibrationSet};
use crate::data::SampleData;
use crate::domain::{Channel, FitConfig, RangePolicy};
use crate::error::DoseError;
use crate::film::{ExtractionMode, Roi, Scan, ScanSetBuilder};
use crate::io::ingest::{load_calibration_points, IngestedPoints};
use crate::io::scan::{write_scan_csv, ScanLoader};
use crate::recon::{DoseComputed, DoseReconstructor};

/// Outputs of a single fit.
#[derive(Debug, Clone)]
pub struct FitRun {
    pub ingest: IngestedPoints,
    pub calibration: Calibration,
}

/// Ingest points for `channel` and fit a calibration.
pub fn run_fit(
    points: &Path,
    lot: &str,
    channel: Channel,
    date: Option<NaiveDate>,
    config: &FitConfig,
) -> Result<FitRun, DoseError> {
    let ingest = load_calibration_points(points, channel)?;
    let mut calibration = Calibration::from_points(lot, channel, ingest.points.clone());
    if let Some(date) = date {
        calibration = calibration.with_date(date);
    }

    let quality = calibration.fit(config)?;
    info!(
        "Fitted lot {lot} {channel}: rmse {:.4} Gy, bic {:.3}",
        quality.rmse, quality.bic
    );
    Ok(FitRun { ingest, calibration })
}

/// Load bundles and apply the lookup range policy to each.
pub fn load_calibrations(paths: &[PathBuf], policy: RangePolicy) -> Result<CalibrationSet, DoseError> {
    let mut set = CalibrationSet::new();
    for path in paths {
        let calibration = Calibration::load(path)?.with_range_policy(policy)?;
        if let Some(previous) = set.insert(calibration) {
            return Err(DoseError::InvalidConfig(format!(
                "more than one calibration for lot {} channel {} ({})",
                previous.lot(),
                previous.channel(),
                path.display()
            )));
        }
    }
    Ok(set)
}

/// Rectangle bounds, `right` and `bottom` exclusive.
pub type RectBounds = (usize, usize, usize, usize);

/// Where the scans of one dose run come from.
#[derive(Debug, Clone, Default)]
pub struct ScanPaths {
    pub pre: PathBuf,
    pub post: PathBuf,
    pub control: Option<(PathBuf, PathBuf)>,
    pub control_rect: Option<RectBounds>,
    pub background: Option<PathBuf>,
    pub background_post: Option<PathBuf>,
    pub background_rect: Option<RectBounds>,
    pub rois: Option<PathBuf>,
    /// Pre-scan ROIs paired by position with `rois`.
    pub pre_rois: Option<PathBuf>,
    /// One pre-scan rectangle used as the pre level for every ROI.
    pub pre_reference: Option<RectBounds>,
}

/// Owned scans and ROIs of one dose run.
#[derive(Debug, Clone)]
pub struct DoseInputs {
    pub pre: Scan,
    pub post: Scan,
    pub control: Option<(Scan, Scan, Roi)>,
    pub background: Option<Scan>,
    pub background_post: Option<Scan>,
    pub background_roi: Option<Roi>,
    pub rois: Vec<Roi>,
    /// Pre-level ROI per entry of `rois`; `None` for pixel-registered scans.
    pub pre_references: Option<Vec<Roi>>,
}

/// Name of the ROI used when no ROI file is given.
pub const FULL_FILM_ROI: &str = "film";

pub fn load_dose_inputs(paths: &ScanPaths, loader: &dyn ScanLoader) -> Result<DoseInputs, DoseError> {
    let pre = loader.load_scan(&paths.pre)?;
    let post = loader.load_scan(&paths.post)?;

    let control = match &paths.control {
        Some((c_pre, c_post)) => {
            let c_pre = loader.load_scan(c_pre)?;
            let c_post = loader.load_scan(c_post)?;
            let roi = rect_or_full("control", paths.control_rect, c_pre.shape())?;
            Some((c_pre, c_post, roi))
        }
        None if paths.control_rect.is_some() => {
            return Err(DoseError::InvalidConfig(
                "a control rectangle needs control pre/post scans".to_string(),
            ));
        }
        None => None,
    };

    let background = paths.background.as_deref().map(|p| loader.load_scan(p)).transpose()?;
    let background_post = match (&paths.background_post, &background) {
        (Some(_), None) => {
            return Err(DoseError::InvalidConfig(
                "a post-session background scan needs a pre-session background scan".to_string(),
            ));
        }
        (Some(p), Some(_)) => Some(loader.load_scan(p)?),
        (None, _) => None,
    };
    let background_roi = match (&background, paths.background_rect) {
        (Some(bg), Some(rect)) => Some(rect_roi("background", rect, bg.shape())?),
        (None, Some(_)) => {
            return Err(DoseError::InvalidConfig(
                "a background rectangle needs a background scan".to_string(),
            ));
        }
        _ => None,
    };

    let rois = match &paths.rois {
        Some(path) => crate::io::roi::load_rois(path, pre.shape())?,
        None => vec![Roi::full(FULL_FILM_ROI, pre.shape())?],
    };
    let pre_references = match (&paths.pre_rois, paths.pre_reference) {
        (Some(_), Some(_)) => {
            return Err(DoseError::InvalidConfig(
                "give either pre-scan ROIs or a single pre reference, not both".to_string(),
            ));
        }
        (Some(_), None) if paths.rois.is_none() => {
            return Err(DoseError::InvalidConfig(
                "pre-scan ROIs are paired with an ROI file for the post scan".to_string(),
            ));
        }
        (Some(path), None) => {
            let references = crate::io::roi::load_rois(path, pre.shape())?;
            if references.len() != rois.len() {
                return Err(DoseError::InvalidConfig(format!(
                    "{} pre-scan ROIs cannot pair with {} post-scan ROIs",
                    references.len(),
                    rois.len()
                )));
            }
            Some(references)
        }
        (None, Some(rect)) => {
            let reference = rect_roi("pre reference", rect, pre.shape())?;
            Some(vec![reference; rois.len()])
        }
        (None, None) => None,
    };

    Ok(DoseInputs {
        pre,
        post,
        control,
        background,
        background_post,
        background_roi,
        rois,
        pre_references,
    })
}

/// Assemble the scan set and run the reconstruction state machine.
///
/// `mode = None` picks advanced extraction when control or background scans
/// were supplied.
pub fn run_dose(
    inputs: &DoseInputs,
    calibrations: &CalibrationSet,
    lot: &str,
    channels: &[Channel],
    mode: Option<ExtractionMode>,
) -> Result<DoseComputed, DoseError> {
    let mut builder = ScanSetBuilder::new().pre(&inputs.pre).post(&inputs.post);
    if let Some((c_pre, c_post, roi)) = &inputs.control {
        builder = builder.control(c_pre, c_post, roi);
    }
    builder = match (&inputs.background, &inputs.background_post) {
        (Some(bg_pre), Some(bg_post)) => builder.background_pair(bg_pre, bg_post),
        (Some(bg), None) => builder.background(bg),
        _ => builder,
    };
    if let Some(roi) = &inputs.background_roi {
        builder = builder.background_roi(roi);
    }
    let scans = match mode {
        Some(mode) => builder.build(mode)?,
        None => builder.build_auto()?,
    };

    let loaded = DoseReconstructor::new(calibrations, lot).load(scans);
    info!(
        "Reconstructing lot {lot} in {} mode: {} ROI(s), channels {:?}{}",
        loaded.mode().display_name(),
        inputs.rois.len(),
        channels,
        if inputs.pre_references.is_some() { ", pre reference levels" } else { "" }
    );
    match &inputs.pre_references {
        Some(references) => {
            let pairs: Vec<(Roi, Roi)> = references.iter().cloned().zip(inputs.rois.iter().cloned()).collect();
            loaded.extract_referenced(&pairs, channels)?.compute()
        }
        None => loaded.extract(&inputs.rois, channels)?.compute(),
    }
}

/// Files written by `write_sample`.
#[derive(Debug, Clone)]
pub struct SampleFiles {
    pub points: PathBuf,
    pub pre: PathBuf,
    pub post: PathBuf,
}

pub fn write_sample(dir: &Path, sample: &SampleData) -> Result<SampleFiles, DoseError> {
    fs::create_dir_all(dir)
        .map_err(|e| DoseError::Io(format!("Failed to create '{}': {e}", dir.display())))?;
    let files = SampleFiles {
        points: dir.join("points.csv"),
        pre: dir.join("pre.csv"),
        post: dir.join("post.csv"),
    };
    crate::io::export::write_points_csv(&files.points, &sample.points)?;
    write_scan_csv(&files.pre, &sample.pre)?;
    write_scan_csv(&files.post, &sample.post)?;
    Ok(files)
}

fn rect_roi(name: &str, (left, right, top, bottom): RectBounds, shape: (usize, usize)) -> Result<Roi, DoseError> {
    Roi::rect(name, left, right, top, bottom, shape)
}

fn rect_or_full(name: &str, rect: Option<RectBounds>, shape: (usize, usize)) -> Result<Roi, DoseError> {
    match rect {
        Some(rect) => rect_roi(name, rect, shape),
        None => Roi::full(name, shape),
    }
}
