//! Read/write calibration bundle JSON files.
//!
//! A bundle is the portable representation of a fitted calibration:
//! - format tag + schema version
//! - lot, channel, calibration date
//! - functional form + parameters, calibrated netOD and dose ranges
//! - fit statistics and the calibration points themselves
//! - a precomputed fitted grid for quick plotting
//!
//! Version policy: readers accept exactly the versions they know. Anything
//! else (newer versions, unknown format tags, missing version) fails with
//! `UnsupportedCalibrationVersion` before the payload is interpreted.

use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::calib::{Calibration, CurveModel};
use crate::domain::{CalibrationPoint, Channel, CurveParams, FitQuality, ValueRange};
use crate::error::DoseError;

pub const BUNDLE_FORMAT: &str = "ebt-calibration";
pub const BUNDLE_VERSION: u32 = 1;

/// Versions this build can read.
const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Samples stored in the plotting grid.
const GRID_SAMPLES: usize = 101;

/// On-disk schema, version 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationBundle {
    pub format: String,
    pub version: u32,
    pub tool: String,
    pub written_at: DateTime<Utc>,
    pub lot: String,
    pub channel: Channel,
    pub date: Option<NaiveDate>,
    pub model: CurveParams,
    pub netod_range: ValueRange,
    pub dose_range: ValueRange,
    pub quality: FitQuality,
    pub points: Vec<CalibrationPoint>,
    pub grid: CurveGrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveGrid {
    pub netod: Vec<f64>,
    pub dose: Vec<f64>,
}

/// Only the fields needed to decide whether the payload can be read.
#[derive(Debug, Deserialize)]
struct BundleHeader {
    format: Option<String>,
    version: Option<u32>,
}

impl CalibrationBundle {
    pub fn from_calibration(calibration: &Calibration) -> Result<Self, DoseError> {
        let curve = calibration.curve()?;
        let (netod, dose) = curve.samples(GRID_SAMPLES).into_iter().unzip();
        Ok(Self {
            format: BUNDLE_FORMAT.to_string(),
            version: BUNDLE_VERSION,
            tool: "ebtdose".to_string(),
            written_at: Utc::now(),
            lot: calibration.lot().to_string(),
            channel: calibration.channel(),
            date: calibration.date(),
            model: curve.params.clone(),
            netod_range: curve.netod_range,
            dose_range: curve.dose_range,
            quality: *calibration.quality()?,
            points: calibration.points().to_vec(),
            grid: CurveGrid { netod, dose },
        })
    }

    pub fn into_calibration(self) -> Result<Calibration, DoseError> {
        let model = &self.model;
        let params_ok = model.betas.len() == model.kind.beta_len()
            && model.betas.iter().all(|b| b.is_finite())
            && model.shape.is_finite();
        let ranges_ok = [self.netod_range, self.dose_range]
            .iter()
            .all(|r| r.min.is_finite() && r.max.is_finite() && r.min <= r.max);
        if !(params_ok && ranges_ok) {
            return Err(DoseError::UnsupportedCalibrationVersion(format!(
                "version {} bundle for lot {} channel {} has invalid parameters",
                self.version, self.lot, self.channel
            )));
        }

        let curve = CurveModel {
            params: self.model,
            netod_range: self.netod_range,
            dose_range: self.dose_range,
        };
        Ok(Calibration::from_fitted(
            self.lot,
            self.channel,
            self.date,
            self.points,
            curve,
            self.quality,
        ))
    }
}

/// Serialize a fitted calibration.
pub fn to_json(calibration: &Calibration) -> Result<String, DoseError> {
    let bundle = CalibrationBundle::from_calibration(calibration)?;
    serde_json::to_string_pretty(&bundle)
        .map_err(|e| DoseError::Io(format!("Failed to serialize calibration bundle: {e}")))
}

/// Parse a bundle, checking format and version first.
pub fn from_json(text: &str) -> Result<Calibration, DoseError> {
    let header: BundleHeader = serde_json::from_str(text).map_err(|e| {
        DoseError::UnsupportedCalibrationVersion(format!("not a calibration bundle: {e}"))
    })?;

    match header.format.as_deref() {
        Some(BUNDLE_FORMAT) => {}
        Some(other) => {
            return Err(DoseError::UnsupportedCalibrationVersion(format!(
                "unknown format tag '{other}'"
            )));
        }
        None => {
            return Err(DoseError::UnsupportedCalibrationVersion(
                "missing format tag".to_string(),
            ));
        }
    }
    let Some(version) = header.version else {
        return Err(DoseError::UnsupportedCalibrationVersion(
            "missing version".to_string(),
        ));
    };
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(DoseError::UnsupportedCalibrationVersion(format!(
            "version {version} (this build reads {SUPPORTED_VERSIONS:?})"
        )));
    }

    let bundle: CalibrationBundle = serde_json::from_str(text).map_err(|e| {
        DoseError::UnsupportedCalibrationVersion(format!("malformed version {version} bundle: {e}"))
    })?;
    bundle.into_calibration()
}

/// Write a calibration bundle file.
pub fn write_bundle(path: &Path, calibration: &Calibration) -> Result<(), DoseError> {
    let json = to_json(calibration)?;
    fs::write(path, json)
        .map_err(|e| DoseError::Io(format!("Failed to write calibration '{}': {e}", path.display())))?;
    info!(
        "Saved calibration lot {} channel {} to {}",
        calibration.lot(),
        calibration.channel(),
        path.display()
    );
    Ok(())
}

/// Read a calibration bundle file.
pub fn read_bundle(path: &Path) -> Result<Calibration, DoseError> {
    let text = fs::read_to_string(path)
        .map_err(|e| DoseError::Io(format!("Failed to open calibration '{}': {e}", path.display())))?;
    let calibration = from_json(&text)?;
    info!(
        "Loaded calibration lot {} channel {} from {}",
        calibration.lot(),
        calibration.channel(),
        path.display()
    );
    Ok(calibration)
}
