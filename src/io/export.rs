//! Export dose results and fitted curves to CSV.
//!
//! The exports are meant to be easy to consume in spreadsheets or plotting
//! scripts.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use crate::calib::CurveSamples;
use crate::domain::CalibrationPoint;
use crate::error::DoseError;
use crate::recon::DoseComputed;

/// Per-pixel netOD and dose for every (ROI, channel) result.
pub fn write_dose_csv(path: &Path, computed: &DoseComputed) -> Result<(), DoseError> {
    let mut out = create(path)?;
    write_dose_rows(&mut out, computed).map_err(|e| write_error(path, e))?;
    info!("Wrote dose map CSV {}", path.display());
    Ok(())
}

/// Per-ROI scalar doses.
pub fn write_summary_csv(path: &Path, computed: &DoseComputed) -> Result<(), DoseError> {
    let mut out = create(path)?;
    write_summary_rows(&mut out, computed).map_err(|e| write_error(path, e))?;
    info!("Wrote ROI summary CSV {}", path.display());
    Ok(())
}

/// Calibration points followed by the fitted curve samples.
pub fn write_curve_csv(path: &Path, samples: &CurveSamples) -> Result<(), DoseError> {
    let mut out = create(path)?;
    write_curve_rows(&mut out, samples).map_err(|e| write_error(path, e))?;
    info!("Wrote curve CSV {}", path.display());
    Ok(())
}

/// Calibration points in the format read by `load_calibration_points`.
pub fn write_points_csv(path: &Path, points: &[CalibrationPoint]) -> Result<(), DoseError> {
    let mut out = create(path)?;
    write_points_rows(&mut out, points).map_err(|e| write_error(path, e))?;
    info!("Wrote {} calibration points to {}", points.len(), path.display());
    Ok(())
}

fn create(path: &Path) -> Result<BufWriter<File>, DoseError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| DoseError::Io(format!("Failed to create export CSV '{}': {e}", path.display())))
}

fn write_error(path: &Path, e: std::io::Error) -> DoseError {
    DoseError::Io(format!("Failed to write export CSV '{}': {e}", path.display()))
}

pub fn write_dose_rows<W: Write>(out: &mut W, computed: &DoseComputed) -> std::io::Result<()> {
    writeln!(out, "lot,roi,channel,row,col,netod,dose_gy")?;
    for result in computed.results() {
        let map = &result.map;
        // Map pixels share the extraction order.
        for (((row, col), dose), netod) in map.iter().zip(&result.netod.netod) {
            writeln!(
                out,
                "{},{},{},{row},{col},{netod:.6},{dose:.6}",
                computed.lot(),
                map.roi,
                map.channel
            )?;
        }
    }
    out.flush()
}

pub fn write_summary_rows<W: Write>(out: &mut W, computed: &DoseComputed) -> std::io::Result<()> {
    writeln!(
        out,
        "lot,mode,roi,channel,n,netod_of_means,netod_of_means_sigma,mean_of_netod,dose_of_netod_of_means,dose_sigma,dose_of_mean_netod,mean_dose"
    )?;
    for s in computed.summaries() {
        writeln!(
            out,
            "{},{},{},{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
            computed.lot(),
            computed.mode().display_name(),
            s.roi,
            s.channel,
            s.n,
            s.netod_of_means,
            s.netod_of_means_sigma,
            s.mean_of_netod,
            s.dose_of_netod_of_means,
            s.dose_of_netod_of_means_sigma,
            s.dose_of_mean_netod,
            s.mean_dose
        )?;
    }
    out.flush()
}

pub fn write_points_rows<W: Write>(out: &mut W, points: &[CalibrationPoint]) -> std::io::Result<()> {
    writeln!(out, "dose,netod,weight")?;
    for p in points {
        writeln!(out, "{},{},{}", p.dose, p.netod, p.weight)?;
    }
    out.flush()
}

pub fn write_curve_rows<W: Write>(out: &mut W, samples: &CurveSamples) -> std::io::Result<()> {
    writeln!(out, "kind,netod,dose_gy")?;
    for (&dose, &netod) in samples.doses.iter().zip(&samples.netods) {
        writeln!(out, "point,{netod:.6},{dose:.6}")?;
    }
    for &(netod, dose) in &samples.fitted {
        writeln!(out, "fit,{netod:.6},{dose:.6}")?;
    }
    out.flush()
}
