//! Debug bundle writer for inspecting calibration points and every fitted form.

use std::collections::HashMap;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use log::info;

use crate::calib::Calibration;
use crate::domain::{FitConfig, ModelKind, ModelSpec, ValueRange};
use crate::error::DoseError;
use crate::fit::selection::{fit_and_select, fitted_grid};
use crate::report::format::fmt_vec;

/// Rows in the curve grid table.
const GRID_ROWS: usize = 21;

/// Write a markdown bundle for `calibration` into `dir`; returns the file path.
///
/// All forms are refitted from the calibration points with `config`, so the
/// bundle also shows the forms that lost the selection.
pub fn write_debug_bundle(dir: &Path, calibration: &Calibration, config: &FitConfig) -> Result<PathBuf, DoseError> {
    create_dir_all(dir).map_err(|e| DoseError::Io(format!("Failed to create debug dir: {e}")))?;

    let ts = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!(
        "ebtdose_debug_{}_{}_{ts}.md",
        sanitize(calibration.lot()),
        calibration.channel().column_name()
    ));
    let file = File::create(&path).map_err(|e| DoseError::Io(format!("Failed to create debug file: {e}")))?;
    let mut out = BufWriter::new(file);

    write_bundle(&mut out, calibration, config)?;
    out.flush().map_err(write_err)?;
    info!("Wrote debug bundle {}", path.display());
    Ok(path)
}

fn write_bundle<W: Write>(out: &mut W, calibration: &Calibration, config: &FitConfig) -> Result<(), DoseError> {
    writeln!(out, "# ebtdose debug bundle").map_err(write_err)?;
    writeln!(out, "- generated: {}", Local::now().to_rfc3339()).map_err(write_err)?;
    writeln!(out, "- lot: {}", calibration.lot()).map_err(write_err)?;
    writeln!(out, "- channel: {}", calibration.channel()).map_err(write_err)?;
    if let Some(date) = calibration.date() {
        writeln!(out, "- calibration_date: {date}").map_err(write_err)?;
    }
    writeln!(
        out,
        "- power grid: n in (1, {:.2}], {} steps",
        config.power_n_max, config.power_steps
    )
    .map_err(write_err)?;
    writeln!(
        out,
        "- rational grid: c in [{:.2}, {:.2}] x max netOD, {} steps",
        config.rational_ratio_min, config.rational_ratio_max, config.rational_steps
    )
    .map_err(write_err)?;
    writeln!(
        out,
        "- robust: {:?} (iters={}, k={:.2})",
        config.robust, config.robust_iters, config.robust_k
    )
    .map_err(write_err)?;

    writeln!(out, "\n## Calibration points").map_err(write_err)?;
    writeln!(out, "| dose_gy | netod | weight |").map_err(write_err)?;
    writeln!(out, "| - | - | - |").map_err(write_err)?;
    for p in calibration.points() {
        writeln!(out, "| {:.4} | {:.6} | {:.4} |", p.dose, p.netod, p.weight).map_err(write_err)?;
    }

    let all = FitConfig {
        model_spec: ModelSpec::All,
        ..config.clone()
    };
    let selection = fit_and_select(calibration.points(), &all)?;

    writeln!(out, "\n## Fits").map_err(write_err)?;
    writeln!(out, "| model | sse | rmse | bic | betas | shape |").map_err(write_err)?;
    writeln!(out, "| - | - | - | - | - | - |").map_err(write_err)?;
    for fit in &selection.fits {
        writeln!(
            out,
            "| {} | {:.6} | {:.6} | {:.3} | {} | {:.6} |",
            fit.model.display_name,
            fit.quality.sse,
            fit.quality.rmse,
            fit.quality.bic,
            fmt_vec(&fit.model.betas),
            fit.model.shape
        )
        .map_err(write_err)?;
    }
    for (kind, reason) in &selection.skipped {
        writeln!(out, "- skipped {}: {}", kind.display_name(), reason).map_err(write_err)?;
    }
    writeln!(out, "\nSelected by BIC: {}", selection.best.model.display_name).map_err(write_err)?;

    let netods: Vec<f64> = calibration.points().iter().map(|p| p.netod).collect();
    let Some(range) = ValueRange::of(&netods) else {
        return Ok(());
    };
    let grid: Vec<f64> = (0..GRID_ROWS)
        .map(|i| range.min + range.width() * i as f64 / (GRID_ROWS as f64 - 1.0))
        .collect();
    let columns: HashMap<ModelKind, Vec<f64>> = selection
        .fits
        .iter()
        .map(|f| (f.model.kind, fitted_grid(&f.model, &grid)))
        .collect();

    writeln!(out, "\n## Curve grid").map_err(write_err)?;
    writeln!(out, "| netod | power | rational |").map_err(write_err)?;
    writeln!(out, "| - | - | - |").map_err(write_err)?;
    for (i, x) in grid.iter().enumerate() {
        let cell = |kind: ModelKind| fmt_opt(columns.get(&kind).map(|v| v[i]));
        writeln!(out, "| {x:.4} | {} | {} |", cell(ModelKind::Power), cell(ModelKind::Rational)).map_err(write_err)?;
    }
    Ok(())
}

fn write_err(e: std::io::Error) -> DoseError {
    DoseError::Io(format!("Failed to write debug: {e}"))
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn fmt_opt(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.4}"),
        _ => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Channel;

    #[test]
    fn bundle_lists_points_fits_and_grid() {
        let doses = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let netods = [0.0, 0.2, 0.4, 0.6, 0.8, 1.0];
        let mut c = Calibration::new("L/7", Channel::Red, &doses, &netods).unwrap();
        c.fit(&FitConfig::default()).unwrap();

        let mut buf = Vec::new();
        write_bundle(&mut buf, &c, &FitConfig::default()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("## Calibration points"));
        assert!(text.contains("| power |"));
        assert!(text.contains("## Curve grid"));
        assert!(text.contains("| 0.5000 | 2.5000 |"));
    }

    #[test]
    fn lot_names_are_made_file_safe() {
        assert_eq!(sanitize("L/7 b"), "L_7_b");
    }
}
