//! Formatted terminal output.
//!
//! Formatting lives in one place so the fitting and extraction code stays
//! free of presentation concerns.

use crate::calib::Calibration;
use crate::error::DoseError;
use crate::io::ingest::IngestedPoints;
use crate::recon::DoseComputed;
use crate::report::PointResidual;

/// Dataset stats, per-form diagnostics and the chosen curve.
pub fn format_fit_summary(ingest: &IngestedPoints, calibration: &Calibration) -> Result<String, DoseError> {
    let mut out = String::new();
    let curve = calibration.curve()?;

    out.push_str("=== ebtdose - EBT film calibration ===\n");
    out.push_str(&format!("Lot: {}\n", calibration.lot()));
    out.push_str(&format!("Channel: {}\n", calibration.channel()));
    if let Some(date) = calibration.date() {
        out.push_str(&format!("Date: {date}\n"));
    }
    out.push_str(&format!(
        "Points: n={} (rows read {}, rejected {}) | dose=[{:.3}, {:.3}] Gy | netOD=[{:.4}, {:.4}] from `{}`\n",
        ingest.stats.n_points,
        ingest.rows_read,
        ingest.row_errors.len(),
        ingest.stats.dose_min,
        ingest.stats.dose_max,
        ingest.stats.netod_min,
        ingest.stats.netod_max,
        ingest.netod_column
    ));
    for e in ingest.row_errors.iter().take(5) {
        out.push_str(&format!("  line {}: {}\n", e.line, e.message));
    }

    out.push_str("\nModel diagnostics:\n");
    for fit in calibration.candidates()? {
        let chosen = if fit.model.kind == curve.params.kind { "*" } else { " " };
        out.push_str(&format!(
            "{chosen} {:<10} SSE={:.5} RMSE={:.4}Gy BIC={:.3}\n",
            fit.model.display_name, fit.quality.sse, fit.quality.rmse, fit.quality.bic
        ));
    }
    for (kind, reason) in calibration.skipped()? {
        out.push_str(&format!("  (skipped {}) {reason}\n", kind.display_name()));
    }

    out.push_str("\nChosen model:\n");
    out.push_str(&format!("- {}\n", calibration.formula()?));
    out.push_str(&format!("- betas: {}\n", fmt_vec(&curve.params.betas)));
    out.push_str(&format!("- shape: {:.6}\n", curve.params.shape));
    out.push_str(&format!(
        "- calibrated netOD [{:.4}, {:.4}] -> dose [{:.3}, {:.3}] Gy\n",
        curve.netod_range.min, curve.netod_range.max, curve.dose_range.min, curve.dose_range.max
    ));
    out.push('\n');

    Ok(out)
}

/// Table of calibration points with fitted dose and residual.
pub fn format_residuals(rows: &[PointResidual]) -> String {
    let mut out = String::new();
    out.push_str(format!("{:>10} {:>10} {:>10} {:>10} {:>10}", "netod", "dose", "dose_fit", "residual", "weight").trim_end());
    out.push('\n');
    out.push_str(format!("{:-<10} {:-<10} {:-<10} {:-<10} {:-<10}", "", "", "", "", "").trim_end());
    out.push('\n');
    for r in rows {
        out.push_str(&format!(
            "{:>10.4} {:>10.3} {:>10.3} {:>10.4} {:>10.3}\n",
            r.point.netod, r.point.dose, r.dose_fit, r.residual, r.point.weight
        ));
    }
    out
}

/// Per-ROI scalar doses, one line per (ROI, channel).
pub fn format_dose_summary(computed: &DoseComputed) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== ebtdose - dose ({} mode, lot {}) ===\n",
        computed.mode().display_name(),
        computed.lot()
    ));
    out.push_str(
        format!(
            "{:<16} {:<6} {:>6} {:>10} {:>18} {:>12} {:>10}",
            "roi", "chan", "n", "netOD", "dose(netOD_mean)", "dose(mean)", "mean_dose"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<16} {:-<6} {:-<6} {:-<10} {:-<18} {:-<12} {:-<10}", "", "", "", "", "", "", "").trim_end());
    out.push('\n');
    for s in computed.summaries() {
        let dose = format!("{:.3}±{:.3}", s.dose_of_netod_of_means, s.dose_of_netod_of_means_sigma);
        out.push_str(&format!(
            "{:<16} {:<6} {:>6} {:>10.4} {:>18} {:>12.3} {:>10.3}\n",
            truncate(&s.roi, 16),
            s.channel.display_name(),
            s.n,
            s.netod_of_means,
            dose,
            s.dose_of_mean_netod,
            s.mean_dose
        ));
    }
    out
}

pub(crate) fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CalibrationPoint;

    #[test]
    fn residual_table_has_header_and_rows() {
        let rows = vec![PointResidual {
            point: CalibrationPoint::new(2.0, 0.25),
            dose_fit: 1.98,
            residual: 0.02,
        }];
        let text = format_residuals(&rows);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].trim_start().starts_with("netod"));
        assert!(lines[2].contains("0.2500"));
        assert!(lines[2].contains("0.0200"));
    }

    #[test]
    fn truncate_marks_cut_names() {
        assert_eq!(truncate("spot", 16), "spot");
        assert_eq!(truncate("abcdefgh", 4), "abc.");
    }

    #[test]
    fn fmt_vec_brackets_values() {
        assert_eq!(fmt_vec(&[1.0, 0.5]), "[1.000000, 0.500000]");
    }
}
